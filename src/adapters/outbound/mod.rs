mod heap_memory_source;
pub mod metric_registry;
mod prometheus_metrics_store;
mod rng_jitter;

pub use heap_memory_source::{HeapMemorySource, TrackingAllocator};
pub use metric_registry::{HistogramSnapshot, MetricDesc, MetricKind, MetricRegistry, RegistryError};
pub use prometheus_metrics_store::{
    pod_metric_families, PrometheusMetricsStore, CONTAINER_CPU_USAGE_SECONDS_TOTAL,
    CONTAINER_MEMORY_WORKING_SET_BYTES, GRPC_SERVER_HANDLING_SECONDS, GRPC_SERVER_REQUESTS_TOTAL,
};
pub use rng_jitter::StdRngJitter;
