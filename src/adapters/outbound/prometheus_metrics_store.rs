//! Prometheus Metrics Store
//!
//! Implements MetricsRecorder on top of the metric registry, using the
//! family names and labels the load balancer's controller scrapes.

use crate::adapters::outbound::metric_registry::{MetricDesc, MetricRegistry, RegistryError};
use crate::domain::ports::MetricsRecorder;
use crate::domain::value_objects::MethodName;
use std::sync::Arc;
use std::time::Duration;

pub const GRPC_SERVER_HANDLING_SECONDS: &str = "grpc_server_handling_seconds";
pub const GRPC_SERVER_REQUESTS_TOTAL: &str = "grpc_server_requests_total";
pub const CONTAINER_CPU_USAGE_SECONDS_TOTAL: &str = "container_cpu_usage_seconds_total";
pub const CONTAINER_MEMORY_WORKING_SET_BYTES: &str = "container_memory_working_set_bytes";

/// The four families exposed by every pod.
pub fn pod_metric_families() -> Vec<MetricDesc> {
    vec![
        MetricDesc::histogram(
            GRPC_SERVER_HANDLING_SECONDS,
            "Histogram of response latency (seconds) of gRPC that had been application-level handled by the server.",
            &["grpc_method", "grpc_service", "pod"],
        ),
        MetricDesc::counter(
            GRPC_SERVER_REQUESTS_TOTAL,
            "Total number of gRPC requests processed",
            &["grpc_method", "grpc_service", "pod", "status"],
        ),
        MetricDesc::counter(
            CONTAINER_CPU_USAGE_SECONDS_TOTAL,
            "Cumulative cpu time consumed by the container in seconds",
            &["pod"],
        ),
        MetricDesc::gauge(
            CONTAINER_MEMORY_WORKING_SET_BYTES,
            "Current working set memory of the container in bytes",
            &["pod"],
        ),
    ]
}

/// Prometheus-compatible metrics store.
///
/// Every series written through this store carries the same `pod` label.
pub struct PrometheusMetricsStore {
    registry: Arc<MetricRegistry>,
    /// Pod label for metrics
    pod_id: String,
}

impl PrometheusMetricsStore {
    /// Register the pod families in `registry` and wrap it.
    ///
    /// Fails with `DuplicateRegistration` if the families already exist.
    pub fn new(registry: Arc<MetricRegistry>, pod_id: impl Into<String>) -> Result<Self, RegistryError> {
        for desc in pod_metric_families() {
            registry.register(desc)?;
        }
        Ok(Self {
            registry,
            pod_id: pod_id.into(),
        })
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> Result<String, RegistryError> {
        self.registry.render()
    }
}

impl MetricsRecorder for PrometheusMetricsStore {
    fn record_rpc(
        &self,
        name: &MethodName,
        status: &str,
        duration: Duration,
    ) -> Result<(), RegistryError> {
        self.registry.observe(
            GRPC_SERVER_HANDLING_SECONDS,
            &[name.method.as_str(), name.service.as_str(), self.pod_id.as_str()],
            duration.as_secs_f64(),
        )?;
        self.registry.add(
            GRPC_SERVER_REQUESTS_TOTAL,
            &[name.method.as_str(), name.service.as_str(), self.pod_id.as_str(), status],
            1.0,
        )
    }

    fn set_working_set_bytes(&self, bytes: u64) -> Result<(), RegistryError> {
        self.registry
            .set(CONTAINER_MEMORY_WORKING_SET_BYTES, &[self.pod_id.as_str()], bytes as f64)
    }

    fn add_cpu_seconds(&self, seconds: f64) -> Result<(), RegistryError> {
        self.registry
            .add(CONTAINER_CPU_USAGE_SECONDS_TOTAL, &[self.pod_id.as_str()], seconds)
    }
}
