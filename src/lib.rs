//! backend-pod Library
//!
//! Synthetic gRPC backend that exposes per-pod Prometheus telemetry. The
//! components are exported for the binary and for integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod proto;

// Re-export commonly used types
pub use adapters::inbound::{BackendGrpcService, GrpcServer, MetricsServer, ServerError};
pub use adapters::outbound::{MetricRegistry, PrometheusMetricsStore, RegistryError};
pub use application::RpcInterceptor;
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::PodProfile;
pub use domain::services::RequestSimulator;
pub use domain::value_objects::MethodName;
pub use infrastructure::{ShutdownController, SystemSampler};
