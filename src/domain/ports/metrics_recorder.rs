//! Metrics Recorder Port
//!
//! Defines the interface the interceptor and the sampler write telemetry to.

use crate::adapters::outbound::RegistryError;
use crate::domain::value_objects::MethodName;
use std::time::Duration;

/// Sink for the pod's telemetry.
///
/// This is an outbound port. Implementations attach the pod label and map
/// each call onto the exposed metric families. Errors are programming
/// errors; callers log and drop them.
pub trait MetricsRecorder: Send + Sync {
    /// Record one completed RPC: one latency observation plus one request.
    fn record_rpc(
        &self,
        name: &MethodName,
        status: &str,
        duration: Duration,
    ) -> Result<(), RegistryError>;

    /// Set the working-set memory gauge.
    fn set_working_set_bytes(&self, bytes: u64) -> Result<(), RegistryError>;

    /// Advance the CPU time counter.
    fn add_cpu_seconds(&self, seconds: f64) -> Result<(), RegistryError>;
}
