//! Domain Entities - Core business objects
//!
//! These entities represent the pod and the outcomes of its simulated
//! operations. They have no transport dependencies.

use serde::{Deserialize, Serialize};

/// Identity and performance characteristics of this pod.
///
/// Fixed at startup and shared read-only by every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodProfile {
    /// Value of the `pod` label on every emitted series
    pub pod_id: String,
    /// Multiplier for synthetic CPU work (intended 0.5-2.0)
    pub cpu_factor: f64,
    /// Baseline simulated latency in milliseconds (intended 10-100)
    pub latency_base_ms: u64,
}

impl PodProfile {
    pub fn new(pod_id: impl Into<String>, cpu_factor: f64, latency_base_ms: u64) -> Self {
        Self {
            pod_id: pod_id.into(),
            cpu_factor,
            latency_base_ms,
        }
    }
}

impl Default for PodProfile {
    fn default() -> Self {
        Self::new("backend-pod-unknown", 1.0, 50)
    }
}

/// Serving status reported by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
}

/// Outcome of a ProcessData call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedData {
    pub result: String,
    pub processing_time_ms: i64,
    pub pod_id: String,
}

/// Outcome of a GetResource call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData {
    pub resource_data: String,
    pub metadata: String,
    pub pod_id: String,
}

/// Outcome of a HealthCheck call.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: ServingStatus,
    pub pod_id: String,
}
