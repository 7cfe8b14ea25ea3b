//! Request Simulator
//!
//! Turns the pod's characteristics into synthetic CPU work and latency.
//! Transport agnostic: the gRPC adapter maps these outcomes onto messages.

use crate::domain::entities::{HealthReport, PodProfile, ProcessedData, ResourceData, ServingStatus};
use crate::domain::ports::JitterSource;
use crate::domain::services::call_context::{CallContext, SimulationError};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

pub const MIN_COMPLEXITY: i32 = 1;
pub const MAX_COMPLEXITY: i32 = 10;
/// Cap on the processed string, in characters.
pub const MAX_PROCESSED_CHARS: usize = 1000;
const PROCESS_JITTER_MS: u64 = 50;
const RESOURCE_JITTER_MS: u64 = 30;
const SLOW_OPERATION_MULTIPLIER: u64 = 3;
const ITERATIONS_PER_COMPLEXITY: f64 = 1000.0;
const DELAY_MS_PER_COMPLEXITY: f64 = 10.0;

/// Latency generator behind the three RPCs.
///
/// Delays are built from:
/// 1. `latency_base` from the pod profile
/// 2. uniform jitter from the injected [`JitterSource`]
/// 3. a CPU term scaled by `cpu_factor` (ProcessData only)
pub struct RequestSimulator {
    profile: Arc<PodProfile>,
    jitter: Arc<dyn JitterSource>,
}

impl RequestSimulator {
    pub fn new(profile: Arc<PodProfile>, jitter: Arc<dyn JitterSource>) -> Self {
        Self { profile, jitter }
    }

    pub fn profile(&self) -> &PodProfile {
        &self.profile
    }

    /// Clamp a requested complexity to `[1, 10]`.
    pub fn clamp_complexity(complexity: i32) -> i32 {
        complexity.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
    }

    /// Number of loop iterations for a clamped complexity.
    pub fn iterations(&self, complexity: i32) -> u64 {
        (complexity as f64 * ITERATIONS_PER_COMPLEXITY * self.profile.cpu_factor).max(0.0) as u64
    }

    /// Burn CPU and build the ProcessData result string.
    pub fn simulate_cpu_work(&self, data: &str, complexity: i32) -> String {
        let iterations = self.iterations(complexity);

        let mut r: f64 = 1.0;
        for i in 0..iterations {
            r = r.sin() + (i as f64).cos();
        }

        let mut processed = data.to_uppercase();
        for i in 0..complexity {
            let _ = write!(processed, "-{}-{:.2}", i, r);
            if processed.chars().count() > MAX_PROCESSED_CHARS {
                processed = processed.chars().take(MAX_PROCESSED_CHARS).collect();
            }
        }

        format!(
            "Processed[{}] by pod {} (complexity={}, iterations={}, result={:.2})",
            processed, self.profile.pod_id, complexity, iterations, r
        )
    }

    /// Delay for ProcessData: base + jitter + CPU term.
    pub fn process_delay(&self, complexity: i32) -> Duration {
        let cpu_ms = (complexity as f64 * DELAY_MS_PER_COMPLEXITY * self.profile.cpu_factor).max(0.0) as u64;
        let jitter_ms = self.jitter.jitter_ms(PROCESS_JITTER_MS);
        Duration::from_millis(
            self.profile
                .latency_base_ms
                .saturating_add(jitter_ms)
                .saturating_add(cpu_ms),
        )
    }

    /// Delay for GetResource: half the base, tripled when slow, plus jitter.
    ///
    /// Saturates at `u64::MAX` milliseconds for absurd bases.
    pub fn resource_delay(&self, simulate_slow: bool) -> Duration {
        let mut base_ms = self.profile.latency_base_ms / 2;
        if simulate_slow {
            base_ms = base_ms.saturating_mul(SLOW_OPERATION_MULTIPLIER);
        }
        let jitter_ms = self.jitter.jitter_ms(RESOURCE_JITTER_MS);
        Duration::from_millis(base_ms.saturating_add(jitter_ms))
    }

    /// Simulate CPU-bound processing of `data`.
    pub async fn process_data(
        &self,
        ctx: &CallContext,
        data: &str,
        complexity: i32,
    ) -> Result<ProcessedData, SimulationError> {
        let start = Instant::now();
        let complexity = Self::clamp_complexity(complexity);

        let result = self.simulate_cpu_work(data, complexity);
        ctx.sleep(self.process_delay(complexity)).await?;

        Ok(ProcessedData {
            result,
            processing_time_ms: start.elapsed().as_millis() as i64,
            pod_id: self.profile.pod_id.clone(),
        })
    }

    /// Simulate an I/O-bound resource lookup.
    pub async fn get_resource(
        &self,
        ctx: &CallContext,
        resource_id: &str,
        simulate_slow: bool,
    ) -> Result<ResourceData, SimulationError> {
        let start = Instant::now();

        ctx.sleep(self.resource_delay(simulate_slow)).await?;

        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(ResourceData {
            resource_data: format!("Resource-{}-Data-{}", resource_id, unix_secs),
            metadata: format!("Processed by {} in {:?}", self.profile.pod_id, start.elapsed()),
            pod_id: self.profile.pod_id.clone(),
        })
    }

    /// Always serving.
    pub fn health_check(&self) -> HealthReport {
        HealthReport {
            status: ServingStatus::Serving,
            pod_id: self.profile.pod_id.clone(),
        }
    }
}
