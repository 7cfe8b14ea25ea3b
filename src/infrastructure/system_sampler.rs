//! System Metric Sampler
//!
//! Periodically refreshes the pod's memory gauge and synthetic CPU counter.

use crate::domain::ports::{MemorySource, MetricsRecorder};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default sampling period.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(5);

/// Background sampler for the container-level metrics.
///
/// The CPU figure is synthetic: each tick grows an accumulator by roughly a
/// tenth of a second and adds the whole accumulator to the counter, so the
/// counter rises faster with every tick.
pub struct SystemSampler {
    recorder: Arc<dyn MetricsRecorder>,
    memory: Arc<dyn MemorySource>,
    period: Duration,
    cpu_accumulator: f64,
}

impl SystemSampler {
    pub fn new(recorder: Arc<dyn MetricsRecorder>, memory: Arc<dyn MemorySource>) -> Self {
        Self {
            recorder,
            memory,
            period: DEFAULT_SAMPLE_PERIOD,
            cpu_accumulator: 0.0,
        }
    }

    /// Override the sampling period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cpu_accumulator(&self) -> f64 {
        self.cpu_accumulator
    }

    /// Accumulator growth for a tick taken at sub-second `now_nanos`.
    pub fn cpu_increment(now_nanos: u32) -> f64 {
        0.1 + f64::from(now_nanos % 100) / 1000.0
    }

    /// Take one sample now.
    pub fn tick(&mut self) {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        self.tick_at(now_nanos);
    }

    fn tick_at(&mut self, now_nanos: u32) {
        match self.memory.allocated_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.recorder.set_working_set_bytes(bytes) {
                    tracing::warn!("failed to record working set: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to read memory usage: {}", e),
        }

        self.cpu_accumulator += Self::cpu_increment(now_nanos);
        if let Err(e) = self.recorder.add_cpu_seconds(self.cpu_accumulator) {
            tracing::warn!("failed to record cpu usage: {}", e);
        }
    }

    /// Sample every period until `stop` resolves.
    ///
    /// The first sample is taken one period after start; ticks missed while
    /// the runtime was busy are skipped, not replayed.
    pub async fn run<F>(mut self, stop: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(stop);

        let start = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(start, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("system sampler started (period {:?})", self.period);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("system sampler stopped");
                    return;
                }
                _ = interval.tick() => self.tick(),
            }
        }
    }

    /// Start the sampler on its own task.
    pub fn spawn<F>(self, stop: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(stop))
    }
}
