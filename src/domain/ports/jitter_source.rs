//! Jitter Source Port
//!
//! Defines the interface for random latency jitter.

/// Uniform integer jitter for simulated delays.
///
/// Injected so tests can make delays reproducible.
pub trait JitterSource: Send + Sync {
    /// A value in `[0, upper)` milliseconds. Returns 0 when `upper` is 0.
    fn jitter_ms(&self, upper: u64) -> u64;
}
