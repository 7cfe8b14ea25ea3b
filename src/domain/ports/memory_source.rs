//! Memory Source Port
//!
//! Defines the interface for reading the process's live heap size.

/// Source of the working-set memory reading.
///
/// Reads may fail transiently; the sampler logs and retries on its next tick.
pub trait MemorySource: Send + Sync {
    /// Live heap allocation in bytes.
    fn allocated_bytes(&self) -> anyhow::Result<u64>;
}
