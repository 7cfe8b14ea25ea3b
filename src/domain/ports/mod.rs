mod jitter_source;
mod memory_source;
mod metrics_recorder;

pub use jitter_source::JitterSource;
pub use memory_source::MemorySource;
pub use metrics_recorder::MetricsRecorder;
