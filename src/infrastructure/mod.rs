//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod shutdown;
pub mod system_sampler;

pub use shutdown::{shutdown_signal, CallGuard, ShutdownController};
pub use system_sampler::{SystemSampler, DEFAULT_SAMPLE_PERIOD};
