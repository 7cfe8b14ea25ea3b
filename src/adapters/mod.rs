//! Adapters Layer
//!
//! Inbound adapters drive the application (gRPC, HTTP); outbound adapters
//! implement the domain ports (metrics, memory, jitter).

pub mod inbound;
pub mod outbound;
