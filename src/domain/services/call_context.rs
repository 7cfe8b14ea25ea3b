//! Call Context
//!
//! Per-call cancellation for simulated work.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors raised while simulating a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("call cancelled")]
    Cancelled,
}

/// Cancellation scope of one inbound call.
///
/// Every wait inside a handler goes through [`CallContext::sleep`] so a
/// cancelled call frees its worker instead of sleeping to completion.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
}

impl CallContext {
    /// Context cancelled together with `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Context that is never cancelled from outside.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `duration` unless the call is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), SimulationError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SimulationError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
