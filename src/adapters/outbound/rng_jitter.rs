//! RNG Jitter Source
//!
//! Implements JitterSource with a seeded `StdRng`.

use crate::domain::ports::JitterSource;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared pseudo-random jitter.
///
/// Production seeds from wall time; tests pass a fixed seed for
/// reproducible delays.
pub struct StdRngJitter {
    rng: Mutex<StdRng>,
}

impl StdRngJitter {
    /// Seed from the current wall-clock time.
    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::seeded(seed)
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for StdRngJitter {
    fn jitter_ms(&self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..upper)
    }
}
