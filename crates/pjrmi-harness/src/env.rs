//! Deterministic-enough [`Environment`] for tests.
//!
//! `pjrmi-client`'s background threads (drop flusher, SHM cleaner) only
//! ever call [`Environment::sleep`] to pace their loop — never `now()`
//! for real deadline logic (that's measured against the OS clock
//! directly, since file mtimes are an OS property no `Environment` can
//! virtualize; see `pjrmi-client::shm`). Scaling `sleep` down is
//! therefore enough to make their 1-second ticks converge in
//! milliseconds without needing a real virtual clock. Randomness uses a
//! seeded `ChaCha8Rng` so a failing test's connection-id / self-id
//! sequence reproduces exactly.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use pjrmi_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Test [`Environment`]: sleeps compressed by a fixed factor, randomness
/// seeded for reproducibility.
#[derive(Clone)]
pub struct TestEnvironment {
    speedup: u32,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl TestEnvironment {
    /// A test environment seeded from `seed`, ticking 50x faster than
    /// real time.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_speedup(seed, 50)
    }

    /// As [`Self::new`], with an explicit sleep compression factor.
    #[must_use]
    pub fn with_speedup(seed: u64, speedup: u32) -> Self {
        Self { speedup: speedup.max(1), rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnvironment {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep((duration / self.speedup).max(Duration::from_millis(1)));
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        #[allow(clippy::unwrap_used)]
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_produces_the_same_sequence() {
        let a = TestEnvironment::new(7);
        let b = TestEnvironment::new(7);
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn sleep_is_compressed() {
        let env = TestEnvironment::with_speedup(1, 1000);
        let start = Instant::now();
        env.sleep(Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
