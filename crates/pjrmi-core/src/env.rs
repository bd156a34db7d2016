//! Environment abstraction for deterministic testing.
//!
//! Decouples the connection state machine and background threads (drop
//! flusher, SHM cleaner, worker pool) from system resources (time,
//! randomness). Production code blocks real OS threads on real time;
//! `pjrmi-harness` substitutes a virtual clock and seeded RNG so the same
//! state-machine code runs deterministically under test.

use std::time::Duration;

/// Abstract environment providing time and randomness to blocking,
/// thread-based code.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; a test environment
    /// may use a virtual clock advanced explicitly by the test driver.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;

    /// Blocks the calling thread for `duration`. Used only by background
    /// threads (drop flusher, SHM cleaner); the correlator's waits are
    /// condition-variable waits, not sleeps, since they need to wake early
    /// when a response arrives.
    fn sleep(&self, duration: Duration);

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// This is a convenience method for common use cases like generating
    /// the per-session thread-id XOR constant (spec.md §3: "local identity
    /// XOR'd with a per-session random constant to avoid collisions across
    /// processes").
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `i64` self-identifier for the handshake.
    fn random_i64(&self) -> i64 {
        self.random_u64() as i64
    }
}

/// Production environment: real monotonic clock, real thread sleeps, OS
/// entropy via [`rand`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}
