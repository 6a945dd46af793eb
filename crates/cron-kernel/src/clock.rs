//! Clock abstraction (injectable for testing).
//!
//! Mirrors the pattern used throughout this codebase for timing-sensitive
//! subsystems: never call `SystemTime::now()` directly from scheduling
//! logic, inject a [`Clock`] instead so tests can pin the current time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Provides the current wall-clock time as seconds since the Unix epoch.
///
/// All cron timestamps are floating-point seconds (see `cron.list`'s
/// response shape), so the clock reports the same unit rather than
/// milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time as fractional seconds since the Unix epoch.
    fn now(&self) -> f64;
}

/// The default [`Clock`] implementation backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A [`Clock`] pinned to a caller-controlled instant, for deterministic
/// tests of anything that reads "now" — cronodate's `remaining`, the
/// manager's sync epsilon, stats timestamps. Behind the `testing`
/// feature so non-test builds never link it.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Stores the pinned time as bits of an `f64` so the clock can be
    /// `Send + Sync` without a mutex.
    #[derive(Debug, Default)]
    pub struct MockClock {
        now: AtomicU64,
    }

    impl MockClock {
        pub fn new(now: f64) -> Self {
            MockClock {
                now: AtomicU64::new(now.to_bits()),
            }
        }

        pub fn set(&self, now: f64) {
            self.now.store(now.to_bits(), Ordering::SeqCst);
        }

        pub fn advance(&self, seconds: f64) {
            self.set(self.get() + seconds);
        }

        pub fn get(&self) -> f64 {
            f64::from_bits(self.now.load(Ordering::SeqCst))
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> f64 {
            self.get()
        }
    }
}
