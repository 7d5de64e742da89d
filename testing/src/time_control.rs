//! Deterministic time for idempotency tests.
//!
//! Every expiry decision reads a [`Clock`]. Handing a [`ManualClock`] to
//! [`IdempotencyCoordinator::with_clock`](lambda_idempotency::IdempotencyCoordinator::with_clock)
//! lets a test move records past their expiry or in-progress deadline instantly.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lambda_idempotency::{Clock, IdempotencyConfig, IdempotencyCoordinator, InMemoryStore};
//! use lambda_idempotency_testing::ManualClock;
//!
//! let clock = ManualClock::at_timestamp(1_700_000_000);
//! let coordinator = IdempotencyCoordinator::new(IdempotencyConfig::default(), InMemoryStore::new())
//!     .unwrap()
//!     .with_clock(Arc::new(clock.clone()));
//!
//! clock.advance(Duration::from_secs(3600));
//! assert_eq!(clock.now().timestamp(), 1_700_003_600);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lambda_idempotency::Clock;

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can keep one handle while the
/// coordinator owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Creates a clock frozen at `secs` seconds after the Unix epoch.
    ///
    /// # Panics
    ///
    /// Panics if `secs` is outside chrono's representable range.
    pub fn at_timestamp(secs: i64) -> Self {
        Self::new(
            Utc.timestamp_opt(secs, 0)
                .single()
                .expect("timestamp out of range"),
        )
    }

    /// Moves the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if `by` does not fit a chrono duration.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).expect("duration out of range");
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    /// Moves the clock to `instant`, which may lie in the past.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_timestamp(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
