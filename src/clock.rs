//! Clock abstraction.
//!
//! Lease expiry and queue ordering both compare against "now", so the
//! current time is injected rather than read ambiently. Production code
//! uses [`SystemClock`]; tests drive [`ManualClock`] to make expiry
//! deterministic without sleeping.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Test use.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += Duration::seconds(seconds);
    }

    /// Advance the clock by `millis`.
    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc::now());
        let t0 = clock.now_utc();
        clock.advance_secs(31);
        assert_eq!((clock.now_utc() - t0).num_seconds(), 31);
    }
}
