//! Time source abstraction.
//!
//! The engine never reads the wall clock directly; every timestamp comes
//! from a [`Clock`] so delayed tasks and quiet windows can be driven
//! deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }

    pub fn advance_secs_f64(&self, seconds: f64) {
        self.advance(duration_from_secs_f64(seconds));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Signed seconds from `earlier` to `later`, millisecond precision.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// Longest delay a configured timing value may produce.
pub const MAX_DELAY_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Converts configured seconds into a delay clamped to `0..=MAX_DELAY_SECS`,
/// so `now + delay` cannot overflow. NaN maps to zero.
pub fn duration_from_secs_f64(seconds: f64) -> Duration {
    if seconds.is_nan() {
        return Duration::zero();
    }
    Duration::milliseconds((seconds.clamp(0.0, MAX_DELAY_SECS) * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = DateTime::parse_from_rfc3339("2026-01-30T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let clock = ManualClock::new(start);
        clock.advance_secs_f64(1.5);
        assert_eq!(seconds_between(start, clock.now()), 1.5);
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        assert_eq!(duration_from_secs_f64(-3.0), Duration::zero());
    }

    #[test]
    fn oversized_durations_clamp_to_one_year() {
        let year = Duration::days(365);
        assert_eq!(duration_from_secs_f64(1e18), year);
        assert_eq!(duration_from_secs_f64(f64::INFINITY), year);
        assert_eq!(duration_from_secs_f64(f64::NAN), Duration::zero());

        let now = Utc::now();
        assert_eq!((now + duration_from_secs_f64(1e300)) - now, year);
    }
}
