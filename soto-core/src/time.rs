//! Monotonic time primitives (§4.A).
//!
//! Every suspension point in the pool, the cancellable wrapper, and the
//! sampler goes through this module. Wall-clock time is never consulted:
//! all arithmetic happens against [`std::time::Instant`], which the
//! platform already guarantees is monotonic and immune to clock steps.

use std::time::{Duration, Instant};

/// A point in monotonic time, relative to an arbitrary process-local epoch.
///
/// `MonoTime` is a thin wrapper around [`Instant`]; it exists so the rest of
/// the crate names a type instead of reaching for `std::time::Instant`
/// directly, and so the nanosecond conversions below have one obvious home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonoTime(Instant);

impl MonoTime {
    /// The current monotonic instant.
    pub fn now() -> Self {
        MonoTime(Instant::now())
    }

    /// `self + duration`.
    pub fn add(self, duration: Duration) -> Self {
        MonoTime(self.0 + duration)
    }

    /// Ordering of two instants. Exposed as a named operation (rather than
    /// relying solely on `Ord`) because the core's call sites read as
    /// `time::compare(a, b)` rather than `a.cmp(&b)`.
    pub fn compare(self, other: Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }

    /// Duration elapsed since an earlier instant. Saturates to zero if
    /// `earlier` is actually later than `self`.
    pub fn since(self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Convert a nanosecond count into a [`Duration`], normalizing overflow into
/// the seconds field the way [`Duration`] already does internally — callers
/// never need to pre-normalize a nanosecond field into `[0, 1e9)` by hand.
pub fn from_nanoseconds(nanos: u64) -> Duration {
    Duration::from_nanos(nanos)
}

/// Convert a [`Duration`] back into a flat nanosecond count.
pub fn to_nanoseconds(duration: Duration) -> u64 {
    duration.as_nanos() as u64
}

/// Block the calling thread until the given absolute deadline.
///
/// If `deadline` has already passed, this returns immediately rather than
/// sleeping a negative duration — matching `clock_nanosleep(TIMER_ABSTIME)`
/// semantics for a deadline already in the past.
pub fn sleep_until(deadline: MonoTime) {
    let now = MonoTime::now();
    if deadline.compare(now) == std::cmp::Ordering::Greater {
        std::thread::sleep(deadline.since(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let past = MonoTime::now();
        std::thread::sleep(Duration::from_millis(5));
        let started = Instant::now();
        sleep_until(past);
        assert!(started.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn sleep_until_future_deadline_waits_at_least_that_long() {
        let deadline = MonoTime::now().add(Duration::from_millis(20));
        let started = Instant::now();
        sleep_until(deadline);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn add_and_since_round_trip() {
        let t0 = MonoTime::now();
        let t1 = t0.add(Duration::from_millis(50));
        let delta = t1.since(t0);
        assert!(delta >= Duration::from_millis(50));
        assert!(delta < Duration::from_millis(60));
    }

    #[test]
    fn compare_orders_instants() {
        let t0 = MonoTime::now();
        let t1 = t0.add(Duration::from_millis(1));
        assert_eq!(t0.compare(t1), std::cmp::Ordering::Less);
        assert_eq!(t1.compare(t0), std::cmp::Ordering::Greater);
        assert_eq!(t0.compare(t0), std::cmp::Ordering::Equal);
    }

    #[test]
    fn nanosecond_round_trip() {
        let nanos = 1_500_000_000u64;
        let duration = from_nanoseconds(nanos);
        assert_eq!(duration, Duration::new(1, 500_000_000));
        assert_eq!(to_nanoseconds(duration), nanos);
    }
}
