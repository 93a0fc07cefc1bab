//! Rates from monotonic counters

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Replace NaN and infinities with zero.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Clamp a percentage into `[0, 100]`, mapping non-finite input to zero.
pub fn sanitize_percent(value: f64) -> f64 {
    sanitize(value).clamp(0.0, 100.0)
}

/// Per-second rate of a monotonically increasing counter.
///
/// A zero or negative elapsed time yields 0, and so does a counter that went
/// backwards (process restarted, instance replaced). The result is always
/// finite and non-negative.
pub fn rate(current: f64, previous: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let current = sanitize(current);
    let previous = sanitize(previous);
    let delta = (current - previous).max(0.0);
    sanitize(delta / secs)
}

/// One step of an exponential moving average.
pub fn ema(previous: f64, current: f64, alpha: f64) -> f64 {
    sanitize(previous * (1.0 - alpha) + current * alpha)
}

/// Last observation of one counter instance.
#[derive(Debug, Clone, Copy)]
pub struct RateState {
    pub last_raw: f64,
    pub last_at: Instant,
}

/// Tracks a family of counters keyed by instance (drive, pid, adapter engine).
#[derive(Debug)]
pub struct RateTracker<K> {
    states: HashMap<K, RateState>,
}

impl<K: Hash + Eq> Default for RateTracker<K> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> RateTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `raw` for `key` and return the rate since the previous
    /// observation. The first sighting of a key has no baseline and yields 0.
    pub fn observe(&mut self, key: K, raw: f64, now: Instant) -> f64 {
        let next = RateState {
            last_raw: raw,
            last_at: now,
        };
        match self.states.insert(key, next) {
            Some(prev) => rate(raw, prev.last_raw, now.saturating_duration_since(prev.last_at)),
            None => 0.0,
        }
    }

    pub fn last(&self, key: &K) -> Option<&RateState> {
        self.states.get(key)
    }

    /// Drop instances that no longer exist.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.states.retain(|k, _| keep(k));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_is_never_negative() {
        let cases = [
            (0.0, 0.0, 1.0),
            (10.0, 5.0, 0.5),
            (5.0, 10.0, 2.0),
            (f64::NAN, 1.0, 1.0),
            (f64::INFINITY, 0.0, 1.0),
            (1e18, 0.0, 1e-9),
        ];
        for (cur, prev, secs) in cases {
            let r = rate(cur, prev, Duration::from_secs_f64(secs));
            assert!(r >= 0.0 && r.is_finite(), "rate({cur}, {prev}, {secs}) = {r}");
        }
    }

    #[test]
    fn test_zero_elapsed_yields_zero() {
        assert_eq!(rate(100.0, 0.0, Duration::ZERO), 0.0);
        assert_eq!(rate(0.0, 100.0, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        assert_eq!(rate(5.0, 100.0, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_rate_per_second() {
        assert_eq!(rate(3000.0, 1000.0, Duration::from_secs(2)), 1000.0);
    }

    #[test]
    fn test_tracker_first_sighting_has_no_rate() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        assert_eq!(tracker.observe("sda", 500.0, t0), 0.0);
        let r = tracker.observe("sda", 1500.0, t0 + Duration::from_secs(1));
        assert_eq!(r, 1000.0);
    }

    #[test]
    fn test_tracker_prunes_vanished_instances() {
        let mut tracker = RateTracker::new();
        let now = Instant::now();
        tracker.observe(1u32, 1.0, now);
        tracker.observe(2u32, 1.0, now);
        tracker.retain(|pid| *pid != 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.last(&2).is_none());
    }

    #[test]
    fn test_ema_moves_toward_current() {
        let next = ema(10.0, 20.0, 0.35);
        assert!((next - 13.5).abs() < 1e-9);
    }

    #[test]
    fn test_sanitize_percent() {
        assert_eq!(sanitize_percent(f64::NAN), 0.0);
        assert_eq!(sanitize_percent(-3.0), 0.0);
        assert_eq!(sanitize_percent(140.0), 100.0);
        assert_eq!(sanitize_percent(42.5), 42.5);
    }
}
