//! Read throttling and non-blocking background refresh

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serves a cached value until it is older than `interval`.
#[derive(Debug)]
pub struct Throttled<T> {
    interval: Duration,
    cached: Option<(Instant, T)>,
}

impl<T: Clone> Throttled<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cached: None,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match &self.cached {
            Some((at, _)) => now.saturating_duration_since(*at) >= self.interval,
            None => true,
        }
    }

    pub fn get_or_refresh(&mut self, now: Instant, refresh: impl FnOnce() -> T) -> T {
        if self.is_stale(now) {
            let value = refresh();
            self.cached = Some((now, value.clone()));
            return value;
        }
        match &self.cached {
            Some((_, value)) => value.clone(),
            None => refresh(),
        }
    }

    pub fn cached(&self) -> Option<&T> {
        self.cached.as_ref().map(|(_, v)| v)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

struct RefreshInner<T> {
    interval: Duration,
    in_flight: AtomicBool,
    cache: Mutex<(Option<Instant>, T)>,
}

/// Cached value refreshed on a background thread when stale.
///
/// Callers always get the last cached value immediately; at most one refresh
/// runs at a time, guarded by a compare-and-swap on the in-flight flag.
pub struct BackgroundRefresh<T> {
    inner: Arc<RefreshInner<T>>,
}

impl<T> Clone for BackgroundRefresh<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> BackgroundRefresh<T> {
    pub fn new(interval: Duration, initial: T) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                interval,
                in_flight: AtomicBool::new(false),
                cache: Mutex::new((None, initial)),
            }),
        }
    }

    /// Return the cached value, kicking a background refresh if it is stale.
    pub fn get_or_kick<F>(&self, refresh: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (stale, value) = {
            let cache = self.inner.cache.lock();
            let stale = match cache.0 {
                Some(at) => at.elapsed() >= self.inner.interval,
                None => true,
            };
            (stale, cache.1.clone())
        };

        if stale
            && self
                .inner
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name("vigil-refresh".into())
                .spawn(move || {
                    let fresh = refresh();
                    *inner.cache.lock() = (Some(Instant::now()), fresh);
                    inner.in_flight.store(false, Ordering::Release);
                });
            if let Err(err) = spawned {
                tracing::debug!(error = %err, "failed to spawn background refresh");
                self.inner.in_flight.store(false, Ordering::Release);
            }
        }

        value
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn cached(&self) -> T {
        self.inner.cache.lock().1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_throttled_serves_cache_within_interval() {
        let mut t = Throttled::new(Duration::from_secs(1));
        let t0 = Instant::now();
        let mut calls = 0;
        let mut read = |v: u32| {
            calls += 1;
            v
        };
        assert_eq!(t.get_or_refresh(t0, || read(1)), 1);
        assert_eq!(t.get_or_refresh(t0 + Duration::from_millis(500), || read(2)), 1);
        assert_eq!(t.get_or_refresh(t0 + Duration::from_millis(1000), || read(3)), 3);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_background_refresh_never_blocks_and_runs_once() {
        let refresh = BackgroundRefresh::new(Duration::from_secs(60), 0u32);
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let r = Arc::clone(&runs);
        // First call kicks a refresh that blocks until released.
        assert_eq!(
            refresh.get_or_kick(move || {
                let _ = release_rx.recv();
                r.fetch_add(1, Ordering::SeqCst);
                42
            }),
            0
        );

        // While the first refresh is in flight, further kicks are no-ops.
        let r = Arc::clone(&runs);
        assert_eq!(
            refresh.get_or_kick(move || {
                r.fetch_add(1, Ordering::SeqCst);
                99
            }),
            0
        );

        release_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while refresh.is_refreshing() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(refresh.cached(), 42);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
