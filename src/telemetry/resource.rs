//! Lifecycle of expensive telemetry resources
//!
//! Every resource family (sensor tree, disk idle counters, per-core counters,
//! trace session) starts `Uninitialized` and is only opened on first use.
//! Repeated failures disable it for good so retry cost never scales with the
//! tick rate.

use std::fmt;

use crate::error::{TelemetryError, TelemetryResult};

/// Consecutive read failures tolerated before a resource is disabled.
pub const DEFAULT_FAILURE_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Uninitialized,
    Opening,
    Ready,
    Degraded { failures: u32 },
    Disabled,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Opening => write!(f, "opening"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded { failures } => write!(f, "degraded ({} failures)", failures),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// A source that must be opened before it can be read.
pub trait CounterSource: Send {
    type Reading;

    fn open(&mut self) -> TelemetryResult<()>;
    fn read(&mut self) -> TelemetryResult<Self::Reading>;
}

impl<S: CounterSource + ?Sized> CounterSource for Box<S> {
    type Reading = S::Reading;

    fn open(&mut self) -> TelemetryResult<()> {
        (**self).open()
    }

    fn read(&mut self) -> TelemetryResult<Self::Reading> {
        (**self).read()
    }
}

/// Wraps a source with lazy open and disable-on-repeated-failure.
pub struct ManagedResource<S> {
    name: &'static str,
    source: S,
    state: ResourceState,
    failures: u32,
    failure_limit: u32,
}

impl<S: CounterSource> ManagedResource<S> {
    pub fn new(name: &'static str, source: S) -> Self {
        Self::with_limit(name, source, DEFAULT_FAILURE_LIMIT)
    }

    pub fn with_limit(name: &'static str, source: S, failure_limit: u32) -> Self {
        Self {
            name,
            source,
            state: ResourceState::Uninitialized,
            failures: 0,
            failure_limit: failure_limit.max(1),
        }
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_disabled(&self) -> bool {
        self.state == ResourceState::Disabled
    }

    /// Read the resource, opening it on first use. Returns `None` when the
    /// resource is disabled or this read failed.
    pub fn read(&mut self) -> Option<S::Reading> {
        self.try_read().ok()
    }

    pub fn try_read(&mut self) -> TelemetryResult<S::Reading> {
        match self.state {
            ResourceState::Disabled => {
                return Err(TelemetryError::Disabled(self.name.to_string()));
            }
            ResourceState::Uninitialized => {
                self.state = ResourceState::Opening;
                if let Err(err) = self.source.open() {
                    self.record_failure(&err, true);
                    return Err(err);
                }
                tracing::info!(resource = self.name, "telemetry resource ready");
                self.state = ResourceState::Ready;
            }
            _ => {}
        }

        match self.source.read() {
            Ok(reading) => {
                if self.failures > 0 {
                    tracing::debug!(resource = self.name, failures = self.failures, "telemetry resource recovered");
                }
                self.failures = 0;
                self.state = ResourceState::Ready;
                Ok(reading)
            }
            Err(err) => {
                self.record_failure(&err, false);
                Err(err)
            }
        }
    }

    fn record_failure(&mut self, err: &TelemetryError, opening: bool) {
        if err.is_permanent() {
            tracing::info!(resource = self.name, error = %err, "telemetry resource unavailable");
            self.state = ResourceState::Disabled;
            return;
        }

        self.failures += 1;
        let failures = self.failures;
        if failures >= self.failure_limit {
            tracing::warn!(
                resource = self.name,
                failures,
                error = %err,
                "disabling telemetry resource after repeated failures"
            );
            self.state = ResourceState::Disabled;
        } else {
            tracing::debug!(resource = self.name, failures, error = %err, "telemetry read failed");
            self.state = if opening {
                // Next use retries the open.
                ResourceState::Uninitialized
            } else {
                ResourceState::Degraded { failures }
            };
        }
    }

    /// Give a disabled resource another chance (e.g. after elevation).
    pub fn reset(&mut self) {
        self.failures = 0;
        self.state = ResourceState::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        open_result: Option<fn() -> TelemetryError>,
        reads: Vec<TelemetryResult<u32>>,
        opens: u32,
    }

    impl CounterSource for Flaky {
        type Reading = u32;

        fn open(&mut self) -> TelemetryResult<()> {
            self.opens += 1;
            match self.open_result {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        fn read(&mut self) -> TelemetryResult<u32> {
            if self.reads.is_empty() {
                Ok(0)
            } else {
                self.reads.remove(0)
            }
        }
    }

    fn unavailable() -> TelemetryError {
        TelemetryError::Unavailable("rapl".into())
    }

    fn transient() -> TelemetryError {
        TelemetryError::parse("counter", "garbage")
    }

    #[test]
    fn test_lazy_open_then_ready() {
        let mut res = ManagedResource::new(
            "cpu",
            Flaky {
                open_result: None,
                reads: vec![Ok(7)],
                opens: 0,
            },
        );
        assert_eq!(res.state(), ResourceState::Uninitialized);
        assert_eq!(res.read(), Some(7));
        assert_eq!(res.state(), ResourceState::Ready);
        res.read();
        assert_eq!(res.source().opens, 1);
    }

    #[test]
    fn test_unavailable_source_is_disabled_immediately() {
        let mut res = ManagedResource::new(
            "rapl",
            Flaky {
                open_result: Some(unavailable as fn() -> TelemetryError),
                reads: vec![],
                opens: 0,
            },
        );
        assert_eq!(res.read(), None);
        assert_eq!(res.state(), ResourceState::Disabled);
        assert_eq!(res.read(), None);
        assert_eq!(res.source().opens, 1);
    }

    #[test]
    fn test_repeated_failures_disable() {
        let mut res = ManagedResource::with_limit(
            "diskstats",
            Flaky {
                open_result: None,
                reads: vec![Err(transient()), Err(transient()), Err(transient()), Ok(1)],
                opens: 0,
            },
            3,
        );
        assert_eq!(res.read(), None);
        assert_eq!(res.state(), ResourceState::Degraded { failures: 1 });
        assert_eq!(res.read(), None);
        assert_eq!(res.read(), None);
        assert_eq!(res.state(), ResourceState::Disabled);
        // The pending Ok(1) is never read once disabled.
        assert_eq!(res.read(), None);
    }

    #[test]
    fn test_recovery_resets_failure_count() {
        let mut res = ManagedResource::with_limit(
            "percore",
            Flaky {
                open_result: None,
                reads: vec![Err(transient()), Ok(3), Err(transient())],
                opens: 0,
            },
            2,
        );
        res.read();
        assert_eq!(res.read(), Some(3));
        assert_eq!(res.state(), ResourceState::Ready);
        res.read();
        assert_eq!(res.state(), ResourceState::Degraded { failures: 1 });
    }
}
