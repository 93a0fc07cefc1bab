//! Per-process GPU usage from engine busy counters

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::platform::GpuEngineSource;
use crate::telemetry::rate::{sanitize_percent, RateTracker};
use crate::telemetry::throttle::Throttled;

/// Engine instances come and go with GPU clients; enumerate them on this
/// period instead of every read.
const INSTANCE_REFRESH: Duration = Duration::from_secs(3);
const READ_THROTTLE: Duration = Duration::from_secs(1);
const FAILURE_LIMIT: u32 = 5;

/// One process's GPU share, in percent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessGpu {
    pub total: f64,
    pub by_adapter: BTreeMap<String, f64>,
}

/// Extract `(pid, adapter key)` from an engine instance name such as
/// `pid_1234_luid_0000:03:00.0_eng_gfx_client_7`. The adapter key runs from
/// `luid_` up to `_eng`.
pub fn parse_instance(name: &str) -> Option<(u32, String)> {
    let lower = name.to_ascii_lowercase();
    let start = lower.find("pid_")? + 4;
    let digits: String = lower[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    let pid = digits.parse().ok()?;

    let adapter = match lower.find("luid_") {
        Some(at) => {
            let end = lower[at..].find("_eng").map_or(name.len(), |e| at + e);
            name[at..end].to_string()
        }
        None => "unknown".to_string(),
    };
    Some((pid, adapter))
}

/// Sum per-engine percentages per process, clamp the total to [0, 100] and
/// rescale the per-adapter split so it adds up to the clamped total.
pub fn aggregate(per_instance: &[(String, f64)]) -> HashMap<u32, ProcessGpu> {
    let mut out: HashMap<u32, ProcessGpu> = HashMap::new();
    for (name, value) in per_instance {
        if !value.is_finite() {
            continue;
        }
        let Some((pid, adapter)) = parse_instance(name) else {
            continue;
        };
        let entry = out.entry(pid).or_default();
        entry.total += value;
        *entry.by_adapter.entry(adapter).or_insert(0.0) += value;
    }

    for gpu in out.values_mut() {
        gpu.total = sanitize_percent(gpu.total);
        let sum: f64 = gpu.by_adapter.values().sum();
        if sum > 0.0 {
            let scale = gpu.total / sum;
            for share in gpu.by_adapter.values_mut() {
                *share *= scale;
            }
        }
    }
    out
}

pub struct GpuUsageSampler {
    source: Box<dyn GpuEngineSource>,
    instances: Throttled<Arc<Vec<String>>>,
    busy: RateTracker<String>,
    results: Throttled<Arc<HashMap<u32, ProcessGpu>>>,
    failures: u32,
    disabled: bool,
}

impl GpuUsageSampler {
    pub fn new(source: Box<dyn GpuEngineSource>) -> Self {
        Self {
            source,
            instances: Throttled::new(INSTANCE_REFRESH),
            busy: RateTracker::new(),
            results: Throttled::new(READ_THROTTLE),
            failures: 0,
            disabled: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Usage per pid. Callers more frequent than once a second get the
    /// cached result.
    pub fn sample(&mut self, now: Instant) -> Arc<HashMap<u32, ProcessGpu>> {
        if self.disabled {
            return Arc::new(HashMap::new());
        }
        if !self.results.is_stale(now) {
            if let Some(cached) = self.results.cached() {
                return Arc::clone(cached);
            }
        }
        let fresh = Arc::new(self.read(now));
        self.results.get_or_refresh(now, || Arc::clone(&fresh))
    }

    fn read(&mut self, now: Instant) -> HashMap<u32, ProcessGpu> {
        let instances = if self.instances.is_stale(now) {
            let listed = match self.source.instances() {
                Ok(list) => list,
                Err(err) => {
                    self.record_failure(&err);
                    return HashMap::new();
                }
            };
            let live: HashSet<&String> = listed.iter().collect();
            self.busy.retain(|name| live.contains(name));
            let listed = Arc::new(listed);
            self.instances.get_or_refresh(now, || Arc::clone(&listed))
        } else {
            self.instances.cached().cloned().unwrap_or_default()
        };
        if instances.is_empty() {
            return HashMap::new();
        }

        let values = match self.source.read(&instances) {
            Ok(values) => values,
            Err(err) => {
                self.record_failure(&err);
                return HashMap::new();
            }
        };
        self.failures = 0;

        // Busy nanoseconds per second of wall time, as a percentage.
        let per_instance: Vec<(String, f64)> = values
            .into_iter()
            .map(|(name, ns)| {
                let ns_per_sec = self.busy.observe(name.clone(), ns as f64, now);
                (name, ns_per_sec / 1e7)
            })
            .collect();
        aggregate(&per_instance)
    }

    fn record_failure(&mut self, err: &crate::error::TelemetryError) {
        self.failures += 1;
        if err.is_permanent() || self.failures >= FAILURE_LIMIT {
            tracing::info!(error = %err, "per-process GPU usage unavailable");
            self.disabled = true;
        } else {
            tracing::debug!(error = %err, failures = self.failures, "GPU engine read failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TelemetryError, TelemetryResult};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_instance() {
        assert_eq!(
            parse_instance("pid_1234_luid_0x00000000_0x0000D1A5_phys_0_eng_0_engtype_3D"),
            Some((1234, "luid_0x00000000_0x0000D1A5_phys_0".to_string()))
        );
        assert_eq!(
            parse_instance("pid_77_luid_0000:03:00.0_eng_gfx_client_5"),
            Some((77, "luid_0000:03:00.0".to_string()))
        );
        assert_eq!(parse_instance("pid_9_eng_gfx"), Some((9, "unknown".to_string())));
        assert_eq!(parse_instance("luid_0x1_eng_0"), None);
    }

    #[test]
    fn test_aggregate_clamps_and_rescales() {
        let result = aggregate(&[
            ("pid_1_luid_a_eng_gfx".to_string(), 90.0),
            ("pid_1_luid_b_eng_gfx".to_string(), 60.0),
            ("pid_2_luid_a_eng_copy".to_string(), 10.0),
            ("pid_2_luid_a_eng_gfx".to_string(), f64::NAN),
        ]);
        let p1 = &result[&1];
        assert_eq!(p1.total, 100.0);
        assert!((p1.by_adapter["luid_a"] - 60.0).abs() < 1e-9);
        assert!((p1.by_adapter["luid_b"] - 40.0).abs() < 1e-9);
        assert_eq!(result[&2].total, 10.0);
    }

    struct Scripted {
        busy_ns: u64,
        fail: bool,
    }

    impl GpuEngineSource for Scripted {
        fn instances(&mut self) -> TelemetryResult<Vec<String>> {
            if self.fail {
                return Err(TelemetryError::Unavailable("drm".into()));
            }
            Ok(vec!["pid_5_luid_card0_eng_gfx_client_1".to_string()])
        }

        fn read(&mut self, instances: &[String]) -> TelemetryResult<Vec<(String, u64)>> {
            self.busy_ns += 250_000_000;
            Ok(instances.iter().map(|i| (i.clone(), self.busy_ns)).collect())
        }
    }

    #[test]
    fn test_sampler_rates_and_throttles() {
        let mut sampler = GpuUsageSampler::new(Box::new(Scripted {
            busy_ns: 0,
            fail: false,
        }));
        let t0 = Instant::now();
        // First read establishes the baseline.
        assert_eq!(sampler.sample(t0)[&5].total, 0.0);
        // Within the throttle window the cache is served.
        assert_eq!(sampler.sample(t0 + Duration::from_millis(300))[&5].total, 0.0);
        // 250ms busy per 1s wall is 25%.
        let later = sampler.sample(t0 + Duration::from_secs(1));
        assert!((later[&5].total - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_source_disables() {
        let mut sampler = GpuUsageSampler::new(Box::new(Scripted {
            busy_ns: 0,
            fail: true,
        }));
        assert!(sampler.sample(Instant::now()).is_empty());
        assert!(sampler.is_disabled());
    }
}
