//! Flat per-tick process table
//!
//! CPU share comes from the delta of accumulated processor time over wall
//! time and logical processor count. The memory column follows the user's
//! metric choice. Parent pids come from a system-wide map cached for a few
//! seconds because a full walk is expensive.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::gpu::GpuUsageSampler;
use crate::config::{MemoryMetric, SettingsStore};
use crate::platform::linux::{HostRoot, LinuxGpuEngines, LinuxProcessSource};
use crate::platform::{ProcessSource, RawProcess};
use crate::telemetry::throttle::Throttled;

const PARENT_MAP_TTL: Duration = Duration::from_secs(5);

/// One process's readings for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub gpu_percent: f64,
    pub gpu_by_adapter: BTreeMap<String, f64>,
    /// 0 when unknown.
    pub parent_pid: u32,
}

/// Append `suffix` unless the name already carries it.
pub fn with_suffix(name: &str, suffix: &str) -> String {
    if suffix.is_empty() || name.to_lowercase().ends_with(&suffix.to_lowercase()) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// `100 * Δcpu / (Δwall * logical)`, clamped to [0, 100].
pub fn cpu_percent(cpu_delta: Duration, wall: Duration, logical: usize) -> f64 {
    let wall = wall.as_secs_f64();
    if wall <= 0.0 || logical == 0 {
        return 0.0;
    }
    let value = 100.0 * cpu_delta.as_secs_f64() / (wall * logical as f64);
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub struct ProcessTableSampler {
    source: Arc<dyn ProcessSource>,
    gpu: Option<GpuUsageSampler>,
    settings: Arc<SettingsStore>,
    parents: Throttled<Arc<HashMap<u32, u32>>>,
    last_cpu: HashMap<u32, Duration>,
    last_at: Option<Instant>,
}

impl ProcessTableSampler {
    pub fn new(
        source: Arc<dyn ProcessSource>,
        gpu: Option<GpuUsageSampler>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            source,
            gpu,
            settings,
            parents: Throttled::new(PARENT_MAP_TTL),
            last_cpu: HashMap::new(),
            last_at: None,
        }
    }

    pub fn linux(settings: Arc<SettingsStore>) -> Self {
        let root = HostRoot::system();
        Self::new(
            Arc::new(LinuxProcessSource::new(root.clone())),
            Some(GpuUsageSampler::new(Box::new(LinuxGpuEngines::new(root)))),
            settings,
        )
    }

    pub fn source(&self) -> Arc<dyn ProcessSource> {
        Arc::clone(&self.source)
    }

    /// The cached parent map (refreshed when older than five seconds).
    pub fn parent_map(&mut self, now: Instant) -> Arc<HashMap<u32, u32>> {
        let source = &self.source;
        self.parents.get_or_refresh(now, || match source.parent_map() {
            Ok(map) => Arc::new(map),
            Err(err) => {
                tracing::debug!(error = %err, "parent map unavailable");
                Arc::new(HashMap::new())
            }
        })
    }

    pub fn sample(&mut self) -> Vec<ProcessSnapshot> {
        self.sample_at(Instant::now())
    }

    pub fn sample_at(&mut self, now: Instant) -> Vec<ProcessSnapshot> {
        let raw = match self.source.list() {
            Ok(list) => list,
            Err(err) => {
                tracing::debug!(error = %err, "process listing failed");
                return Vec::new();
            }
        };

        let (metric, suffix, cap) = self.settings.read(|c| {
            (
                c.processes.memory_metric,
                c.processes.name_suffix.clone(),
                c.processes.max_processes,
            )
        });
        let logical = self.source.logical_processors();
        let wall = self
            .last_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        let parents = self.parent_map(now);
        let gpu = self
            .gpu
            .as_mut()
            .map(|g| g.sample(now))
            .unwrap_or_default();

        let mut seen = HashSet::with_capacity(raw.len());
        let mut out: Vec<ProcessSnapshot> = Vec::with_capacity(raw.len());
        for RawProcess {
            pid,
            name,
            cpu_time,
            working_set,
            private_bytes,
        } in raw
        {
            if !seen.insert(pid) {
                continue;
            }
            let cpu = match self.last_cpu.insert(pid, cpu_time) {
                Some(prev) => cpu_percent(cpu_time.saturating_sub(prev), wall, logical),
                None => 0.0,
            };
            let (gpu_percent, gpu_by_adapter) = gpu
                .get(&pid)
                .map(|g| (g.total, g.by_adapter.clone()))
                .unwrap_or_default();
            out.push(ProcessSnapshot {
                pid,
                name: with_suffix(&name, &suffix),
                cpu_percent: cpu,
                memory_bytes: match metric {
                    MemoryMetric::WorkingSet => working_set,
                    MemoryMetric::PrivateBytes => private_bytes,
                },
                gpu_percent,
                gpu_by_adapter,
                parent_pid: parents.get(&pid).copied().unwrap_or(0),
            });
        }

        self.last_cpu.retain(|pid, _| seen.contains(pid));
        self.last_at = Some(now);

        out.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent).then(a.pid.cmp(&b.pid)));
        out.truncate(cap);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockProcessSource;
    use pretty_assertions::assert_eq;

    fn raw(pid: u32, name: &str, cpu_ms: u64, ws: u64, private: u64) -> RawProcess {
        RawProcess {
            pid,
            name: name.to_string(),
            cpu_time: Duration::from_millis(cpu_ms),
            working_set: ws,
            private_bytes: private,
        }
    }

    #[test]
    fn test_cpu_percent_formula() {
        assert_eq!(cpu_percent(Duration::from_millis(500), Duration::from_secs(1), 2), 25.0);
        assert_eq!(cpu_percent(Duration::from_secs(1), Duration::ZERO, 4), 0.0);
        assert_eq!(cpu_percent(Duration::from_secs(10), Duration::from_secs(1), 1), 100.0);
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("chrome", ".exe"), "chrome.exe");
        assert_eq!(with_suffix("chrome.EXE", ".exe"), "chrome.EXE");
        assert_eq!(with_suffix("bash", ""), "bash");
    }

    #[test]
    fn test_sample_computes_deltas_and_memory_metric() {
        let mut source = MockProcessSource::new();
        let mut tick = 0;
        source.expect_list().returning(move || {
            tick += 1;
            Ok(if tick == 1 {
                vec![raw(10, "app", 1_000, 4096, 1024), raw(11, "idle", 0, 10, 5)]
            } else {
                vec![raw(10, "app", 1_500, 4096, 1024), raw(12, "new", 900, 1, 1)]
            })
        });
        source.expect_logical_processors().return_const(2usize);
        source
            .expect_parent_map()
            .times(1)
            .returning(|| Ok(HashMap::from([(10, 1), (12, 10)])));

        let settings = Arc::new(SettingsStore::default());
        settings.update(|c| {
            c.processes.memory_metric = MemoryMetric::PrivateBytes;
            c.processes.name_suffix = ".exe".into();
        });
        let mut sampler = ProcessTableSampler::new(Arc::new(source), None, settings);

        let t0 = Instant::now();
        let first = sampler.sample_at(t0);
        assert!(first.iter().all(|p| p.cpu_percent == 0.0));

        let second = sampler.sample_at(t0 + Duration::from_secs(1));
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].pid, 10);
        assert_eq!(second[0].name, "app.exe");
        assert_eq!(second[0].cpu_percent, 25.0);
        assert_eq!(second[0].memory_bytes, 1024);
        assert_eq!(second[0].parent_pid, 1);
        // First sighting has no baseline.
        assert_eq!(second[1].pid, 12);
        assert_eq!(second[1].cpu_percent, 0.0);
        assert_eq!(second[1].parent_pid, 10);
    }

    #[test]
    fn test_output_is_capped_by_cpu() {
        let mut source = MockProcessSource::new();
        let mut tick = 0u64;
        source.expect_list().returning(move || {
            tick += 1;
            Ok((1..=5).map(|pid| raw(pid, "p", tick * pid as u64 * 100, 0, 0)).collect())
        });
        source.expect_logical_processors().return_const(1usize);
        source.expect_parent_map().returning(|| Ok(HashMap::new()));

        let settings = Arc::new(SettingsStore::default());
        settings.update(|c| c.processes.max_processes = 2);
        let mut sampler = ProcessTableSampler::new(Arc::new(source), None, settings);
        let t0 = Instant::now();
        sampler.sample_at(t0);
        let top = sampler.sample_at(t0 + Duration::from_secs(1));
        let pids: Vec<u32> = top.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![5, 4]);
    }

    #[test]
    fn test_listing_failure_yields_empty() {
        let mut source = MockProcessSource::new();
        source
            .expect_list()
            .returning(|| Err(crate::error::TelemetryError::Unavailable("/proc".into())));
        let mut sampler =
            ProcessTableSampler::new(Arc::new(source), None, Arc::new(SettingsStore::default()));
        assert!(sampler.sample().is_empty());
    }
}
