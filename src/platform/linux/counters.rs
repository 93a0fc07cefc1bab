//! Performance counters: /proc/stat, /proc/diskstats, NIC bytes, and the
//! stateless host queries

use std::collections::HashMap;
use std::fs;
use std::time::Instant;

use sysinfo::Networks;

use super::{entries_with_prefix, read_attr, sockets, HostRoot};
use crate::error::{read_to_string, TelemetryError, TelemetryResult};
use crate::platform::{CpuLoad, HostQueries, InterfaceCounters, ProcessIo};
use crate::telemetry::rate::sanitize_percent;
use crate::telemetry::resolver::Candidate;
use crate::telemetry::resource::CounterSource;

/// Jiffies spent in each state for one `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub busy: u64,
    pub idle: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }
}

/// Parse `cpu` lines of /proc/stat. The aggregate line comes first.
pub fn parse_proc_stat(content: &str) -> Vec<(String, CpuStat)> {
    content
        .lines()
        .filter(|l| l.starts_with("cpu"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?.to_string();
            let values: Vec<u64> = parts.filter_map(|v| v.parse().ok()).collect();
            if values.len() < 4 {
                return None;
            }
            // user nice system idle iowait irq softirq steal
            let idle = values[3] + values.get(4).copied().unwrap_or(0);
            let busy = values.iter().take(8).sum::<u64>() - idle;
            Some((name, CpuStat { busy, idle }))
        })
        .collect()
}

fn busy_percent(previous: CpuStat, current: CpuStat) -> f64 {
    let total = current.total().saturating_sub(previous.total());
    if total == 0 {
        return 0.0;
    }
    let busy = current.busy.saturating_sub(previous.busy);
    sanitize_percent(busy as f64 / total as f64 * 100.0)
}

/// Total and per-core processor load from /proc/stat deltas.
pub struct ProcStatCpu {
    root: HostRoot,
    last: Vec<(String, CpuStat)>,
}

impl ProcStatCpu {
    pub fn new(root: HostRoot) -> Self {
        Self {
            root,
            last: Vec::new(),
        }
    }

    fn sample(&self) -> TelemetryResult<Vec<(String, CpuStat)>> {
        let stats = parse_proc_stat(&read_to_string(&self.root.proc("stat"))?);
        if stats.is_empty() {
            return Err(TelemetryError::parse("/proc/stat", "no cpu lines"));
        }
        Ok(stats)
    }
}

impl CounterSource for ProcStatCpu {
    type Reading = CpuLoad;

    fn open(&mut self) -> TelemetryResult<()> {
        self.last = self.sample()?;
        Ok(())
    }

    fn read(&mut self) -> TelemetryResult<CpuLoad> {
        let current = self.sample()?;
        let previous: HashMap<&str, CpuStat> =
            self.last.iter().map(|(n, s)| (n.as_str(), *s)).collect();

        let mut load = CpuLoad::default();
        for (name, stat) in &current {
            let pct = previous
                .get(name.as_str())
                .map(|prev| busy_percent(*prev, *stat))
                .unwrap_or(0.0);
            if name == "cpu" {
                load.total = pct;
            } else {
                load.per_core.push(pct);
            }
        }
        self.last = current;
        Ok(load)
    }
}

/// Milliseconds the device was busy (field 13 of /proc/diskstats) per device.
pub fn parse_diskstats(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 13 {
                return None;
            }
            let io_ticks = parts[12].parse().ok()?;
            Some((parts[2].to_string(), io_ticks))
        })
        .collect()
}

/// Idle percent per block device: `100 - busy`, where busy is the share of
/// wall time the device had I/O in flight.
pub struct DiskIdleCounters {
    root: HostRoot,
    last: Option<(HashMap<String, u64>, Instant)>,
}

impl DiskIdleCounters {
    pub fn new(root: HostRoot) -> Self {
        Self { root, last: None }
    }

    fn sample(&self) -> TelemetryResult<HashMap<String, u64>> {
        let stats = parse_diskstats(&read_to_string(&self.root.proc("diskstats"))?);
        if stats.is_empty() {
            return Err(TelemetryError::parse("/proc/diskstats", "no devices"));
        }
        Ok(stats)
    }
}

impl CounterSource for DiskIdleCounters {
    type Reading = HashMap<String, f64>;

    fn open(&mut self) -> TelemetryResult<()> {
        self.last = Some((self.sample()?, Instant::now()));
        Ok(())
    }

    fn read(&mut self) -> TelemetryResult<HashMap<String, f64>> {
        let current = self.sample()?;
        let now = Instant::now();
        let idle = match &self.last {
            Some((previous, at)) => {
                let wall_ms = now.saturating_duration_since(*at).as_secs_f64() * 1000.0;
                current
                    .iter()
                    .map(|(dev, ticks)| {
                        let busy_ms = previous
                            .get(dev)
                            .map(|p| ticks.saturating_sub(*p) as f64)
                            .unwrap_or(0.0);
                        let busy = if wall_ms > 0.0 { busy_ms / wall_ms * 100.0 } else { 0.0 };
                        (dev.clone(), 100.0 - sanitize_percent(busy))
                    })
                    .collect()
            }
            None => current.keys().map(|d| (d.clone(), 100.0)).collect(),
        };
        self.last = Some((current, now));
        Ok(idle)
    }
}

/// Cumulative interface byte counters via sysinfo.
#[derive(Default)]
pub struct NicCounters {
    networks: Option<Networks>,
}

impl NicCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterSource for NicCounters {
    type Reading = Vec<InterfaceCounters>;

    fn open(&mut self) -> TelemetryResult<()> {
        let networks = Networks::new_with_refreshed_list();
        if networks.list().is_empty() {
            return Err(TelemetryError::Unavailable("network interfaces".into()));
        }
        self.networks = Some(networks);
        Ok(())
    }

    fn read(&mut self) -> TelemetryResult<Vec<InterfaceCounters>> {
        let networks = self
            .networks
            .as_mut()
            .ok_or_else(|| TelemetryError::Unavailable("network interfaces".into()))?;
        networks.refresh();
        let mut counters: Vec<InterfaceCounters> = networks
            .list()
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .map(|(name, data)| InterfaceCounters {
                name: name.clone(),
                received_bytes: data.total_received(),
                transmitted_bytes: data.total_transmitted(),
            })
            .collect();
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(counters)
    }
}

/// Parse "key:   value" lines from /proc/<pid>/io.
pub fn parse_proc_io(content: &str) -> (u64, u64) {
    let field = |key: &str| {
        content
            .lines()
            .find_map(|l| l.strip_prefix(key))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    };
    (field("read_bytes:"), field("write_bytes:"))
}

/// Stateless queries against the live host.
#[derive(Debug, Clone, Default)]
pub struct LinuxHost {
    root: HostRoot,
}

impl LinuxHost {
    pub fn new(root: HostRoot) -> Self {
        Self { root }
    }
}

impl HostQueries for LinuxHost {
    fn cpu_frequency_mhz(&self) -> TelemetryResult<f64> {
        let from_cpufreq = entries_with_prefix(&self.root.sys("devices/system/cpu"), "cpu")
            .into_iter()
            .filter_map(|dir| read_attr(&dir.join("cpufreq/scaling_cur_freq")))
            .filter_map(|khz| khz.parse::<f64>().ok())
            .map(|khz| khz / 1000.0)
            .fold(0.0_f64, f64::max);
        if from_cpufreq > 0.0 {
            return Ok(from_cpufreq);
        }

        let cpuinfo = read_to_string(&self.root.proc("cpuinfo"))?;
        let mhz = cpuinfo
            .lines()
            .filter(|l| l.starts_with("cpu MHz"))
            .filter_map(|l| l.split(':').nth(1)?.trim().parse::<f64>().ok())
            .fold(0.0_f64, f64::max);
        if mhz > 0.0 {
            Ok(mhz)
        } else {
            Err(TelemetryError::Unavailable("processor frequency".into()))
        }
    }

    fn thermal_zones(&self) -> TelemetryResult<Vec<Candidate>> {
        let zones: Vec<Candidate> = entries_with_prefix(&self.root.sys("class/thermal"), "thermal_zone")
            .into_iter()
            .filter_map(|dir| {
                let kind = read_attr(&dir.join("type")).unwrap_or_else(|| "thermal zone".into());
                let millis: f64 = read_attr(&dir.join("temp"))?.parse().ok()?;
                Some(Candidate::new(kind, millis / 1000.0))
            })
            .collect();
        if zones.is_empty() {
            return Err(TelemetryError::Unavailable("thermal zones".into()));
        }
        Ok(zones)
    }

    fn established_sockets(&self) -> TelemetryResult<HashMap<u32, usize>> {
        sockets::established_by_pid(&self.root)
    }

    fn process_io(&self) -> TelemetryResult<Vec<ProcessIo>> {
        let pids = self.root.pids();
        if pids.is_empty() {
            return Err(TelemetryError::Unavailable("/proc".into()));
        }
        Ok(pids
            .into_iter()
            .filter_map(|pid| {
                // Other users' io files are unreadable without privileges.
                let content = fs::read_to_string(self.root.proc(format!("{}/io", pid))).ok()?;
                let (read_bytes, write_bytes) = parse_proc_io(&content);
                Some(ProcessIo {
                    pid,
                    name: self.process_name(pid).unwrap_or_default(),
                    read_bytes,
                    write_bytes,
                })
            })
            .collect())
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        read_attr(&self.root.proc(format!("{}/comm", pid)))
    }

    fn ipv4_address(&self, interface: &str) -> Option<String> {
        let addrs = nix::ifaddrs::getifaddrs().ok()?;
        for ifaddr in addrs {
            if ifaddr.interface_name != interface {
                continue;
            }
            if let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
                return Some(sin.ip().to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::linux::fixture;
    use pretty_assertions::assert_eq;

    const STAT_A: &str = "cpu  100 0 100 800 0 0 0 0 0 0\n\
                          cpu0 50 0 50 400 0 0 0 0 0 0\n\
                          cpu1 50 0 50 400 0 0 0 0 0 0\n\
                          intr 12345\n";
    const STAT_B: &str = "cpu  200 0 200 1000 0 0 0 0 0 0\n\
                          cpu0 150 0 50 500 0 0 0 0 0 0\n\
                          cpu1 50 0 150 500 0 0 0 0 0 0\n";

    #[test]
    fn test_parse_proc_stat() {
        let stats = parse_proc_stat(STAT_A);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0], ("cpu".to_string(), CpuStat { busy: 200, idle: 800 }));
    }

    #[test]
    fn test_proc_stat_cpu_load_from_delta() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "proc/stat", STAT_A);
        let mut cpu = ProcStatCpu::new(HostRoot::at(dir.path()));
        cpu.open().unwrap();

        fixture::write(dir.path(), "proc/stat", STAT_B);
        let load = cpu.read().unwrap();
        assert_eq!(load.total, 50.0);
        assert_eq!(load.per_core, vec![50.0, 50.0]);
    }

    #[test]
    fn test_missing_proc_stat_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cpu = ProcStatCpu::new(HostRoot::at(dir.path()));
        assert!(matches!(cpu.open(), Err(TelemetryError::Unavailable(_))));
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "   8       0 sda 100 0 0 0 50 0 0 0 0 1234 0\n\
                       259       0 nvme0n1 1 2 3 4 5 6 7 8 0 99 100\n";
        let stats = parse_diskstats(content);
        assert_eq!(stats["sda"], 1234);
        assert_eq!(stats["nvme0n1"], 99);
    }

    #[test]
    fn test_disk_idle_first_read_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(
            dir.path(),
            "proc/diskstats",
            "259 0 nvme0n1 1 2 3 4 5 6 7 8 0 99 100\n",
        );
        let mut disks = DiskIdleCounters::new(HostRoot::at(dir.path()));
        disks.open().unwrap();
        let idle = disks.read().unwrap();
        assert_eq!(idle["nvme0n1"], 100.0);
    }

    #[test]
    fn test_parse_proc_io() {
        let content = "rchar: 10\nwchar: 20\nread_bytes: 4096\nwrite_bytes: 8192\n";
        assert_eq!(parse_proc_io(content), (4096, 8192));
    }

    #[test]
    fn test_thermal_zones() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "sys/class/thermal/thermal_zone0/type", "x86_pkg_temp\n");
        fixture::write(dir.path(), "sys/class/thermal/thermal_zone0/temp", "54000\n");
        let host = LinuxHost::new(HostRoot::at(dir.path()));
        assert_eq!(
            host.thermal_zones().unwrap(),
            vec![Candidate::new("x86_pkg_temp", 54.0)]
        );
    }

    #[test]
    fn test_cpu_frequency_prefers_cpufreq() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "3400000\n");
        fixture::write(dir.path(), "sys/devices/system/cpu/cpu1/cpufreq/scaling_cur_freq", "4100000\n");
        fixture::write(dir.path(), "proc/cpuinfo", "cpu MHz\t\t: 800.000\n");
        let host = LinuxHost::new(HostRoot::at(dir.path()));
        assert_eq!(host.cpu_frequency_mhz().unwrap(), 4100.0);
    }
}
