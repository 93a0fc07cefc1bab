//! Process enumeration, control and DRM engine counters

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use super::{HostRoot, USER_HZ};
use crate::error::{read_to_string, TelemetryError, TelemetryResult};
use crate::platform::{GpuEngineSource, ProcessSource, RawProcess};

/// Fields of /proc/<pid>/stat we need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatLine {
    pub name: String,
    pub ppid: u32,
    /// utime + stime in clock ticks
    pub ticks: u64,
}

/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so split on the last `)`.
pub fn parse_stat(content: &str) -> Option<StatLine> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let name = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    // state ppid pgrp session tty tpgid flags minflt cminflt majflt cmajflt utime stime
    let ppid = rest.get(1)?.parse().ok()?;
    let utime: u64 = rest.get(11)?.parse().ok()?;
    let stime: u64 = rest.get(12)?.parse().ok()?;
    Some(StatLine {
        name,
        ppid,
        ticks: utime + stime,
    })
}

/// Resident set and private (anonymous plus swapped) bytes from
/// /proc/<pid>/status.
pub fn parse_status_memory(content: &str) -> (u64, u64) {
    let kb = |key: &str| -> u64 {
        content
            .lines()
            .find_map(|l| l.strip_prefix(key))
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    (kb("VmRSS:") * 1024, (kb("RssAnon:") + kb("VmSwap:")) * 1024)
}

fn map_errno(pid: u32, errno: Errno) -> TelemetryError {
    match errno {
        Errno::ESRCH => TelemetryError::Exited(pid),
        Errno::EPERM => TelemetryError::PermissionDenied(format!("process {}", pid)),
        other => TelemetryError::Io {
            path: format!("process {}", pid),
            source: std::io::Error::from(other),
        },
    }
}

#[derive(Debug, Clone)]
pub struct LinuxProcessSource {
    root: HostRoot,
    logical: usize,
}

impl LinuxProcessSource {
    pub fn new(root: HostRoot) -> Self {
        let logical = fs::read_to_string(root.proc("stat"))
            .map(|s| {
                s.lines()
                    .filter(|l| l.starts_with("cpu") && l.as_bytes().get(3).is_some_and(u8::is_ascii_digit))
                    .count()
            })
            .unwrap_or(0);
        let logical = if logical > 0 {
            logical
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        };
        Self { root, logical }
    }
}

impl ProcessSource for LinuxProcessSource {
    fn list(&self) -> TelemetryResult<Vec<RawProcess>> {
        let pids = self.root.pids();
        if pids.is_empty() {
            return Err(TelemetryError::Unavailable("/proc".into()));
        }
        Ok(pids
            .into_iter()
            .filter_map(|pid| {
                // A process may exit between enumeration and these reads.
                let stat = parse_stat(&fs::read_to_string(self.root.proc(format!("{}/stat", pid))).ok()?)?;
                let (working_set, private_bytes) = fs::read_to_string(self.root.proc(format!("{}/status", pid)))
                    .map(|s| parse_status_memory(&s))
                    .unwrap_or((0, 0));
                Some(RawProcess {
                    pid,
                    name: stat.name,
                    cpu_time: Duration::from_secs_f64(stat.ticks as f64 / USER_HZ as f64),
                    working_set,
                    private_bytes,
                })
            })
            .collect())
    }

    fn parent_map(&self) -> TelemetryResult<HashMap<u32, u32>> {
        let pids = self.root.pids();
        if pids.is_empty() {
            return Err(TelemetryError::Unavailable("/proc".into()));
        }
        Ok(pids
            .into_iter()
            .filter_map(|pid| {
                let stat = parse_stat(&fs::read_to_string(self.root.proc(format!("{}/stat", pid))).ok()?)?;
                Some((pid, stat.ppid))
            })
            .collect())
    }

    fn logical_processors(&self) -> usize {
        self.logical
    }

    fn terminate(&self, pid: u32) -> TelemetryResult<()> {
        let raw = i32::try_from(pid).map_err(|e| TelemetryError::parse("pid", e))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| map_errno(pid, e))
    }

    fn executable_path(&self, pid: u32) -> TelemetryResult<PathBuf> {
        let link = self.root.proc(format!("{}/exe", pid));
        fs::read_link(&link).map_err(|e| TelemetryError::from_io(&link, e))
    }
}

/// One DRM client as described by a /proc/<pid>/fdinfo entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmClient {
    pub pdev: String,
    pub client_id: String,
    pub engines: Vec<(String, u64)>,
}

pub fn parse_drm_fdinfo(content: &str) -> Option<DrmClient> {
    let mut pdev = None;
    let mut client_id = String::new();
    let mut engines = Vec::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key == "drm-pdev" {
            pdev = Some(value.to_string());
        } else if key == "drm-client-id" {
            client_id = value.to_string();
        } else if let Some(engine) = key.strip_prefix("drm-engine-") {
            if engine == "capacity" || engine.starts_with("capacity-") {
                continue;
            }
            if let Some(ns) = value.split_whitespace().next().and_then(|v| v.parse().ok()) {
                engines.push((engine.to_string(), ns));
            }
        }
    }
    Some(DrmClient {
        pdev: pdev?,
        client_id,
        engines,
    })
}

/// Engine busy counters from DRM fdinfo. One instance per
/// (pid, device, engine, client).
pub struct LinuxGpuEngines {
    root: HostRoot,
    paths: HashMap<String, PathBuf>,
}

impl LinuxGpuEngines {
    pub fn new(root: HostRoot) -> Self {
        Self {
            root,
            paths: HashMap::new(),
        }
    }
}

fn instance_name(pid: u32, client: &DrmClient, engine: &str) -> String {
    format!(
        "pid_{}_luid_{}_eng_{}_client_{}",
        pid, client.pdev, engine, client.client_id
    )
}

fn pid_of(path: &std::path::Path) -> Option<u32> {
    // .../proc/<pid>/fdinfo/<fd>
    path.parent()?.parent()?.file_name()?.to_str()?.parse().ok()
}

impl GpuEngineSource for LinuxGpuEngines {
    fn instances(&mut self) -> TelemetryResult<Vec<String>> {
        self.paths.clear();
        for pid in self.root.pids() {
            let Ok(fds) = fs::read_dir(self.root.proc(format!("{}/fdinfo", pid))) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(content) = fs::read_to_string(fd.path()) else {
                    continue;
                };
                let Some(client) = parse_drm_fdinfo(&content) else {
                    continue;
                };
                for (engine, _) in &client.engines {
                    self.paths.insert(instance_name(pid, &client, engine), fd.path());
                }
            }
        }
        let mut names: Vec<String> = self.paths.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read(&mut self, instances: &[String]) -> TelemetryResult<Vec<(String, u64)>> {
        let mut by_path: HashMap<&PathBuf, Vec<&String>> = HashMap::new();
        for name in instances {
            if let Some(path) = self.paths.get(name) {
                by_path.entry(path).or_default().push(name);
            }
        }

        let mut out = Vec::new();
        for (path, wanted) in by_path {
            let Some(pid) = pid_of(path) else { continue };
            // The fd may have been closed since enumeration.
            let Ok(content) = read_to_string(path) else { continue };
            let Some(client) = parse_drm_fdinfo(&content) else { continue };
            for (engine, ns) in &client.engines {
                let name = instance_name(pid, &client, engine);
                if wanted.contains(&&name) {
                    out.push((name, *ns));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::linux::fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_stat_with_parens_in_name() {
        let line = "1234 (Web Content (x)) S 1000 1234 1234 0 -1 4194560 100 0 0 0 250 50 0 0 20 0 1 0 100 0 0";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.name, "Web Content (x)");
        assert_eq!(stat.ppid, 1000);
        assert_eq!(stat.ticks, 300);
    }

    #[test]
    fn test_parse_stat_rejects_truncated() {
        assert_eq!(parse_stat("12 (sh) S 1"), None);
    }

    #[test]
    fn test_parse_status_memory() {
        let status = "Name:\tbash\nVmRSS:\t    2048 kB\nRssAnon:\t    1024 kB\nVmSwap:\t  512 kB\n";
        assert_eq!(parse_status_memory(status), (2048 * 1024, 1536 * 1024));
    }

    #[test]
    fn test_list_reads_fixture_processes() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "proc/stat", "cpu  1 2 3 4\ncpu0 1 2 3 4\ncpu1 1 2 3 4\n");
        fixture::write(
            dir.path(),
            "proc/10/stat",
            "10 (app) S 1 10 10 0 -1 0 0 0 0 0 150 50 0 0 20 0 1 0 0 0 0",
        );
        fixture::write(dir.path(), "proc/10/status", "VmRSS:\t100 kB\nRssAnon:\t40 kB\n");
        // Exited between enumeration and read.
        fs::create_dir_all(dir.path().join("proc/11")).unwrap();

        let source = LinuxProcessSource::new(HostRoot::at(dir.path()));
        assert_eq!(source.logical_processors(), 2);
        let procs = source.list().unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].name, "app");
        assert_eq!(procs[0].cpu_time, Duration::from_secs(2));
        assert_eq!(procs[0].working_set, 100 * 1024);
        assert_eq!(source.parent_map().unwrap().get(&10), Some(&1));
    }

    #[test]
    fn test_parse_drm_fdinfo() {
        let content = "pos:\t0\nflags:\t02100002\ndrm-driver:\tamdgpu\ndrm-pdev:\t0000:03:00.0\n\
                       drm-client-id:\t42\ndrm-engine-gfx:\t1500000 ns\ndrm-engine-compute:\t0 ns\n\
                       drm-engine-capacity-gfx:\t1\n";
        let client = parse_drm_fdinfo(content).unwrap();
        assert_eq!(client.pdev, "0000:03:00.0");
        assert_eq!(client.client_id, "42");
        assert_eq!(
            client.engines,
            vec![("gfx".to_string(), 1_500_000), ("compute".to_string(), 0)]
        );
        assert_eq!(parse_drm_fdinfo("pos:\t0\n"), None);
    }

    #[test]
    fn test_engine_instances_round_trip_fixture() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(
            dir.path(),
            "proc/77/fdinfo/9",
            "drm-pdev:\t0000:03:00.0\ndrm-client-id:\t5\ndrm-engine-gfx:\t1000 ns\n",
        );
        let mut engines = LinuxGpuEngines::new(HostRoot::at(dir.path()));
        let names = engines.instances().unwrap();
        assert_eq!(names, vec!["pid_77_luid_0000:03:00.0_eng_gfx_client_5".to_string()]);
        let values = engines.read(&names).unwrap();
        assert_eq!(values, vec![(names[0].clone(), 1000)]);
    }
}
