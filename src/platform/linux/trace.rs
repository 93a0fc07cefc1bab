//! Privileged per-process I/O accounting as a trace event stream

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use super::counters::parse_proc_io;
use super::HostRoot;
use crate::error::{TelemetryError, TelemetryResult};
use crate::telemetry::trace::{TraceEvent, TraceEventKind, TraceEventSource};

/// Emits file read/write events from /proc/<pid>/io deltas. Reading other
/// users' accounting needs root, so the source refuses to open otherwise.
pub struct ProcIoPoller {
    root: HostRoot,
    require_root: bool,
    last: HashMap<u32, (u64, u64)>,
}

impl ProcIoPoller {
    pub fn new(root: HostRoot) -> Self {
        Self {
            root,
            require_root: true,
            last: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn unprivileged(root: HostRoot) -> Self {
        Self {
            require_root: false,
            ..Self::new(root)
        }
    }

    fn scan(&self) -> HashMap<u32, (u64, u64)> {
        self.root
            .pids()
            .into_iter()
            .filter_map(|pid| {
                let content = fs::read_to_string(self.root.proc(format!("{}/io", pid))).ok()?;
                Some((pid, parse_proc_io(&content)))
            })
            .collect()
    }
}

impl TraceEventSource for ProcIoPoller {
    fn open(&mut self) -> TelemetryResult<()> {
        if self.require_root && !nix::unistd::geteuid().is_root() {
            return Err(TelemetryError::PermissionDenied("per-process I/O accounting".into()));
        }
        self.last = self.scan();
        if self.last.is_empty() {
            return Err(TelemetryError::Unavailable("per-process I/O accounting".into()));
        }
        Ok(())
    }

    fn next_batch(&mut self, timeout: Duration) -> TelemetryResult<Vec<TraceEvent>> {
        std::thread::sleep(timeout);
        let current = self.scan();
        let mut events = Vec::new();
        for (pid, (read, write)) in &current {
            // New pids only establish a baseline.
            let Some((prev_read, prev_write)) = self.last.get(pid) else {
                continue;
            };
            let read_delta = read.saturating_sub(*prev_read);
            let write_delta = write.saturating_sub(*prev_write);
            if read_delta > 0 {
                events.push(TraceEvent {
                    pid: *pid,
                    kind: TraceEventKind::FileRead,
                    bytes: read_delta,
                });
            }
            if write_delta > 0 {
                events.push(TraceEvent {
                    pid: *pid,
                    kind: TraceEventKind::FileWrite,
                    bytes: write_delta,
                });
            }
        }
        self.last = current;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::linux::fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_emits_deltas_after_baseline() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "proc/5/io", "read_bytes: 100\nwrite_bytes: 0\n");
        let mut poller = ProcIoPoller::unprivileged(HostRoot::at(dir.path()));
        poller.open().unwrap();

        fixture::write(dir.path(), "proc/5/io", "read_bytes: 400\nwrite_bytes: 0\n");
        fixture::write(dir.path(), "proc/6/io", "read_bytes: 999\nwrite_bytes: 999\n");
        let events = poller.next_batch(Duration::ZERO).unwrap();
        assert_eq!(
            events,
            vec![TraceEvent {
                pid: 5,
                kind: TraceEventKind::FileRead,
                bytes: 300
            }]
        );
    }

    #[test]
    fn test_empty_proc_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut poller = ProcIoPoller::unprivileged(HostRoot::at(dir.path()));
        assert!(matches!(poller.open(), Err(TelemetryError::Unavailable(_))));
    }
}
