//! TCP socket table and socket ownership

use std::collections::HashMap;
use std::fs;

use super::HostRoot;
use crate::error::{read_to_string, TelemetryError, TelemetryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Listening,
    Established,
    TimeWait,
    CloseWait,
    Unknown,
}

impl SocketState {
    /// State column of /proc/net/tcp (hex, from include/net/tcp_states.h).
    pub fn from_hex(code: &str) -> Self {
        match code {
            "01" => Self::Established,
            "06" => Self::TimeWait,
            "08" => Self::CloseWait,
            "0A" => Self::Listening,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => write!(f, "LISTEN"),
            Self::Established => write!(f, "ESTABLISHED"),
            Self::TimeWait => write!(f, "TIME_WAIT"),
            Self::CloseWait => write!(f, "CLOSE_WAIT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One row of /proc/net/tcp or tcp6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub remote: String,
    pub state: SocketState,
    pub inode: u64,
}

impl SocketEntry {
    /// Remote address is loopback or unspecified.
    pub fn is_local(&self) -> bool {
        let addr = self.remote.split(':').next().unwrap_or_default();
        match addr.len() {
            // IPv4, little-endian: 127.x.x.x ends in 7F
            8 => addr.ends_with("7F") || addr == "00000000",
            32 => {
                addr == "00000000000000000000000001000000"
                    || addr.chars().all(|c| c == '0')
                    || (addr.starts_with("0000000000000000FFFF0000") && addr.ends_with("7F"))
            }
            _ => true,
        }
    }
}

pub fn parse_socket_table(content: &str) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            Some(SocketEntry {
                remote: parts[2].to_string(),
                state: SocketState::from_hex(parts[3]),
                inode: parts[9].parse().ok()?,
            })
        })
        .collect()
}

/// Socket inode to owning pid, from the `socket:[inode]` fd links.
pub fn socket_owners(root: &HostRoot) -> HashMap<u64, u32> {
    let mut owners = HashMap::new();
    for pid in root.pids() {
        // Unreadable for other users' processes; skip them.
        let Ok(fds) = fs::read_dir(root.proc(format!("{}/fd", pid))) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            let target = target.to_string_lossy();
            if let Some(inode) = target
                .strip_prefix("socket:[")
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|s| s.parse().ok())
            {
                owners.insert(inode, pid);
            }
        }
    }
    owners
}

/// Count of established sockets with a non-loopback remote, per pid.
pub fn established_by_pid(root: &HostRoot) -> TelemetryResult<HashMap<u32, usize>> {
    let mut entries = Vec::new();
    let mut any_table = false;
    for table in ["net/tcp", "net/tcp6"] {
        if let Ok(content) = read_to_string(&root.proc(table)) {
            any_table = true;
            entries.extend(parse_socket_table(&content));
        }
    }
    if !any_table {
        return Err(TelemetryError::Unavailable("tcp socket table".into()));
    }

    let owners = socket_owners(root);
    let mut counts = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.state == SocketState::Established && !e.is_local() && e.inode != 0)
    {
        if let Some(pid) = owners.get(&entry.inode) {
            *counts.entry(*pid).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::linux::fixture;
    use pretty_assertions::assert_eq;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 111 1\n\
   1: 0F02000A:C350 2200A8C0:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 222 1\n\
   2: 0100007F:C351 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 333 1\n";

    #[test]
    fn test_parse_socket_table() {
        let entries = parse_socket_table(TCP);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].state, SocketState::Listening);
        assert_eq!(entries[1].state, SocketState::Established);
        assert!(!entries[1].is_local());
        assert!(entries[2].is_local());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SocketState::from_hex("06").to_string(), "TIME_WAIT");
    }

    #[test]
    fn test_established_by_pid_maps_inodes() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "proc/net/tcp", TCP);
        let fd_dir = dir.path().join("proc/4242/fd");
        fs::create_dir_all(&fd_dir).unwrap();
        std::os::unix::fs::symlink("socket:[222]", fd_dir.join("5")).unwrap();
        std::os::unix::fs::symlink("socket:[333]", fd_dir.join("6")).unwrap();

        let counts = established_by_pid(&HostRoot::at(dir.path())).unwrap();
        assert_eq!(counts.get(&4242), Some(&1));
    }

    #[test]
    fn test_missing_tables_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(established_by_pid(&HostRoot::at(dir.path())).is_err());
    }
}
