//! Linux sources: `/proc`, `/sys` and sysinfo
//!
//! Every reader is rooted at a `HostRoot` so tests can point it at a
//! fixture directory instead of `/`.

pub mod counters;
pub mod inventory;
pub mod process;
pub mod sensors;
pub mod sockets;
pub mod trace;

use std::fs;
use std::path::{Path, PathBuf};

pub use counters::{DiskIdleCounters, LinuxHost, NicCounters, ProcStatCpu};
pub use inventory::LinuxInventory;
pub use process::{LinuxGpuEngines, LinuxProcessSource};
pub use sensors::LinuxSensorProvider;
pub use trace::ProcIoPoller;

/// Kernel clock ticks per second as exposed to userspace. Linux fixes
/// USER_HZ at 100 on every architecture.
pub const USER_HZ: u64 = 100;

#[derive(Debug, Clone)]
pub struct HostRoot {
    root: PathBuf,
}

impl Default for HostRoot {
    fn default() -> Self {
        Self::system()
    }
}

impl HostRoot {
    pub fn system() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn proc(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join("proc").join(rel)
    }

    pub fn sys(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join("sys").join(rel)
    }

    /// Numeric entries under `/proc`.
    pub fn pids(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(self.proc("")) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect()
    }
}

/// Read a sysfs attribute, trimmed. `None` when missing or empty.
pub(crate) fn read_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Directory entries whose file name starts with `prefix`, sorted by name.
pub(crate) fn entries_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(prefix)
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths.flatten().collect(),
        Err(err) => {
            tracing::trace!(error = %err, "bad sysfs pattern");
            Vec::new()
        }
    }
}

/// A DRM render device backed by a PCI GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct DrmCard {
    pub card: String,
    pub device_dir: PathBuf,
    /// PCI slot name ("0000:03:00.0").
    pub pdev: String,
    pub driver: String,
    pub name: String,
}

/// Enumerate `/sys/class/drm/card<N>` entries (connectors like `card0-DP-1`
/// are skipped).
pub fn drm_cards(root: &HostRoot) -> Vec<DrmCard> {
    entries_with_prefix(&root.sys("class/drm"), "card")
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n[4..].chars().all(|c| c.is_ascii_digit()) && n.len() > 4)
        })
        .filter_map(|card_dir| {
            let device_dir = card_dir.join("device");
            let uevent = fs::read_to_string(device_dir.join("uevent")).ok()?;
            let field = |key: &str| {
                uevent
                    .lines()
                    .find_map(|l| l.strip_prefix(key))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            let pdev = field("PCI_SLOT_NAME=");
            if pdev.is_empty() {
                return None;
            }
            let driver = field("DRIVER=");
            let name = read_attr(&device_dir.join("product_name"))
                .unwrap_or_else(|| format!("{} {}", vendor_label(&field("PCI_ID=")), pdev));
            Some(DrmCard {
                card: card_dir.file_name()?.to_string_lossy().into_owned(),
                device_dir,
                pdev,
                driver,
                name,
            })
        })
        .collect()
}

fn vendor_label(pci_id: &str) -> &'static str {
    match pci_id.split(':').next().map(|v| v.to_ascii_uppercase()) {
        Some(v) if v == "10DE" => "NVIDIA GPU",
        Some(v) if v == "1002" => "AMD Radeon",
        Some(v) if v == "8086" => "Intel Graphics",
        _ => "GPU",
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pids_skip_non_numeric() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "proc/1/stat", "");
        fixture::write(dir.path(), "proc/42/stat", "");
        fixture::write(dir.path(), "proc/self/stat", "");
        let mut pids = HostRoot::at(dir.path()).pids();
        pids.sort();
        assert_eq!(pids, vec![1, 42]);
    }

    #[test]
    fn test_drm_cards_from_uevent() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(
            dir.path(),
            "sys/class/drm/card0/device/uevent",
            "DRIVER=amdgpu\nPCI_ID=1002:744C\nPCI_SLOT_NAME=0000:03:00.0\n",
        );
        fixture::write(dir.path(), "sys/class/drm/card0-DP-1/status", "connected");
        let cards = drm_cards(&HostRoot::at(dir.path()));
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].pdev, "0000:03:00.0");
        assert_eq!(cards[0].driver, "amdgpu");
        assert_eq!(cards[0].name, "AMD Radeon 0000:03:00.0");
    }
}
