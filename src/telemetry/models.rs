//! Per-tick snapshot records handed to the UI layer
//!
//! Plain data, rebuilt every sampling pass. Unknown readings are carried as
//! zero or an empty string; the accompanying `SourceTag` says where a value
//! came from (`SourceTag::None` when it is unknown).

use serde::Serialize;

use super::inventory::MediaKind;
use super::resolver::SourceTag;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuInfo {
    pub name: String,
    pub usage: f64,
    pub per_core_usage: Vec<f64>,
    pub temperature_c: f64,
    pub clock_ghz: f64,
    pub power_watts: f64,
    pub voltage_volts: f64,
    pub physical_cores: usize,
    pub logical_processors: usize,
    pub cores_and_threads: String,
    pub usage_source: SourceTag,
    pub temperature_source: SourceTag,
    pub power_source: SourceTag,
    pub voltage_source: SourceTag,
    pub clock_source: SourceTag,
    pub cores_source: SourceTag,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RamInfo {
    pub used_gb: f64,
    pub total_gb: f64,
    pub available_gb: f64,
    pub usage: f64,
    pub committed_gb: f64,
    pub cached_gb: f64,
    pub paged_pool_gb: f64,
    pub non_paged_pool_gb: f64,
    pub type_and_speed: String,
    pub module_configuration: String,
    pub form_factor: String,
    pub slots: String,
    pub overclock_profile: String,
    pub brand: String,
    pub part_number: String,
    pub source: SourceTag,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GpuInfo {
    pub name: String,
    /// Stable key shared with per-process engine counters.
    pub adapter_key: String,
    pub usage: f64,
    pub temperature_c: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub memory_display: String,
    pub driver_version: String,
    pub driver_date: String,
    pub is_emulated: bool,
}

impl GpuInfo {
    /// Zero-valued padding entry for UI testing without hardware.
    pub fn emulated(index: usize) -> Self {
        Self {
            name: format!("Emulated GPU {}", index),
            adapter_key: format!("emulated_{}", index),
            memory_display: "0.0 GB / 0.0 GB".to_string(),
            driver_version: "emulated".to_string(),
            is_emulated: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageInfo {
    pub name: String,
    pub mount_point: String,
    pub device: String,
    pub file_system: String,
    pub total_gb: f64,
    pub free_gb: f64,
    pub used_percent: f64,
    pub activity_percent: f64,
    pub media_kind: MediaKind,
    pub is_system: bool,
    pub is_emulated: bool,
}

impl StorageInfo {
    pub fn emulated(index: usize) -> Self {
        Self {
            name: format!("Emulated {}", index),
            mount_point: format!("/emulated/{}", index),
            is_emulated: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionKind {
    Ethernet,
    WiFi,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ethernet => write!(f, "Ethernet"),
            Self::WiFi => write!(f, "Wi-Fi"),
            Self::Unknown => write!(f, "Network"),
        }
    }
}

/// A process ranked by network activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Bits per second when accounted, otherwise an activity proxy.
    pub upload_bps: f64,
    pub download_bps: f64,
    pub connections: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkInfo {
    pub interface: String,
    pub kind: ConnectionKind,
    pub ipv4: String,
    pub connected: bool,
    pub upload_bps: f64,
    pub download_bps: f64,
    pub upload_display: String,
    pub download_display: String,
    /// Mbps, oldest first.
    pub upload_history: Vec<f64>,
    pub download_history: Vec<f64>,
    pub top_processes: Vec<NetworkProcessInfo>,
    pub source: SourceTag,
}

impl NetworkInfo {
    pub fn status(&self) -> &'static str {
        if self.connected {
            "Connected"
        } else {
            "Disconnected"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskProcessInfo {
    pub pid: u32,
    pub name: String,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub source: SourceTag,
}

impl DiskProcessInfo {
    pub fn total_bytes_per_sec(&self) -> f64 {
        self.read_bytes_per_sec + self.write_bytes_per_sec
    }
}

/// Everything one sampling pass produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSnapshot {
    pub cpu: CpuInfo,
    pub ram: RamInfo,
    pub gpus: Vec<GpuInfo>,
    pub storage: Vec<StorageInfo>,
    pub network: NetworkInfo,
    pub top_disk_process: Option<DiskProcessInfo>,
}
