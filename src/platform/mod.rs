//! Host data sources
//!
//! Every OS query the samplers depend on sits behind a trait here so the
//! fallback chains can be exercised against fakes and fixture roots. The
//! `linux` module provides the real implementations.

pub mod linux;

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TelemetryResult;
use crate::telemetry::inventory::{MemoryModule, VideoController};
use crate::telemetry::resolver::Candidate;
use crate::telemetry::resource::CounterSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HardwareKind {
    Cpu,
    Gpu,
    Memory,
    Motherboard,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SensorKind {
    /// Percent
    Load,
    /// Degrees Celsius
    Temperature,
    /// Watts
    Power,
    /// Volts
    Voltage,
    /// Amperes
    Current,
    /// MHz
    Clock,
    /// GB
    Data,
    /// MB
    SmallData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub name: String,
    pub kind: SensorKind,
    pub value: Option<f64>,
}

impl Sensor {
    pub fn new(name: impl Into<String>, kind: SensorKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value: Some(value),
        }
    }
}

/// One node in the hardware sensor tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareNode {
    pub kind: HardwareKind,
    pub name: String,
    /// Stable identifier (PCI address for GPUs, chip path for hwmon).
    pub identifier: String,
    pub sensors: Vec<Sensor>,
    pub children: Vec<HardwareNode>,
}

impl HardwareNode {
    pub fn new(kind: HardwareKind, name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            identifier: identifier.into(),
            sensors: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Sensors of `kind` on this node and all sub-nodes, as scoring candidates.
    pub fn candidates(&self, kind: SensorKind) -> Vec<Candidate> {
        let mut out = Vec::new();
        self.collect(kind, &mut out);
        out
    }

    fn collect(&self, kind: SensorKind, out: &mut Vec<Candidate>) {
        out.extend(
            self.sensors
                .iter()
                .filter(|s| s.kind == kind)
                .filter_map(|s| s.value.map(|v| Candidate::new(s.name.clone(), v))),
        );
        for child in &self.children {
            child.collect(kind, out);
        }
    }

    pub fn sensor(&self, kind: SensorKind, name: &str) -> Option<f64> {
        self.sensors
            .iter()
            .find(|s| s.kind == kind && s.name.eq_ignore_ascii_case(name))
            .and_then(|s| s.value)
    }
}

/// Candidates of `kind` across every node of `hardware` kind.
pub fn candidates_of(nodes: &[HardwareNode], hardware: HardwareKind, kind: SensorKind) -> Vec<Candidate> {
    nodes
        .iter()
        .filter(|n| n.kind == hardware)
        .flat_map(|n| n.candidates(kind))
        .collect()
}

/// Optional provider features, negotiated once when the provider opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorCapabilities {
    pub cpu_power: bool,
    pub gpu: bool,
    pub board: bool,
    pub storage: bool,
}

/// A hardware sensor tree refreshed on demand.
pub trait SensorProvider: CounterSource<Reading = Vec<HardwareNode>> {
    fn capabilities(&self) -> SensorCapabilities;
}

impl<S: SensorProvider + ?Sized> SensorProvider for Box<S> {
    fn capabilities(&self) -> SensorCapabilities {
        (**self).capabilities()
    }
}

/// Total and per-core processor load in percent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuLoad {
    pub total: f64,
    pub per_core: Vec<f64>,
}

/// Cumulative byte counters for one network interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceCounters {
    pub name: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorInventory {
    pub name: String,
    pub vendor: String,
    pub physical_cores: usize,
    pub logical_processors: usize,
}

/// Memory accounting beyond used/available, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryExtended {
    pub committed: u64,
    pub cached: u64,
    pub paged_pool: u64,
    pub non_paged_pool: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: String,
    /// Kernel block device name ("nvme0n1p2", "sda1").
    pub device: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub is_system: bool,
    pub is_removable: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockDeviceInfo {
    pub model: String,
    pub rotational: Option<bool>,
}

/// Tabular hardware inventory queries.
pub trait InventoryProvider: Send + Sync {
    fn processor(&self) -> TelemetryResult<ProcessorInventory>;
    fn memory_modules(&self) -> TelemetryResult<Vec<MemoryModule>>;
    fn memory_slots(&self) -> TelemetryResult<usize>;
    fn memory_extended(&self) -> TelemetryResult<MemoryExtended>;
    fn video_controllers(&self) -> TelemetryResult<Vec<VideoController>>;
    fn volumes(&self) -> TelemetryResult<Vec<VolumeInfo>>;
    fn block_device(&self, device: &str) -> TelemetryResult<BlockDeviceInfo>;
}

/// Cumulative I/O bytes for one process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessIo {
    pub pid: u32,
    pub name: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Cheap stateless host queries.
pub trait HostQueries: Send + Sync {
    /// Current processor clock from the OS frequency counter.
    fn cpu_frequency_mhz(&self) -> TelemetryResult<f64>;
    /// OS thermal zones as labelled temperature candidates.
    fn thermal_zones(&self) -> TelemetryResult<Vec<Candidate>>;
    /// Established outbound sockets per owning pid.
    fn established_sockets(&self) -> TelemetryResult<HashMap<u32, usize>>;
    fn process_io(&self) -> TelemetryResult<Vec<ProcessIo>>;
    fn process_name(&self, pid: u32) -> Option<String>;
    /// IPv4 address of an interface, if it has one.
    fn ipv4_address(&self, interface: &str) -> Option<String>;
}

/// One process as enumerated by the OS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    /// Accumulated user plus kernel processor time.
    pub cpu_time: Duration,
    pub working_set: u64,
    pub private_bytes: u64,
}

/// Process enumeration and control.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSource: Send + Sync {
    /// One batched pass over every process.
    fn list(&self) -> TelemetryResult<Vec<RawProcess>>;
    /// System-wide pid to parent pid map.
    fn parent_map(&self) -> TelemetryResult<HashMap<u32, u32>>;
    fn logical_processors(&self) -> usize;
    fn terminate(&self, pid: u32) -> TelemetryResult<()>;
    fn executable_path(&self, pid: u32) -> TelemetryResult<PathBuf>;
}

/// GPU engine utilization counters. Instance names embed the owning pid and
/// adapter: `pid_<pid>_luid_<adapter>_eng_<engine>...`.
pub trait GpuEngineSource: Send {
    /// Enumerate current counter instances. Expensive.
    fn instances(&mut self) -> TelemetryResult<Vec<String>>;
    /// Cumulative busy nanoseconds for each requested instance still alive.
    fn read(&mut self, instances: &[String]) -> TelemetryResult<Vec<(String, u64)>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_candidates_walk_children() {
        let mut cpu = HardwareNode::new(HardwareKind::Cpu, "Ryzen", "/cpu/0");
        cpu.sensors.push(Sensor::new("Tctl", SensorKind::Temperature, 61.0));
        let mut ccd = HardwareNode::new(HardwareKind::Cpu, "CCD", "/cpu/0/ccd1");
        ccd.sensors.push(Sensor::new("CCD1", SensorKind::Temperature, 55.0));
        ccd.sensors.push(Sensor::new("Core Clock", SensorKind::Clock, 4600.0));
        cpu.children.push(ccd);

        let temps = candidates_of(&[cpu], HardwareKind::Cpu, SensorKind::Temperature);
        assert_eq!(
            temps,
            vec![Candidate::new("Tctl", 61.0), Candidate::new("CCD1", 55.0)]
        );
    }

    #[test]
    fn test_sensor_lookup_by_name() {
        let mut gpu = HardwareNode::new(HardwareKind::Gpu, "Radeon", "0000:03:00.0");
        gpu.sensors.push(Sensor::new("GPU Core", SensorKind::Load, 12.0));
        assert_eq!(gpu.sensor(SensorKind::Load, "gpu core"), Some(12.0));
        assert_eq!(gpu.sensor(SensorKind::Temperature, "GPU Core"), None);
    }
}
