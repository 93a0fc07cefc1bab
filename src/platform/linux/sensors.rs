//! Hardware sensor tree from sysinfo, hwmon, RAPL and DRM

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use super::{drm_cards, entries_with_prefix, read_attr, DrmCard, HostRoot};
use crate::error::{TelemetryError, TelemetryResult};
use crate::platform::{HardwareKind, HardwareNode, Sensor, SensorCapabilities, SensorKind, SensorProvider};
use crate::telemetry::rate::rate;
use crate::telemetry::resource::CounterSource;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Classify an hwmon chip by its driver name.
pub fn classify_chip(name: &str) -> HardwareKind {
    let n = name.to_ascii_lowercase();
    if ["k10temp", "coretemp", "zenpower", "cpu_thermal", "fam15h_power"]
        .iter()
        .any(|c| n.starts_with(c))
    {
        HardwareKind::Cpu
    } else if ["amdgpu", "radeon", "nouveau", "i915", "xe"].contains(&n.as_str()) {
        HardwareKind::Gpu
    } else if n.starts_with("nvme") || n == "drivetemp" {
        HardwareKind::Storage
    } else {
        HardwareKind::Motherboard
    }
}

fn scaled(path: &Path, divisor: f64) -> Option<f64> {
    read_attr(path)?
        .parse::<f64>()
        .ok()
        .map(|v| v / divisor)
        .filter(|v| v.is_finite())
}

/// Read every input of one hwmon chip directory. Values are converted from
/// the sysfs units (millidegrees, millivolts, microwatts, milliamps, hertz).
pub fn read_hwmon_sensors(dir: &Path, chip: &str) -> Vec<Sensor> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();

    let mut sensors = Vec::new();
    for file in files {
        let (kind, divisor, stem) = if let Some(stem) = file.strip_suffix("_input") {
            match stem {
                s if s.starts_with("temp") => (SensorKind::Temperature, 1000.0, s),
                s if s.starts_with("in") => (SensorKind::Voltage, 1000.0, s),
                s if s.starts_with("power") => (SensorKind::Power, 1_000_000.0, s),
                s if s.starts_with("curr") => (SensorKind::Current, 1000.0, s),
                s if s.starts_with("freq") => (SensorKind::Clock, 1_000_000.0, s),
                _ => continue,
            }
        } else if let Some(stem) = file.strip_suffix("_average") {
            if !stem.starts_with("power") || dir.join(format!("{}_input", stem)).exists() {
                continue;
            }
            (SensorKind::Power, 1_000_000.0, stem)
        } else {
            continue;
        };

        let label = read_attr(&dir.join(format!("{}_label", stem)))
            .unwrap_or_else(|| format!("{} {}", chip, stem));
        if let Some(value) = scaled(&dir.join(&file), divisor) {
            sensors.push(Sensor::new(label, kind, value));
        }
    }
    sensors
}

/// Energy consumed between two counter readings, accounting for one wrap
/// at `max_range`.
pub fn energy_delta(previous: u64, current: u64, max_range: u64) -> u64 {
    if current >= previous {
        current - previous
    } else if max_range > previous {
        (max_range - previous) + current
    } else {
        0
    }
}

#[derive(Debug, Clone)]
struct RaplDomain {
    label: String,
    energy_path: PathBuf,
    max_range: u64,
}

#[derive(Debug, Clone)]
struct HwmonChip {
    dir: PathBuf,
    name: String,
    kind: HardwareKind,
    device: Option<PathBuf>,
}

fn rapl_label(domain: &str) -> String {
    match domain {
        d if d.starts_with("package") => "CPU Package".to_string(),
        "core" => "CPU Cores".to_string(),
        "uncore" => "CPU Uncore".to_string(),
        "dram" => "DRAM".to_string(),
        "psys" => "Platform".to_string(),
        other => other.to_uppercase(),
    }
}

/// Parse a trailing core index ("cpu7" -> 7).
fn core_index(name: &str) -> Option<usize> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Sensor tree for the local machine.
pub struct LinuxSensorProvider {
    root: HostRoot,
    system: Option<System>,
    capabilities: SensorCapabilities,
    chips: Vec<HwmonChip>,
    rapl: Vec<RaplDomain>,
    rapl_last: HashMap<String, (u64, Instant)>,
    cards: Vec<DrmCard>,
}

impl LinuxSensorProvider {
    pub fn new(root: HostRoot) -> Self {
        Self {
            root,
            system: None,
            capabilities: SensorCapabilities::default(),
            chips: Vec::new(),
            rapl: Vec::new(),
            rapl_last: HashMap::new(),
            cards: Vec::new(),
        }
    }

    fn discover_chips(&self) -> Vec<HwmonChip> {
        entries_with_prefix(&self.root.sys("class/hwmon"), "hwmon")
            .into_iter()
            .filter_map(|dir| {
                let name = read_attr(&dir.join("name"))?;
                let device = fs::canonicalize(dir.join("device")).ok();
                Some(HwmonChip {
                    kind: classify_chip(&name),
                    dir,
                    name,
                    device,
                })
            })
            .collect()
    }

    fn discover_rapl(&self) -> Vec<RaplDomain> {
        entries_with_prefix(&self.root.sys("class/powercap"), "intel-rapl:")
            .into_iter()
            .filter_map(|dir| {
                let domain = read_attr(&dir.join("name"))?;
                let energy_path = dir.join("energy_uj");
                // Reading energy_uj needs root on recent kernels.
                fs::read_to_string(&energy_path).ok()?;
                let max_range = read_attr(&dir.join("max_energy_range_uj"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(u64::MAX);
                Some(RaplDomain {
                    label: rapl_label(&domain),
                    energy_path,
                    max_range,
                })
            })
            .collect()
    }

    fn rapl_sensors(&mut self, now: Instant) -> Vec<Sensor> {
        let mut sensors = Vec::new();
        for domain in &self.rapl {
            let Some(current) = read_attr(&domain.energy_path).and_then(|v| v.parse::<u64>().ok())
            else {
                continue;
            };
            let key = domain.energy_path.display().to_string();
            if let Some((previous, at)) = self.rapl_last.insert(key, (current, now)) {
                let joules = energy_delta(previous, current, domain.max_range) as f64;
                let watts = rate(joules, 0.0, now.saturating_duration_since(at)) / 1_000_000.0;
                sensors.push(Sensor::new(domain.label.clone(), SensorKind::Power, watts));
            }
        }
        sensors
    }

    fn cpu_node(&mut self, now: Instant) -> Option<HardwareNode> {
        let system = self.system.as_mut()?;
        system.refresh_cpu_usage();
        system.refresh_cpu_frequency();

        let brand = system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_else(|| "CPU".to_string());
        let mut node = HardwareNode::new(HardwareKind::Cpu, brand, "/cpu/0");
        node.sensors.push(Sensor::new(
            "CPU Total",
            SensorKind::Load,
            system.global_cpu_usage() as f64,
        ));
        for cpu in system.cpus() {
            let index = core_index(cpu.name()).unwrap_or(0);
            node.sensors.push(Sensor::new(
                format!("CPU Core #{}", index + 1),
                SensorKind::Load,
                cpu.cpu_usage() as f64,
            ));
            if cpu.frequency() > 0 {
                node.sensors.push(Sensor::new(
                    format!("Core #{} Clock", index + 1),
                    SensorKind::Clock,
                    cpu.frequency() as f64,
                ));
            }
        }

        for chip in self.chips.iter().filter(|c| c.kind == HardwareKind::Cpu) {
            node.sensors.extend(read_hwmon_sensors(&chip.dir, &chip.name));
        }
        node.sensors.extend(self.rapl_sensors(now));
        Some(node)
    }

    fn memory_node(&mut self) -> Option<HardwareNode> {
        let system = self.system.as_mut()?;
        system.refresh_memory();
        let total = system.total_memory() as f64;
        if total <= 0.0 {
            return None;
        }
        let used = system.used_memory() as f64;
        let available = system.available_memory() as f64;

        let mut node = HardwareNode::new(HardwareKind::Memory, "Total Memory", "/ram");
        node.sensors.push(Sensor::new("Memory", SensorKind::Load, used / total * 100.0));
        node.sensors.push(Sensor::new("Memory Used", SensorKind::Data, used / GIB));
        node.sensors.push(Sensor::new("Memory Available", SensorKind::Data, available / GIB));
        Some(node)
    }

    fn gpu_nodes(&self) -> Vec<HardwareNode> {
        self.cards
            .iter()
            .map(|card| {
                let mut node = HardwareNode::new(HardwareKind::Gpu, card.name.clone(), card.pdev.clone());
                if let Some(busy) = scaled(&card.device_dir.join("gpu_busy_percent"), 1.0) {
                    node.sensors.push(Sensor::new("GPU Core", SensorKind::Load, busy));
                }
                if let Some(used) = scaled(&card.device_dir.join("mem_info_vram_used"), MIB) {
                    node.sensors.push(Sensor::new("GPU Memory Used", SensorKind::SmallData, used));
                }
                if let Some(total) = scaled(&card.device_dir.join("mem_info_vram_total"), MIB) {
                    node.sensors.push(Sensor::new("GPU Memory Total", SensorKind::SmallData, total));
                }
                let canonical = fs::canonicalize(&card.device_dir).ok();
                for chip in self
                    .chips
                    .iter()
                    .filter(|c| c.kind == HardwareKind::Gpu && c.device.is_some() && c.device == canonical)
                {
                    node.sensors.extend(read_hwmon_sensors(&chip.dir, &chip.name));
                }
                node
            })
            .collect()
    }

    fn chip_nodes(&self, kind: HardwareKind) -> Vec<HardwareNode> {
        self.chips
            .iter()
            .filter(|c| c.kind == kind)
            .map(|chip| {
                let mut node = HardwareNode::new(kind, chip.name.clone(), chip.dir.display().to_string());
                node.sensors = read_hwmon_sensors(&chip.dir, &chip.name);
                node
            })
            .collect()
    }
}

impl CounterSource for LinuxSensorProvider {
    type Reading = Vec<HardwareNode>;

    fn open(&mut self) -> TelemetryResult<()> {
        let mut system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        system.refresh_cpu_usage();
        if system.cpus().is_empty() {
            return Err(TelemetryError::Unavailable("processor sensors".into()));
        }
        self.system = Some(system);

        self.chips = self.discover_chips();
        self.rapl = self.discover_rapl();
        self.cards = drm_cards(&self.root);

        let has = |kind: HardwareKind| self.chips.iter().any(|c| c.kind == kind);
        self.capabilities = SensorCapabilities {
            cpu_power: !self.rapl.is_empty(),
            gpu: !self.cards.is_empty() || has(HardwareKind::Gpu),
            board: has(HardwareKind::Motherboard),
            storage: has(HardwareKind::Storage),
        };
        tracing::debug!(capabilities = ?self.capabilities, chips = self.chips.len(), "sensor provider opened");
        Ok(())
    }

    fn read(&mut self) -> TelemetryResult<Vec<HardwareNode>> {
        let now = Instant::now();
        let mut nodes = Vec::new();
        nodes.extend(self.cpu_node(now));
        nodes.extend(self.memory_node());
        if self.capabilities.gpu {
            nodes.extend(self.gpu_nodes());
        }
        if self.capabilities.board {
            nodes.extend(self.chip_nodes(HardwareKind::Motherboard));
        }
        if self.capabilities.storage {
            nodes.extend(self.chip_nodes(HardwareKind::Storage));
        }
        Ok(nodes)
    }
}

impl SensorProvider for LinuxSensorProvider {
    fn capabilities(&self) -> SensorCapabilities {
        self.capabilities
    }
}
