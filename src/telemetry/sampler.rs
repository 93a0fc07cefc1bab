//! System snapshot sampler
//!
//! One shared service object that owns every expensive telemetry resource
//! and answers per-family queries (`sample_cpu`, `sample_gpu`, ...). The
//! hardware tree is refreshed by `update()` under a lock; the per-family
//! queries read the last published tree without taking it. Each family is
//! independent: a failing source only degrades its own metric.

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::format::{cores_and_threads, format_rate, format_used_of_total, normalize_gpu_memory};
use super::history::{HistoryBuffer, NETWORK_HISTORY};
use super::inventory::{self as heuristics, MediaKind, MemoryModule, VideoController};
use super::models::{
    ConnectionKind, CpuInfo, DiskProcessInfo, GpuInfo, NetworkInfo, NetworkProcessInfo, RamInfo,
    StorageInfo, SystemSnapshot,
};
use super::rate::{rate, sanitize, sanitize_percent, RateTracker};
use super::resolver::{first_text, Candidate, Fallback, MetricResolver, ScoringRule, SourceTag};
use super::resource::{CounterSource, ManagedResource, ResourceState};
use super::throttle::{BackgroundRefresh, Throttled};
use super::trace::{pid_rates, TraceEventSource, TraceSession, TraceTotals};
use crate::config::SettingsStore;
use crate::platform::linux::inventory::parent_device;
use crate::platform::linux::{
    DiskIdleCounters, HostRoot, LinuxHost, LinuxInventory, LinuxSensorProvider, NicCounters,
    ProcIoPoller, ProcStatCpu,
};
use crate::platform::{
    candidates_of, CpuLoad, HardwareKind, HardwareNode, HostQueries, InterfaceCounters,
    InventoryProvider, ProcessorInventory, SensorCapabilities, SensorKind, SensorProvider,
    VolumeInfo,
};

/// Volume and adapter lists are re-enumerated on this period, not per tick.
const INSTANCE_REFRESH: Duration = Duration::from_secs(5);
/// Top-talker reads are served from cache within this window.
const TOP_TALKER_THROTTLE: Duration = Duration::from_secs(1);
const TOP_NETWORK_PROCESSES: usize = 3;
/// Samples closer together than this carry no usable rate.
const MIN_NETWORK_ELAPSED: Duration = Duration::from_millis(100);

static CPU_TEMPERATURE: Lazy<ScoringRuleSet> = Lazy::new(|| {
    let scored = |rule: ScoringRule| {
        rule.score("TDIE", 100)
            .score("TCTL", 90)
            .score("PACKAGE", 85)
            .score("CPU DIE", 80)
            .score("CORE MAX", 75)
            .score("CCD", 60)
            .score("CPU", 50)
            .score("CORE", 40)
    };
    ScoringRuleSet {
        primary: scored(ScoringRule::new(0.0, 150.0)),
        broad: scored(
            ScoringRule::new(0.0, 150.0)
                .include(&["CPU", "SOCKET", "TDIE", "TCTL", "PACKAGE", "CORE"])
                .exclude(&["VRM", "PCH", "CHIPSET", "GPU", "SYSTEM", "AMBIENT"]),
        ),
    }
});

static ZONE_TEMPERATURE: Lazy<ScoringRule> = Lazy::new(|| {
    ScoringRule::new(0.0, 150.0)
        .score("X86_PKG", 100)
        .score("CPU", 80)
        .score("SOC", 70)
        .score("ACPI", 40)
});

static CPU_POWER: Lazy<ScoringRuleSet> = Lazy::new(|| {
    ScoringRuleSet {
        primary: ScoringRule::new(0.5, 400.0)
            .score("PACKAGE", 100)
            .score("SOCKET", 90)
            .score("SOC", 80)
            .score("CORE", 60)
            .score("CPU", 50),
        broad: ScoringRule::new(0.5, 500.0)
            .score("PACKAGE", 100)
            .score("SOCKET", 90)
            .score("SOC", 80)
            .score("CPU", 70)
            .score("CORE", 60)
            .score("PPT", 50)
            .include(&["CPU", "PACKAGE", "SOCKET", "SOC", "PPT", "CORE"])
            .exclude(&["GPU"]),
    }
});

static CPU_VOLTAGE: Lazy<ScoringRuleSet> = Lazy::new(|| {
    let scored = |rule: ScoringRule, cpu: i32| {
        rule.score("VCORE", 100)
            .score_all(&["VDDCR", "CPU"], 95)
            .score("CORE", 80)
            .score("CPU", cpu)
            .score("VID", 50)
    };
    ScoringRuleSet {
        primary: scored(ScoringRule::new(0.2, 2.5), 60),
        broad: scored(ScoringRule::new(0.2, 2.5).exclude(&["GPU"]), 70),
    }
});

static GPU_TEMPERATURE: Lazy<ScoringRule> = Lazy::new(|| {
    ScoringRule::new(0.0, 150.0)
        .score("EDGE", 100)
        .score("GPU", 80)
        .score("JUNCTION", 60)
});

/// A metric's rule for its own hardware node plus a broader rule for
/// board-level sensors.
struct ScoringRuleSet {
    primary: ScoringRule,
    broad: ScoringRule,
}

/// Everything the sampler reads from.
pub struct SamplerSources {
    pub sensors: Box<dyn SensorProvider>,
    pub cpu: Box<dyn CounterSource<Reading = CpuLoad>>,
    pub disks: Box<dyn CounterSource<Reading = HashMap<String, f64>>>,
    pub network: Box<dyn CounterSource<Reading = Vec<InterfaceCounters>>>,
    pub trace: TraceSession,
    pub inventory: Arc<dyn InventoryProvider>,
    pub host: Arc<dyn HostQueries>,
}

impl SamplerSources {
    pub fn linux(root: HostRoot) -> Self {
        let trace_root = root.clone();
        Self {
            sensors: Box::new(LinuxSensorProvider::new(root.clone())),
            cpu: Box::new(ProcStatCpu::new(root.clone())),
            disks: Box::new(DiskIdleCounters::new(root.clone())),
            network: Box::new(NicCounters::new()),
            trace: TraceSession::new(move || {
                Box::new(ProcIoPoller::new(trace_root.clone())) as Box<dyn TraceEventSource>
            }),
            inventory: Arc::new(LinuxInventory::new(root.clone())),
            host: Arc::new(LinuxHost::new(root)),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryInventory {
    modules: Vec<MemoryModule>,
    slots: usize,
}

struct NetworkState {
    last: Option<(HashMap<String, (u64, u64)>, Instant)>,
    trace_last: Option<(Arc<TraceTotals>, Instant)>,
    upload_mbps: HistoryBuffer,
    download_mbps: HistoryBuffer,
}

struct DiskTraceState {
    throttle: Throttled<Option<DiskProcessInfo>>,
    last: Option<(Arc<TraceTotals>, Instant)>,
}

type IoTrackers = Arc<Mutex<(RateTracker<u32>, RateTracker<u32>)>>;

pub struct SystemSnapshotSampler {
    settings: Arc<SettingsStore>,
    update_lock: Mutex<()>,
    hardware: RwLock<Arc<Vec<HardwareNode>>>,

    sensors: Mutex<ManagedResource<Box<dyn SensorProvider>>>,
    cpu_counters: Mutex<ManagedResource<Box<dyn CounterSource<Reading = CpuLoad>>>>,
    disk_idle: Mutex<ManagedResource<Box<dyn CounterSource<Reading = HashMap<String, f64>>>>>,
    nic: Mutex<ManagedResource<Box<dyn CounterSource<Reading = Vec<InterfaceCounters>>>>>,
    trace: Mutex<ManagedResource<TraceSession>>,

    inventory: Arc<dyn InventoryProvider>,
    host: Arc<dyn HostQueries>,
    processor: OnceCell<Option<ProcessorInventory>>,
    memory_inventory: OnceCell<MemoryInventory>,
    controllers: Mutex<Throttled<Arc<Vec<VideoController>>>>,
    volumes: Mutex<Throttled<Arc<Vec<VolumeInfo>>>>,
    media_kinds: Mutex<HashMap<String, MediaKind>>,
    disk_activity: Mutex<HashMap<String, f64>>,

    network: Mutex<NetworkState>,
    network_top: BackgroundRefresh<Vec<NetworkProcessInfo>>,
    disk_trace: Mutex<DiskTraceState>,
    disk_top: BackgroundRefresh<Option<DiskProcessInfo>>,
    io_trackers: IoTrackers,
}

impl SystemSnapshotSampler {
    /// Nothing is opened here; every resource opens on first use.
    pub fn new(sources: SamplerSources, settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            update_lock: Mutex::new(()),
            hardware: RwLock::new(Arc::new(Vec::new())),
            sensors: Mutex::new(ManagedResource::new("sensor tree", sources.sensors)),
            cpu_counters: Mutex::new(ManagedResource::new("processor counters", sources.cpu)),
            disk_idle: Mutex::new(ManagedResource::new("disk idle counters", sources.disks)),
            nic: Mutex::new(ManagedResource::new("interface counters", sources.network)),
            trace: Mutex::new(ManagedResource::new("kernel trace", sources.trace)),
            inventory: sources.inventory,
            host: sources.host,
            processor: OnceCell::new(),
            memory_inventory: OnceCell::new(),
            controllers: Mutex::new(Throttled::new(INSTANCE_REFRESH)),
            volumes: Mutex::new(Throttled::new(INSTANCE_REFRESH)),
            media_kinds: Mutex::new(HashMap::new()),
            disk_activity: Mutex::new(HashMap::new()),
            network: Mutex::new(NetworkState {
                last: None,
                trace_last: None,
                upload_mbps: HistoryBuffer::new(NETWORK_HISTORY),
                download_mbps: HistoryBuffer::new(NETWORK_HISTORY),
            }),
            network_top: BackgroundRefresh::new(TOP_TALKER_THROTTLE, Vec::new()),
            disk_trace: Mutex::new(DiskTraceState {
                throttle: Throttled::new(TOP_TALKER_THROTTLE),
                last: None,
            }),
            disk_top: BackgroundRefresh::new(TOP_TALKER_THROTTLE, None),
            io_trackers: Arc::new(Mutex::new((RateTracker::new(), RateTracker::new()))),
        }
    }

    pub fn linux(settings: Arc<SettingsStore>) -> Self {
        Self::new(SamplerSources::linux(HostRoot::system()), settings)
    }

    /// Refresh the hardware tree. Concurrent callers serialize here.
    pub fn update(&self) {
        let _guard = self.update_lock.lock();
        if let Some(nodes) = self.sensors.lock().read() {
            *self.hardware.write() = Arc::new(nodes);
        }
    }

    /// The last published hardware tree.
    pub fn hardware(&self) -> Arc<Vec<HardwareNode>> {
        Arc::clone(&self.hardware.read())
    }

    pub fn capabilities(&self) -> SensorCapabilities {
        self.sensors.lock().source().capabilities()
    }

    pub fn resource_states(&self) -> Vec<(&'static str, ResourceState)> {
        vec![
            ("sensor tree", self.sensors.lock().state()),
            ("processor counters", self.cpu_counters.lock().state()),
            ("disk idle counters", self.disk_idle.lock().state()),
            ("interface counters", self.nic.lock().state()),
            ("kernel trace", self.trace.lock().state()),
        ]
    }

    /// One full pass.
    pub fn snapshot(&self) -> SystemSnapshot {
        self.update();
        SystemSnapshot {
            cpu: self.sample_cpu(),
            ram: self.sample_memory(),
            gpus: self.sample_gpu(),
            storage: self.sample_disk(),
            network: self.sample_network(),
            top_disk_process: self.sample_top_disk_process(),
        }
    }

    fn processor(&self) -> Option<&ProcessorInventory> {
        self.processor
            .get_or_init(|| match self.inventory.processor() {
                Ok(inv) => Some(inv),
                Err(err) => {
                    tracing::debug!(error = %err, "processor inventory unavailable");
                    None
                }
            })
            .as_ref()
    }

    pub fn sample_cpu(&self) -> CpuInfo {
        let hw = self.hardware();
        let load = self.cpu_counters.lock().read();

        let sensor_cores = per_core_from_sensors(&hw);
        let per_core: Vec<f64> = match &load {
            Some(l) if !l.per_core.is_empty() => l.per_core.clone(),
            _ => sensor_cores,
        }
        .into_iter()
        .map(sanitize_percent)
        .collect();

        let usage = Fallback::new()
            .then(SourceTag::PerformanceCounter, || {
                load.as_ref().map(|l| l.total).filter(|v| v.is_finite())
            })
            .then(SourceTag::HardwareSensor, || {
                cpu_nodes(&hw).find_map(|n| n.sensor(SensorKind::Load, "CPU Total"))
            })
            .then(SourceTag::Estimate, || average(&per_core))
            .resolve();

        let temperature = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &CPU_TEMPERATURE.primary, || {
                candidates_of(&hw, HardwareKind::Cpu, SensorKind::Temperature)
            })
            .candidates(SourceTag::BoardSensor, &CPU_TEMPERATURE.broad, || {
                candidates_of(&hw, HardwareKind::Motherboard, SensorKind::Temperature)
            })
            .candidates(SourceTag::ThermalZone, &ZONE_TEMPERATURE, || {
                self.host.thermal_zones().unwrap_or_default()
            })
            .resolve();

        let power = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &CPU_POWER.primary, || {
                candidates_of(&hw, HardwareKind::Cpu, SensorKind::Power)
            })
            .estimate(SourceTag::HardwareSensor, || {
                rail_sum(&candidates_of(&hw, HardwareKind::Cpu, SensorKind::Power))
            })
            .candidates(SourceTag::BoardSensor, &CPU_POWER.broad, || {
                candidates_of(&hw, HardwareKind::Motherboard, SensorKind::Power)
            })
            .estimate(SourceTag::BoardSensor, || {
                rail_sum(&candidates_of(&hw, HardwareKind::Motherboard, SensorKind::Power))
            })
            .estimate(SourceTag::Estimate, || voltage_times_current(&hw))
            .resolve();

        let voltage = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &CPU_VOLTAGE.primary, || {
                candidates_of(&hw, HardwareKind::Cpu, SensorKind::Voltage)
            })
            .candidates(SourceTag::BoardSensor, &CPU_VOLTAGE.broad, || {
                candidates_of(&hw, HardwareKind::Motherboard, SensorKind::Voltage)
            })
            .resolve();

        let clock = MetricResolver::new()
            .estimate(SourceTag::HardwareSensor, || sensor_clock_mhz(&hw).map(|mhz| mhz / 1000.0))
            .estimate(SourceTag::PerformanceCounter, || {
                self.host.cpu_frequency_mhz().ok().map(|mhz| mhz / 1000.0)
            })
            .resolve();

        let logical_hint = per_core.len();
        let ((physical, logical), cores_source) = Fallback::new()
            .then(SourceTag::HardwareSensor, || sensor_core_counts(&hw))
            .then(SourceTag::Inventory, || {
                self.processor()
                    .filter(|p| p.logical_processors > 0)
                    .map(|p| {
                        let physical = if p.physical_cores > 0 {
                            p.physical_cores
                        } else {
                            infer_physical_cores(p.logical_processors)
                        };
                        (physical, p.logical_processors)
                    })
            })
            .then(SourceTag::Estimate, || {
                let logical = if logical_hint > 0 {
                    logical_hint
                } else {
                    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
                };
                Some((infer_physical_cores(logical), logical))
            })
            .resolve()
            .unwrap_or(((1, 1), SourceTag::None));

        let name = first_text(vec![
            Box::new(|| self.processor().map(|p| p.name.clone())),
            Box::new(|| cpu_nodes(&hw).next().map(|n| n.name.clone())),
        ]);

        let (usage_value, usage_source) = usage.unwrap_or((0.0, SourceTag::None));
        CpuInfo {
            name,
            usage: sanitize_percent(usage_value),
            per_core_usage: per_core,
            temperature_c: temperature.value_or_zero(),
            clock_ghz: clock.value_or_zero(),
            power_watts: power.value_or_zero(),
            voltage_volts: voltage.value_or_zero(),
            physical_cores: physical,
            logical_processors: logical,
            cores_and_threads: cores_and_threads(physical, logical),
            usage_source,
            temperature_source: temperature.source,
            power_source: power.source,
            voltage_source: voltage.source,
            clock_source: clock.source,
            cores_source,
        }
    }

    fn memory_inventory(&self) -> &MemoryInventory {
        self.memory_inventory.get_or_init(|| {
            let modules = self.inventory.memory_modules().unwrap_or_else(|err| {
                tracing::debug!(error = %err, "memory modules unavailable");
                Vec::new()
            });
            let slots = self.inventory.memory_slots().unwrap_or(0);
            MemoryInventory { modules, slots }
        })
    }

    pub fn sample_memory(&self) -> RamInfo {
        let hw = self.hardware();
        let mut info = RamInfo::default();

        if let Some(node) = hw.iter().find(|n| n.kind == HardwareKind::Memory) {
            let used = node.sensor(SensorKind::Data, "Memory Used");
            let available = node.sensor(SensorKind::Data, "Memory Available");
            if let (Some(used), Some(available)) = (used, available) {
                info.used_gb = sanitize(used).max(0.0);
                info.available_gb = sanitize(available).max(0.0);
                info.total_gb = info.used_gb + info.available_gb;
                info.usage = sanitize_percent(node.sensor(SensorKind::Load, "Memory").unwrap_or_else(|| {
                    if info.total_gb > 0.0 {
                        info.used_gb / info.total_gb * 100.0
                    } else {
                        0.0
                    }
                }));
                info.source = SourceTag::HardwareSensor;
            }
        }

        match self.inventory.memory_extended() {
            Ok(ext) => {
                info.committed_gb = super::format::bytes_to_gb(ext.committed);
                info.cached_gb = super::format::bytes_to_gb(ext.cached);
                info.paged_pool_gb = super::format::bytes_to_gb(ext.paged_pool);
                info.non_paged_pool_gb = super::format::bytes_to_gb(ext.non_paged_pool);
            }
            Err(err) => tracing::trace!(error = %err, "extended memory counters unavailable"),
        }

        let inv = self.memory_inventory();
        let vendor = self.processor().map(|p| p.vendor.clone()).unwrap_or_default();
        let manufacturers: Vec<String> = inv.modules.iter().map(|m| m.manufacturer.clone()).collect();
        let parts: Vec<String> = inv.modules.iter().map(|m| m.part_number.clone()).collect();

        info.type_and_speed = heuristics::type_and_speed(&inv.modules);
        info.module_configuration = heuristics::module_configuration(&inv.modules, info.total_gb);
        info.form_factor = heuristics::dominant_form_factor(&inv.modules).to_string();
        info.slots = heuristics::slots_summary(inv.modules.len(), inv.slots);
        info.overclock_profile = heuristics::overclock_profile(&inv.modules, &vendor)
            .unwrap_or_default()
            .to_string();
        if !inv.modules.is_empty() {
            info.brand = heuristics::ram_brand(&manufacturers, &parts);
        }
        info.part_number = parts.into_iter().find(|p| !p.trim().is_empty()).unwrap_or_default();
        info
    }

    fn video_controllers(&self) -> Arc<Vec<VideoController>> {
        self.controllers.lock().get_or_refresh(Instant::now(), || {
            Arc::new(self.inventory.video_controllers().unwrap_or_default())
        })
    }

    pub fn sample_gpu(&self) -> Vec<GpuInfo> {
        let hw = self.hardware();
        let controllers = self.video_controllers();

        let mut gpus: Vec<GpuInfo> = hw
            .iter()
            .filter(|n| n.kind == HardwareKind::Gpu)
            .map(|node| gpu_info(node, &controllers))
            .collect();

        pad_or_truncate(&mut gpus, self.settings.debug_gpu_count(), GpuInfo::emulated);
        gpus
    }

    fn media_kind(&self, device: &str) -> MediaKind {
        if let Some(kind) = self.media_kinds.lock().get(device) {
            return *kind;
        }
        let block = self.inventory.block_device(device).ok();
        let kind = Fallback::new()
            .then(SourceTag::Inventory, || {
                block
                    .as_ref()
                    .and_then(|b| b.rotational)
                    .map(|rotational| if rotational { MediaKind::Hdd } else { MediaKind::Ssd })
            })
            .then(SourceTag::Inventory, || {
                block
                    .as_ref()
                    .and_then(|b| heuristics::media_kind_from_model(&b.model))
            })
            .then(SourceTag::Estimate, || {
                (device.starts_with("nvme") || device.starts_with("mmcblk")).then_some(MediaKind::Ssd)
            })
            .resolve()
            .map(|(k, _)| k)
            .unwrap_or_default();
        self.media_kinds.lock().insert(device.to_string(), kind);
        kind
    }

    pub fn sample_disk(&self) -> Vec<StorageInfo> {
        let volumes = self.volumes.lock().get_or_refresh(Instant::now(), || {
            Arc::new(self.inventory.volumes().unwrap_or_else(|err| {
                tracing::debug!(error = %err, "volume enumeration failed");
                Vec::new()
            }))
        });
        let idle = self.disk_idle.lock().read();

        let mut storage = Vec::with_capacity(volumes.len());
        {
            let mut activity = self.disk_activity.lock();
            for volume in volumes.iter() {
                let raw = idle.as_ref().and_then(|idle| {
                    idle.get(&volume.device)
                        .or_else(|| idle.get(&parent_device(&volume.device)))
                        .map(|i| 100.0 - sanitize_percent(*i))
                });
                let smoothed = smooth_activity(activity.get(&volume.mount_point).copied(), raw);
                activity.insert(volume.mount_point.clone(), smoothed);

                let total_gb = super::format::bytes_to_gb(volume.total_bytes);
                let free_gb = super::format::bytes_to_gb(volume.available_bytes);
                storage.push(StorageInfo {
                    name: volume.name.clone(),
                    mount_point: volume.mount_point.clone(),
                    device: volume.device.clone(),
                    file_system: volume.file_system.clone(),
                    total_gb,
                    free_gb,
                    used_percent: if total_gb > 0.0 {
                        sanitize_percent((total_gb - free_gb) / total_gb * 100.0)
                    } else {
                        0.0
                    },
                    activity_percent: smoothed,
                    media_kind: MediaKind::Unknown,
                    is_system: volume.is_system,
                    is_emulated: false,
                });
            }
            activity.retain(|mount, _| volumes.iter().any(|v| &v.mount_point == mount));
        }

        for info in &mut storage {
            info.media_kind = self.media_kind(&info.device);
        }
        pad_or_truncate(&mut storage, self.settings.debug_disk_count(), StorageInfo::emulated);
        storage
    }

    fn trace_totals(&self) -> Option<Arc<TraceTotals>> {
        self.trace.lock().read()
    }

    pub fn sample_network(&self) -> NetworkInfo {
        let now = Instant::now();
        let traced = self.trace_totals().filter(|t| t.has_network);
        let counters = self.nic.lock().read().unwrap_or_default();
        let mut guard = self.network.lock();
        let state = &mut *guard;

        let primary = busiest_interface(state.last.as_ref().map(|(l, _)| l), &counters);
        let current: HashMap<String, (u64, u64)> = counters
            .iter()
            .map(|c| (c.name.clone(), (c.transmitted_bytes, c.received_bytes)))
            .collect();

        let mut rates = traced
            .and_then(|totals| {
                trace_network_rates(&mut state.trace_last, totals, now, |pid| self.host.process_name(pid))
            })
            .map(|(up, down, top)| (up, down, top, SourceTag::KernelTrace));

        // Samples too close together keep the old baseline and report zero.
        let too_soon = state
            .last
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) < MIN_NETWORK_ELAPSED);
        if !too_soon {
            if rates.is_none() {
                if let Some((previous, at)) = &state.last {
                    let (up, down) = nic_rates(previous, &current, now.saturating_duration_since(*at));
                    rates = Some((up, down, Vec::new(), SourceTag::PerformanceCounter));
                }
            }
            if !current.is_empty() {
                state.last = Some((current, now));
            }
        }

        let (up, down, mut top, source) = rates.unwrap_or((0.0, 0.0, Vec::new(), SourceTag::None));
        if source != SourceTag::None {
            state.upload_mbps.push(up / 1_000_000.0);
            state.download_mbps.push(down / 1_000_000.0);
        }
        if top.is_empty() {
            let host = Arc::clone(&self.host);
            top = self
                .network_top
                .get_or_kick(move || sockets_top(host.as_ref(), TOP_NETWORK_PROCESSES));
        }

        let ipv4 = primary
            .as_deref()
            .and_then(|p| self.host.ipv4_address(p))
            .unwrap_or_default();
        NetworkInfo {
            kind: primary.as_deref().map(connection_kind).unwrap_or_default(),
            interface: primary.unwrap_or_default(),
            connected: !ipv4.is_empty() || up > 0.0 || down > 0.0,
            ipv4,
            upload_bps: up,
            download_bps: down,
            upload_display: format_rate(up),
            download_display: format_rate(down),
            upload_history: state.upload_mbps.to_vec(),
            download_history: state.download_mbps.to_vec(),
            top_processes: top,
            source,
        }
    }

    pub fn sample_top_disk_process(&self) -> Option<DiskProcessInfo> {
        let now = Instant::now();
        if let Some(totals) = self.trace_totals() {
            let mut guard = self.disk_trace.lock();
            let DiskTraceState { throttle, last } = &mut *guard;
            return throttle.get_or_refresh(now, || {
                let top = match last.as_ref() {
                    Some((previous, at)) => {
                        let rates = pid_rates(previous, &totals, now.saturating_duration_since(*at));
                        rates
                            .into_iter()
                            .filter(|(_, r)| r.file_read + r.file_written > 0.0)
                            .max_by(|a, b| {
                                (a.1.file_read + a.1.file_written).total_cmp(&(b.1.file_read + b.1.file_written))
                            })
                            .map(|(pid, r)| DiskProcessInfo {
                                pid,
                                name: self.host.process_name(pid).unwrap_or_else(|| pid.to_string()),
                                read_bytes_per_sec: r.file_read,
                                write_bytes_per_sec: r.file_written,
                                source: SourceTag::KernelTrace,
                            })
                    }
                    None => None,
                };
                *last = Some((Arc::clone(&totals), now));
                top
            });
        }

        let host = Arc::clone(&self.host);
        let trackers = Arc::clone(&self.io_trackers);
        self.disk_top
            .get_or_kick(move || top_disk_by_counters(host.as_ref(), &trackers, Instant::now()))
    }
}

fn cpu_nodes(hw: &[HardwareNode]) -> impl Iterator<Item = &HardwareNode> {
    hw.iter().filter(|n| n.kind == HardwareKind::Cpu)
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// "CPU Core #N" loads ordered by N.
fn per_core_from_sensors(hw: &[HardwareNode]) -> Vec<f64> {
    let mut cores: Vec<(usize, f64)> = candidates_of(hw, HardwareKind::Cpu, SensorKind::Load)
        .into_iter()
        .filter_map(|c| {
            let index: usize = c.label.split('#').nth(1)?.trim().parse().ok()?;
            Some((index, c.value))
        })
        .collect();
    cores.sort_by_key(|(i, _)| *i);
    cores.into_iter().map(|(_, v)| v).collect()
}

fn sensor_clock_mhz(hw: &[HardwareNode]) -> Option<f64> {
    candidates_of(hw, HardwareKind::Cpu, SensorKind::Clock)
        .into_iter()
        .filter(|c| {
            let label = c.label.to_uppercase();
            ["EFFECTIVE", "AVERAGE", "CORE", "CPU"].iter().any(|k| label.contains(k))
        })
        .map(|c| c.value)
        .filter(|v| v.is_finite() && *v > 0.0)
        .reduce(f64::max)
}

fn sensor_core_counts(hw: &[HardwareNode]) -> Option<(usize, usize)> {
    let node = cpu_nodes(hw).next()?;
    let find = |name: &str| {
        node.sensors
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .and_then(|s| s.value)
            .filter(|v| *v >= 1.0)
            .map(|v| v as usize)
    };
    let physical = find("Core Count")?;
    let logical = find("Thread Count").unwrap_or(physical);
    Some((physical, logical))
}

/// Two hardware threads per core when the count is even.
pub fn infer_physical_cores(logical: usize) -> usize {
    if logical >= 2 && logical % 2 == 0 {
        logical / 2
    } else {
        logical.max(1)
    }
}

/// Sum of the individual CPU rails when no package reading exists.
pub fn rail_sum(candidates: &[Candidate]) -> Option<f64> {
    let sum: f64 = candidates
        .iter()
        .filter(|c| {
            let label = c.label.to_uppercase();
            !label.contains("GPU")
                && ["IA", "CORE", "UNCORE", "DRAM", "SOC", "SOCKET"]
                    .iter()
                    .any(|k| label.contains(k))
        })
        .map(|c| c.value)
        .filter(|v| v.is_finite() && *v > 0.0)
        .sum();
    (sum > 1.0 && sum < 500.0).then_some(sum)
}

/// Last resort: core voltage times core current.
fn voltage_times_current(hw: &[HardwareNode]) -> Option<f64> {
    let voltages: Vec<Candidate> = hw
        .iter()
        .filter(|n| matches!(n.kind, HardwareKind::Cpu | HardwareKind::Motherboard))
        .flat_map(|n| n.candidates(SensorKind::Voltage))
        .collect();
    let voltage = CPU_VOLTAGE.broad.pick(&voltages)?;
    let current = hw
        .iter()
        .flat_map(|n| n.candidates(SensorKind::Current))
        .filter(|c| {
            let label = c.label.to_uppercase();
            !label.contains("GPU")
                && ["CPU", "CORE", "VCORE", "IA"].iter().any(|k| label.contains(k))
        })
        .map(|c| c.value)
        .filter(|a| *a > 1.0 && *a < 200.0)
        .reduce(f64::max)?;
    Some((voltage * current).clamp(0.0, 500.0))
}

fn gpu_info(node: &HardwareNode, controllers: &[VideoController]) -> GpuInfo {
    let usage = node
        .sensor(SensorKind::Load, "GPU Core")
        .or_else(|| {
            node.candidates(SensorKind::Load)
                .into_iter()
                .map(|c| c.value)
                .reduce(f64::max)
        })
        .unwrap_or(0.0);
    let temperature = GPU_TEMPERATURE
        .pick(&node.candidates(SensorKind::Temperature))
        .unwrap_or(0.0);

    let raw = |name: &str| {
        node.sensor(SensorKind::SmallData, name)
            .or_else(|| node.sensor(SensorKind::Data, name))
            .unwrap_or(0.0)
    };
    let (used_gb, total_gb) = normalize_gpu_memory(raw("GPU Memory Used"), raw("GPU Memory Total"));

    let driver = heuristics::match_driver(&node.name, controllers);
    GpuInfo {
        name: node.name.clone(),
        adapter_key: node.identifier.clone(),
        usage: sanitize_percent(usage),
        temperature_c: temperature,
        memory_used_gb: used_gb,
        memory_total_gb: total_gb,
        memory_display: format_used_of_total(used_gb, total_gb),
        driver_version: driver.map(|d| d.driver_version.clone()).unwrap_or_default(),
        driver_date: driver.map(|d| d.driver_date.clone()).unwrap_or_default(),
        is_emulated: false,
    }
}

/// Cap or pad a hardware list to the debug emulation count. Real entries
/// always come first.
pub fn pad_or_truncate<T>(items: &mut Vec<T>, target: Option<usize>, make: impl Fn(usize) -> T) {
    let Some(target) = target else {
        return;
    };
    items.truncate(target);
    for index in items.len()..target {
        items.push(make(index));
    }
}

/// Light smoothing of drive activity: `prev * 0.6 + raw * 0.4`.
pub fn smooth_activity(previous: Option<f64>, raw: Option<f64>) -> f64 {
    match (previous, raw) {
        (Some(prev), Some(raw)) => sanitize_percent(prev * 0.6 + raw * 0.4),
        (None, Some(raw)) => sanitize_percent(raw),
        (_, None) => 0.0,
    }
}

pub fn connection_kind(interface: &str) -> ConnectionKind {
    if interface.starts_with("wl") || interface.starts_with("wifi") {
        ConnectionKind::WiFi
    } else if interface.starts_with("en") || interface.starts_with("eth") {
        ConnectionKind::Ethernet
    } else {
        ConnectionKind::Unknown
    }
}

/// Interface that moved the most bytes since the previous sample, falling
/// back to the one with the largest lifetime totals.
fn busiest_interface(
    previous: Option<&HashMap<String, (u64, u64)>>,
    current: &[InterfaceCounters],
) -> Option<String> {
    current
        .iter()
        .max_by_key(|c| {
            let total = c.transmitted_bytes.saturating_add(c.received_bytes);
            let delta = previous
                .and_then(|p| p.get(&c.name))
                .map(|(tx, rx)| total.saturating_sub(tx.saturating_add(*rx)))
                .unwrap_or(0);
            (delta, total)
        })
        .map(|c| c.name.clone())
}

/// Upload and download bits per second summed over interfaces present in
/// both samples.
pub fn nic_rates(
    previous: &HashMap<String, (u64, u64)>,
    current: &HashMap<String, (u64, u64)>,
    elapsed: Duration,
) -> (f64, f64) {
    let mut up = 0.0;
    let mut down = 0.0;
    for (name, (tx, rx)) in current {
        if let Some((ptx, prx)) = previous.get(name) {
            up += rate(*tx as f64, *ptx as f64, elapsed) * 8.0;
            down += rate(*rx as f64, *prx as f64, elapsed) * 8.0;
        }
    }
    (up, down)
}

type NetworkRates = (f64, f64, Vec<NetworkProcessInfo>);

/// Rates from trace totals. The first call only records a baseline.
fn trace_network_rates(
    last: &mut Option<(Arc<TraceTotals>, Instant)>,
    totals: Arc<TraceTotals>,
    now: Instant,
    name_of: impl Fn(u32) -> Option<String>,
) -> Option<NetworkRates> {
    let previous = last.replace((Arc::clone(&totals), now))?;
    let elapsed = now.saturating_duration_since(previous.1);
    if elapsed.is_zero() {
        return None;
    }
    let up = rate(totals.net_sent as f64, previous.0.net_sent as f64, elapsed) * 8.0;
    let down = rate(totals.net_received as f64, previous.0.net_received as f64, elapsed) * 8.0;

    let mut per_pid: Vec<(u32, f64, f64)> = pid_rates(&previous.0, &totals, elapsed)
        .into_iter()
        .map(|(pid, r)| (pid, r.net_sent * 8.0, r.net_received * 8.0))
        .filter(|(_, u, d)| u + d > 0.0)
        .collect();
    per_pid.sort_by(|a, b| (b.1 + b.2).total_cmp(&(a.1 + a.2)).then(a.0.cmp(&b.0)));
    let top = per_pid
        .into_iter()
        .take(TOP_NETWORK_PROCESSES)
        .map(|(pid, up, down)| NetworkProcessInfo {
            pid,
            name: name_of(pid).unwrap_or_else(|| pid.to_string()),
            upload_bps: up,
            download_bps: down,
            connections: 0,
        })
        .collect();
    Some((up, down, top))
}

/// Processes with the most established outbound sockets. Without byte
/// accounting the connection count is the only activity signal.
pub fn sockets_top(host: &dyn HostQueries, limit: usize) -> Vec<NetworkProcessInfo> {
    let counts = match host.established_sockets() {
        Ok(counts) => counts,
        Err(err) => {
            tracing::debug!(error = %err, "socket table unavailable");
            return Vec::new();
        }
    };
    let mut ranked: Vec<(u32, usize)> = counts.into_iter().filter(|(pid, _)| *pid > 0).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(pid, connections)| NetworkProcessInfo {
            pid,
            name: host.process_name(pid).unwrap_or_else(|| pid.to_string()),
            upload_bps: 0.0,
            download_bps: 0.0,
            connections,
        })
        .collect()
}

/// Busiest process by read+write bytes/sec from per-process I/O counters.
fn top_disk_by_counters(
    host: &dyn HostQueries,
    trackers: &Mutex<(RateTracker<u32>, RateTracker<u32>)>,
    now: Instant,
) -> Option<DiskProcessInfo> {
    let io = host.process_io().ok()?;
    let mut guard = trackers.lock();
    let (reads, writes) = &mut *guard;

    let mut best: Option<DiskProcessInfo> = None;
    for p in &io {
        let read = reads.observe(p.pid, p.read_bytes as f64, now);
        let write = writes.observe(p.pid, p.write_bytes as f64, now);
        if read + write <= 0.0 {
            continue;
        }
        if best.as_ref().map_or(true, |b| read + write > b.total_bytes_per_sec()) {
            best = Some(DiskProcessInfo {
                pid: p.pid,
                name: p.name.clone(),
                read_bytes_per_sec: read,
                write_bytes_per_sec: write,
                source: SourceTag::PerformanceCounter,
            });
        }
    }

    let live: std::collections::HashSet<u32> = io.iter().map(|p| p.pid).collect();
    reads.retain(|pid| live.contains(pid));
    writes.retain(|pid| live.contains(pid));
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TelemetryError, TelemetryResult};
    use crate::platform::{BlockDeviceInfo, MemoryExtended, ProcessIo, Sensor};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSensors {
        nodes: Option<Vec<HardwareNode>>,
    }

    impl CounterSource for FakeSensors {
        type Reading = Vec<HardwareNode>;

        fn open(&mut self) -> TelemetryResult<()> {
            match self.nodes {
                Some(_) => Ok(()),
                None => Err(TelemetryError::Unavailable("sensors".into())),
            }
        }

        fn read(&mut self) -> TelemetryResult<Vec<HardwareNode>> {
            Ok(self.nodes.clone().unwrap_or_default())
        }
    }

    impl SensorProvider for FakeSensors {
        fn capabilities(&self) -> SensorCapabilities {
            SensorCapabilities::default()
        }
    }

    struct Fixed<T: Clone + Send>(Option<T>);

    impl<T: Clone + Send> CounterSource for Fixed<T> {
        type Reading = T;

        fn open(&mut self) -> TelemetryResult<()> {
            match self.0 {
                Some(_) => Ok(()),
                None => Err(TelemetryError::Unavailable("counter".into())),
            }
        }

        fn read(&mut self) -> TelemetryResult<T> {
            self.0
                .clone()
                .ok_or_else(|| TelemetryError::Unavailable("counter".into()))
        }
    }

    #[derive(Default)]
    struct FakeInventory {
        processor: Option<ProcessorInventory>,
        controllers: Vec<VideoController>,
        volumes: Vec<VolumeInfo>,
    }

    impl InventoryProvider for FakeInventory {
        fn processor(&self) -> TelemetryResult<ProcessorInventory> {
            self.processor
                .clone()
                .ok_or_else(|| TelemetryError::Unavailable("cpuinfo".into()))
        }
        fn memory_modules(&self) -> TelemetryResult<Vec<MemoryModule>> {
            Err(TelemetryError::PermissionDenied("dmi".into()))
        }
        fn memory_slots(&self) -> TelemetryResult<usize> {
            Err(TelemetryError::PermissionDenied("dmi".into()))
        }
        fn memory_extended(&self) -> TelemetryResult<MemoryExtended> {
            Ok(MemoryExtended::default())
        }
        fn video_controllers(&self) -> TelemetryResult<Vec<VideoController>> {
            Ok(self.controllers.clone())
        }
        fn volumes(&self) -> TelemetryResult<Vec<VolumeInfo>> {
            Ok(self.volumes.clone())
        }
        fn block_device(&self, _device: &str) -> TelemetryResult<BlockDeviceInfo> {
            Ok(BlockDeviceInfo {
                model: "Samsung SSD 980".into(),
                rotational: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeHost {
        zones: Vec<Candidate>,
        sockets: HashMap<u32, usize>,
        /// Successive `process_io` readings; the last one repeats.
        io: Mutex<Vec<Vec<ProcessIo>>>,
        io_reads: Arc<AtomicUsize>,
    }

    impl HostQueries for FakeHost {
        fn cpu_frequency_mhz(&self) -> TelemetryResult<f64> {
            Ok(3600.0)
        }
        fn thermal_zones(&self) -> TelemetryResult<Vec<Candidate>> {
            Ok(self.zones.clone())
        }
        fn established_sockets(&self) -> TelemetryResult<HashMap<u32, usize>> {
            Ok(self.sockets.clone())
        }
        fn process_io(&self) -> TelemetryResult<Vec<ProcessIo>> {
            self.io_reads.fetch_add(1, Ordering::SeqCst);
            let mut io = self.io.lock();
            if io.len() > 1 {
                Ok(io.remove(0))
            } else {
                Ok(io.first().cloned().unwrap_or_default())
            }
        }
        fn process_name(&self, pid: u32) -> Option<String> {
            Some(format!("proc{}", pid))
        }
        fn ipv4_address(&self, _interface: &str) -> Option<String> {
            None
        }
    }

    struct NoTrace;

    impl TraceEventSource for NoTrace {
        fn open(&mut self) -> TelemetryResult<()> {
            Err(TelemetryError::PermissionDenied("trace".into()))
        }
        fn next_batch(&mut self, _timeout: Duration) -> TelemetryResult<Vec<super::super::trace::TraceEvent>> {
            Ok(Vec::new())
        }
    }

    fn sampler(
        nodes: Option<Vec<HardwareNode>>,
        load: Option<CpuLoad>,
        inventory: FakeInventory,
        host: FakeHost,
    ) -> SystemSnapshotSampler {
        let sources = SamplerSources {
            sensors: Box::new(FakeSensors { nodes }),
            cpu: Box::new(Fixed(load)),
            disks: Box::new(Fixed::<HashMap<String, f64>>(Some(HashMap::from([(
                "nvme0n1".to_string(),
                60.0,
            )])))),
            network: Box::new(Fixed::<Vec<InterfaceCounters>>(None)),
            trace: TraceSession::new(|| Box::new(NoTrace) as Box<dyn TraceEventSource>),
            inventory: Arc::new(inventory),
            host: Arc::new(host),
        };
        SystemSnapshotSampler::new(sources, Arc::new(SettingsStore::default()))
    }

    fn cpu_node(sensors: Vec<Sensor>) -> HardwareNode {
        let mut node = HardwareNode::new(HardwareKind::Cpu, "Ryzen 7", "/cpu/0");
        node.sensors = sensors;
        node
    }

    #[test]
    fn test_cpu_prefers_os_counter_and_scored_temperature() {
        let s = sampler(
            Some(vec![cpu_node(vec![
                Sensor::new("CPU Total", SensorKind::Load, 90.0),
                Sensor::new("Tccd1", SensorKind::Temperature, 70.0),
                Sensor::new("Tctl", SensorKind::Temperature, 65.0),
                Sensor::new("CPU Package", SensorKind::Power, 88.0),
                Sensor::new("Core #1 Clock", SensorKind::Clock, 4500.0),
            ])]),
            Some(CpuLoad {
                total: 25.0,
                per_core: vec![20.0, 30.0],
            }),
            FakeInventory::default(),
            FakeHost::default(),
        );
        s.update();
        let cpu = s.sample_cpu();
        assert_eq!(cpu.usage, 25.0);
        assert_eq!(cpu.usage_source, SourceTag::PerformanceCounter);
        assert_eq!(cpu.temperature_c, 65.0);
        assert_eq!(cpu.power_watts, 88.0);
        assert_eq!(cpu.clock_ghz, 4.5);
        assert_eq!(cpu.name, "Ryzen 7");
        assert_eq!((cpu.physical_cores, cpu.logical_processors), (1, 2));
        assert_eq!(cpu.cores_source, SourceTag::Estimate);
    }

    #[test]
    fn test_cpu_falls_back_when_sensors_missing() {
        let s = sampler(
            None,
            None,
            FakeInventory {
                processor: Some(ProcessorInventory {
                    name: "Xeon".into(),
                    vendor: "GenuineIntel".into(),
                    physical_cores: 0,
                    logical_processors: 8,
                }),
                ..Default::default()
            },
            FakeHost {
                zones: vec![Candidate::new("acpitz", 48.0), Candidate::new("x86_pkg_temp", 55.0)],
                ..Default::default()
            },
        );
        s.update();
        let cpu = s.sample_cpu();
        assert_eq!(cpu.usage, 0.0);
        assert_eq!(cpu.usage_source, SourceTag::None);
        assert_eq!(cpu.temperature_c, 55.0);
        assert_eq!(cpu.temperature_source, SourceTag::ThermalZone);
        assert_eq!(cpu.clock_ghz, 3.6);
        assert_eq!(cpu.power_watts, 0.0);
        assert_eq!(cpu.cores_and_threads, "4C/8T");
        assert_eq!(cpu.name, "Xeon");
    }

    #[test]
    fn test_power_from_voltage_times_current() {
        let s = sampler(
            Some(vec![cpu_node(vec![
                Sensor::new("Vcore", SensorKind::Voltage, 1.2),
                Sensor::new("CPU Current", SensorKind::Current, 50.0),
            ])]),
            None,
            FakeInventory::default(),
            FakeHost::default(),
        );
        s.update();
        let cpu = s.sample_cpu();
        assert!((cpu.power_watts - 60.0).abs() < 1e-9);
        assert_eq!(cpu.power_source, SourceTag::Estimate);
        assert_eq!(cpu.voltage_volts, 1.2);
    }

    #[test]
    fn test_rail_sum_bounds() {
        assert_eq!(
            rail_sum(&[Candidate::new("IA Cores", 20.0), Candidate::new("DRAM", 3.0)]),
            Some(23.0)
        );
        assert_eq!(rail_sum(&[Candidate::new("GPU Core", 30.0)]), None);
        assert_eq!(rail_sum(&[Candidate::new("Core", 0.5)]), None);
    }

    #[test]
    fn test_infer_physical_cores() {
        assert_eq!(infer_physical_cores(16), 8);
        assert_eq!(infer_physical_cores(3), 3);
        assert_eq!(infer_physical_cores(1), 1);
        assert_eq!(infer_physical_cores(0), 1);
    }

    #[test]
    fn test_gpu_padding_and_driver_match() {
        let mut gpu = HardwareNode::new(HardwareKind::Gpu, "AMD Radeon RX 7900", "0000:03:00.0");
        gpu.sensors.push(Sensor::new("GPU Core", SensorKind::Load, 40.0));
        gpu.sensors.push(Sensor::new("GPU Memory Used", SensorKind::SmallData, 2048.0));
        gpu.sensors.push(Sensor::new("GPU Memory Total", SensorKind::SmallData, 8192.0));
        let s = sampler(
            Some(vec![gpu]),
            None,
            FakeInventory {
                controllers: vec![VideoController {
                    name: "AMD Radeon RX 7900".into(),
                    driver_version: "6.8.0".into(),
                    driver_date: String::new(),
                }],
                ..Default::default()
            },
            FakeHost::default(),
        );
        s.settings.update(|c| c.debug.gpu_count = 3);
        s.update();

        let gpus = s.sample_gpu();
        assert_eq!(gpus.len(), 3);
        assert_eq!(gpus[0].memory_display, "2.0 GB / 8.0 GB");
        assert_eq!(gpus[0].driver_version, "6.8.0");
        assert!(!gpus[0].is_emulated);
        assert_eq!(gpus[1].name, "Emulated GPU 1");
        assert_eq!(gpus[2].driver_version, "emulated");

        s.settings.update(|c| c.debug.gpu_count = 0);
        assert!(s.sample_gpu().is_empty());
    }

    #[test]
    fn test_disk_activity_smoothing_and_media_kind() {
        let s = sampler(
            None,
            None,
            FakeInventory {
                volumes: vec![VolumeInfo {
                    name: "/".into(),
                    mount_point: "/".into(),
                    device: "nvme0n1p2".into(),
                    file_system: "ext4".into(),
                    total_bytes: 100 * 1024 * 1024 * 1024,
                    available_bytes: 25 * 1024 * 1024 * 1024,
                    is_system: true,
                    is_removable: false,
                }],
                ..Default::default()
            },
            FakeHost::default(),
        );
        let first = s.sample_disk();
        assert_eq!(first.len(), 1);
        // idle 60 -> activity 40, looked up through the parent disk.
        assert_eq!(first[0].activity_percent, 40.0);
        assert_eq!(first[0].used_percent, 75.0);
        assert_eq!(first[0].media_kind, MediaKind::Ssd);
        let second = s.sample_disk();
        assert_eq!(second[0].activity_percent, 40.0);
    }

    #[test]
    fn test_smooth_activity() {
        assert_eq!(smooth_activity(Some(50.0), Some(100.0)), 70.0);
        assert_eq!(smooth_activity(None, Some(12.0)), 12.0);
        assert_eq!(smooth_activity(Some(50.0), None), 0.0);
    }

    #[test]
    fn test_pad_or_truncate() {
        let mut items = vec!["real0", "real1"];
        pad_or_truncate(&mut items, Some(1), |_| "emu");
        assert_eq!(items, vec!["real0"]);
        pad_or_truncate(&mut items, Some(3), |_| "emu");
        assert_eq!(items, vec!["real0", "emu", "emu"]);
        pad_or_truncate(&mut items, None, |_| "emu");
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_nic_rates_in_bits() {
        let prev = HashMap::from([("eth0".to_string(), (1_000u64, 5_000u64))]);
        let cur = HashMap::from([
            ("eth0".to_string(), (2_000u64, 9_000u64)),
            ("wlan0".to_string(), (10u64, 10u64)),
        ]);
        let (up, down) = nic_rates(&prev, &cur, Duration::from_secs(2));
        assert_eq!(up, 4_000.0);
        assert_eq!(down, 16_000.0);
    }

    #[test]
    fn test_connection_kind() {
        assert_eq!(connection_kind("wlp3s0"), ConnectionKind::WiFi);
        assert_eq!(connection_kind("enp4s0"), ConnectionKind::Ethernet);
        assert_eq!(connection_kind("tun0"), ConnectionKind::Unknown);
    }

    #[test]
    fn test_sockets_top_ranks_by_connection_count() {
        let host = FakeHost {
            sockets: HashMap::from([(10, 1), (20, 5), (30, 5), (40, 2)]),
            ..Default::default()
        };
        let top = sockets_top(&host, 3);
        let pids: Vec<u32> = top.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![20, 30, 40]);
        assert_eq!(top[0].name, "proc20");
    }

    #[test]
    fn test_trace_failure_is_disabled_once() {
        let s = sampler(None, None, FakeInventory::default(), FakeHost::default());
        assert!(s.trace_totals().is_none());
        let states = s.resource_states();
        assert!(states.contains(&("kernel trace", ResourceState::Disabled)));
    }

    #[test]
    fn test_trace_network_rates_need_baseline() {
        let mut last = None;
        let t0 = Instant::now();
        let mut totals = TraceTotals::default();
        totals.apply(&super::super::trace::TraceEvent {
            pid: 4,
            kind: super::super::trace::TraceEventKind::NetSend,
            bytes: 1000,
        });
        assert!(trace_network_rates(&mut last, Arc::new(totals.clone()), t0, |_| None).is_none());

        totals.apply(&super::super::trace::TraceEvent {
            pid: 4,
            kind: super::super::trace::TraceEventKind::NetSend,
            bytes: 500,
        });
        let (up, down, top) =
            trace_network_rates(&mut last, Arc::new(totals), t0 + Duration::from_secs(1), |_| {
                Some("curl".into())
            })
            .unwrap();
        assert_eq!(up, 4000.0);
        assert_eq!(down, 0.0);
        assert_eq!(top[0].name, "curl");
    }

    fn io(pid: u32, read_bytes: u64, write_bytes: u64) -> ProcessIo {
        ProcessIo {
            pid,
            name: format!("proc{}", pid),
            read_bytes,
            write_bytes,
        }
    }

    #[test]
    fn test_top_disk_by_counters_needs_baseline_and_prunes() {
        let host = FakeHost {
            io: Mutex::new(vec![
                vec![io(1, 1000, 0), io(2, 0, 0), io(3, 500, 500)],
                vec![io(1, 3000, 0), io(3, 1500, 2500), io(4, 1 << 30, 1 << 30)],
            ]),
            ..Default::default()
        };
        let trackers = Mutex::new((RateTracker::new(), RateTracker::new()));
        let t0 = Instant::now();

        // First sighting of every pid is only a baseline.
        assert_eq!(top_disk_by_counters(&host, &trackers, t0), None);

        let top = top_disk_by_counters(&host, &trackers, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(top.pid, 3);
        assert_eq!(top.name, "proc3");
        assert_eq!(top.read_bytes_per_sec, 1000.0);
        assert_eq!(top.write_bytes_per_sec, 2000.0);
        assert_eq!(top.source, SourceTag::PerformanceCounter);

        // Pid 2 vanished; pid 4 is new and has no rate yet.
        let guard = trackers.lock();
        assert!(guard.0.last(&2).is_none());
        assert!(guard.1.last(&2).is_none());
        assert!(guard.0.last(&4).is_some());
        assert_eq!(guard.0.len(), 3);
    }

    fn wait_for_refresh(s: &SystemSnapshotSampler) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.disk_top.is_refreshing() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_top_disk_process_refreshes_in_background_and_throttles() {
        let reads = Arc::new(AtomicUsize::new(0));
        let host = FakeHost {
            io: Mutex::new(vec![
                vec![io(7, 0, 0)],
                vec![io(7, 4096, 1024)],
            ]),
            io_reads: Arc::clone(&reads),
            ..Default::default()
        };
        let s = sampler(None, None, FakeInventory::default(), host);

        // Seed the baseline as an earlier tick would have.
        let t0 = Instant::now();
        assert_eq!(top_disk_by_counters(s.host.as_ref(), &s.io_trackers, t0), None);
        std::thread::sleep(Duration::from_millis(20));

        // The tick gets the cached value at once while the refresh runs elsewhere.
        assert_eq!(s.sample_top_disk_process(), None);
        wait_for_refresh(&s);
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        let top = s.disk_top.cached().unwrap();
        assert_eq!(top.pid, 7);
        assert!(top.read_bytes_per_sec > top.write_bytes_per_sec);

        // Inside the throttle window the cached winner is served without
        // another counter read.
        assert_eq!(s.sample_top_disk_process(), Some(top));
        wait_for_refresh(&s);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }
}
