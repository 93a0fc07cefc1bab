//! Hardware inventory from /proc, SMBIOS tables and sysfs

use std::fs;

use sysinfo::Disks;

use super::{drm_cards, entries_with_prefix, read_attr, HostRoot};
use crate::error::{read_to_string, TelemetryError, TelemetryResult};
use crate::platform::{BlockDeviceInfo, InventoryProvider, MemoryExtended, ProcessorInventory, VolumeInfo};
use crate::telemetry::inventory::{MemoryModule, VideoController};

/// Parse /proc/cpuinfo into name, vendor and core counts.
pub fn parse_cpuinfo(content: &str) -> ProcessorInventory {
    let mut inv = ProcessorInventory::default();
    let mut cores = std::collections::HashSet::new();
    let mut physical_id = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "processor" => inv.logical_processors += 1,
            "model name" if inv.name.is_empty() => inv.name = value.to_string(),
            "vendor_id" if inv.vendor.is_empty() => inv.vendor = value.to_string(),
            "physical id" => physical_id = value.to_string(),
            "core id" => {
                cores.insert((physical_id.clone(), value.to_string()));
            }
            _ => {}
        }
    }
    inv.physical_cores = cores.len();
    inv
}

fn meminfo_bytes(content: &str, key: &str) -> u64 {
    content
        .lines()
        .find_map(|l| l.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

pub fn parse_meminfo_extended(content: &str) -> MemoryExtended {
    MemoryExtended {
        committed: meminfo_bytes(content, "Committed_AS:"),
        cached: meminfo_bytes(content, "Cached:"),
        paged_pool: meminfo_bytes(content, "SReclaimable:"),
        non_paged_pool: meminfo_bytes(content, "SUnreclaim:"),
    }
}

fn smbios_u8(raw: &[u8], offset: usize) -> Option<u8> {
    raw.get(offset).copied()
}

fn smbios_u16(raw: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*raw.get(offset)?, *raw.get(offset + 1)?]))
}

fn smbios_u32(raw: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *raw.get(offset)?,
        *raw.get(offset + 1)?,
        *raw.get(offset + 2)?,
        *raw.get(offset + 3)?,
    ]))
}

/// String `index` (1-based) from the string set following the formatted area.
fn smbios_string(raw: &[u8], index: u8) -> String {
    let Some(len) = smbios_u8(raw, 1) else {
        return String::new();
    };
    if index == 0 || raw.len() <= len as usize {
        return String::new();
    }
    raw[len as usize..]
        .split(|b| *b == 0)
        .nth(index as usize - 1)
        .map(|s| String::from_utf8_lossy(s).trim().to_string())
        .unwrap_or_default()
}

/// Decode one SMBIOS type 17 (Memory Device) structure. Empty slots yield
/// `None`.
pub fn parse_memory_device(raw: &[u8]) -> Option<MemoryModule> {
    if smbios_u8(raw, 0)? != 17 {
        return None;
    }
    let size_field = smbios_u16(raw, 0x0C)?;
    let size_bytes = match size_field {
        0 | 0xFFFF => return None,
        0x7FFF => smbios_u32(raw, 0x1C).map(|mb| mb as u64 * 1024 * 1024)?,
        s if s & 0x8000 != 0 => (s & 0x7FFF) as u64 * 1024,
        s => s as u64 * 1024 * 1024,
    };

    Some(MemoryModule {
        size_bytes,
        form_factor: smbios_u8(raw, 0x0E).unwrap_or(0),
        memory_type: smbios_u8(raw, 0x12).unwrap_or(0),
        speed_mts: smbios_u16(raw, 0x15).unwrap_or(0) as u32,
        manufacturer: smbios_string(raw, smbios_u8(raw, 0x17).unwrap_or(0)),
        part_number: smbios_string(raw, smbios_u8(raw, 0x1A).unwrap_or(0)),
        configured_speed_mts: smbios_u16(raw, 0x20).unwrap_or(0) as u32,
    })
}

/// Total slots from SMBIOS type 16 (Physical Memory Array).
pub fn parse_memory_array_slots(raw: &[u8]) -> Option<usize> {
    if smbios_u8(raw, 0)? != 16 {
        return None;
    }
    smbios_u16(raw, 0x0D).map(|n| n as usize)
}

/// Parent disk of a partition ("nvme0n1p2" -> "nvme0n1", "sda1" -> "sda").
pub fn parent_device(device: &str) -> String {
    let trimmed = device.trim_end_matches(|c: char| c.is_ascii_digit());
    if device.starts_with("nvme") || device.starts_with("mmcblk") {
        match device.rfind('p') {
            Some(i) if i + 1 < device.len() && device[i + 1..].chars().all(|c| c.is_ascii_digit()) => {
                device[..i].to_string()
            }
            _ => device.to_string(),
        }
    } else if trimmed.is_empty() {
        device.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinuxInventory {
    root: HostRoot,
}

impl LinuxInventory {
    pub fn new(root: HostRoot) -> Self {
        Self { root }
    }

    fn dmi_entries(&self, kind: u8) -> TelemetryResult<Vec<Vec<u8>>> {
        let dir = self.root.sys("firmware/dmi/entries");
        if !dir.exists() {
            return Err(TelemetryError::Unavailable(dir.display().to_string()));
        }
        let mut raws = Vec::new();
        for entry in entries_with_prefix(&dir, &format!("{}-", kind)) {
            let path = entry.join("raw");
            match fs::read(&path) {
                Ok(raw) => raws.push(raw),
                Err(err) => return Err(TelemetryError::from_io(&path, err)),
            }
        }
        Ok(raws)
    }
}

impl InventoryProvider for LinuxInventory {
    fn processor(&self) -> TelemetryResult<ProcessorInventory> {
        let inv = parse_cpuinfo(&read_to_string(&self.root.proc("cpuinfo"))?);
        if inv.logical_processors == 0 {
            return Err(TelemetryError::parse("/proc/cpuinfo", "no processors"));
        }
        Ok(inv)
    }

    fn memory_modules(&self) -> TelemetryResult<Vec<MemoryModule>> {
        Ok(self
            .dmi_entries(17)?
            .iter()
            .filter_map(|raw| parse_memory_device(raw))
            .collect())
    }

    fn memory_slots(&self) -> TelemetryResult<usize> {
        let slots: usize = self
            .dmi_entries(16)?
            .iter()
            .filter_map(|raw| parse_memory_array_slots(raw))
            .sum();
        if slots == 0 {
            return Err(TelemetryError::Unavailable("memory array".into()));
        }
        Ok(slots)
    }

    fn memory_extended(&self) -> TelemetryResult<MemoryExtended> {
        Ok(parse_meminfo_extended(&read_to_string(&self.root.proc("meminfo"))?))
    }

    fn video_controllers(&self) -> TelemetryResult<Vec<VideoController>> {
        let cards = drm_cards(&self.root);
        if cards.is_empty() {
            return Err(TelemetryError::Unavailable("video controllers".into()));
        }
        let kernel = read_attr(&self.root.proc("sys/kernel/osrelease")).unwrap_or_default();
        Ok(cards
            .into_iter()
            .map(|card| {
                // Out-of-tree drivers carry a module version; in-tree ones
                // follow the kernel.
                let driver_version = read_attr(&self.root.sys(format!("module/{}/version", card.driver)))
                    .unwrap_or_else(|| kernel.clone());
                VideoController {
                    name: card.name,
                    driver_version,
                    driver_date: String::new(),
                }
            })
            .collect())
    }

    fn volumes(&self) -> TelemetryResult<Vec<VolumeInfo>> {
        let disks = Disks::new_with_refreshed_list();
        let volumes: Vec<VolumeInfo> = disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0 && !d.is_removable())
            .map(|d| {
                let mount_point = d.mount_point().display().to_string();
                let device = d.name().to_string_lossy();
                VolumeInfo {
                    name: mount_point.clone(),
                    is_system: mount_point == "/",
                    mount_point,
                    device: device.trim_start_matches("/dev/").to_string(),
                    file_system: d.file_system().to_string_lossy().into_owned(),
                    total_bytes: d.total_space(),
                    available_bytes: d.available_space(),
                    is_removable: d.is_removable(),
                }
            })
            .collect();
        if volumes.is_empty() {
            return Err(TelemetryError::Unavailable("fixed volumes".into()));
        }
        Ok(volumes)
    }

    fn block_device(&self, device: &str) -> TelemetryResult<BlockDeviceInfo> {
        let dir = self.root.sys(format!("block/{}", parent_device(device)));
        if !dir.exists() {
            return Err(TelemetryError::Unavailable(dir.display().to_string()));
        }
        Ok(BlockDeviceInfo {
            model: read_attr(&dir.join("device/model")).unwrap_or_default(),
            rotational: read_attr(&dir.join("queue/rotational")).map(|r| r == "1"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::linux::fixture;
    use pretty_assertions::assert_eq;

    fn memory_device(size: u16, extended_mb: u32) -> Vec<u8> {
        let mut raw = vec![0u8; 0x28];
        raw[0] = 17;
        raw[1] = 0x28;
        raw[0x0C..0x0E].copy_from_slice(&size.to_le_bytes());
        raw[0x0E] = 8; // DIMM
        raw[0x12] = 26; // DDR4
        raw[0x15..0x17].copy_from_slice(&3200u16.to_le_bytes());
        raw[0x17] = 1;
        raw[0x1A] = 2;
        raw[0x1C..0x20].copy_from_slice(&extended_mb.to_le_bytes());
        raw[0x20..0x22].copy_from_slice(&3600u16.to_le_bytes());
        raw.extend_from_slice(b"G.Skill\0F4-3600C16-16GTZNC\0\0");
        raw
    }

    #[test]
    fn test_parse_memory_device() {
        let module = parse_memory_device(&memory_device(16384, 0)).unwrap();
        assert_eq!(module.size_bytes, 16 * 1024 * 1024 * 1024);
        assert_eq!(module.form_factor, 8);
        assert_eq!(module.memory_type, 26);
        assert_eq!(module.speed_mts, 3200);
        assert_eq!(module.configured_speed_mts, 3600);
        assert_eq!(module.manufacturer, "G.Skill");
        assert_eq!(module.part_number, "F4-3600C16-16GTZNC");
    }

    #[test]
    fn test_parse_memory_device_extended_size_and_empty_slot() {
        let module = parse_memory_device(&memory_device(0x7FFF, 65536)).unwrap();
        assert_eq!(module.size_bytes, 64 * 1024 * 1024 * 1024);
        assert!(parse_memory_device(&memory_device(0, 0)).is_none());
    }

    #[test]
    fn test_parse_cpuinfo_counts_cores() {
        let content = "processor\t: 0\nvendor_id\t: AuthenticAMD\nmodel name\t: AMD Ryzen 7 7700X\nphysical id\t: 0\ncore id\t\t: 0\n\n\
                       processor\t: 1\nphysical id\t: 0\ncore id\t\t: 0\n\n\
                       processor\t: 2\nphysical id\t: 0\ncore id\t\t: 1\n\n";
        let inv = parse_cpuinfo(content);
        assert_eq!(inv.name, "AMD Ryzen 7 7700X");
        assert_eq!(inv.vendor, "AuthenticAMD");
        assert_eq!(inv.logical_processors, 3);
        assert_eq!(inv.physical_cores, 2);
    }

    #[test]
    fn test_meminfo_extended() {
        let ext = parse_meminfo_extended(
            "MemTotal: 100 kB\nCached: 2 kB\nSwapCached: 9 kB\nCommitted_AS: 3 kB\nSReclaimable: 4 kB\nSUnreclaim: 5 kB\n",
        );
        assert_eq!(ext.cached, 2048);
        assert_eq!(ext.committed, 3072);
        assert_eq!(ext.non_paged_pool, 5120);
    }

    #[test]
    fn test_parent_device() {
        assert_eq!(parent_device("nvme0n1p2"), "nvme0n1");
        assert_eq!(parent_device("nvme0n1"), "nvme0n1");
        assert_eq!(parent_device("sda1"), "sda");
        assert_eq!(parent_device("mmcblk0p1"), "mmcblk0");
    }

    #[test]
    fn test_block_device_rotational() {
        let dir = tempfile::tempdir().unwrap();
        fixture::write(dir.path(), "sys/block/sda/queue/rotational", "1\n");
        fixture::write(dir.path(), "sys/block/sda/device/model", "WDC WD40EFRX\n");
        let inv = LinuxInventory::new(HostRoot::at(dir.path()));
        let info = inv.block_device("sda3").unwrap();
        assert_eq!(info.rotational, Some(true));
        assert_eq!(info.model, "WDC WD40EFRX");
        assert!(inv.block_device("nvme9n9").is_err());
    }

    #[test]
    fn test_dmi_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = vec![0u8; 0x17];
        raw[0] = 16;
        raw[1] = 0x17;
        raw[0x0D] = 4;
        let path = dir.path().join("sys/firmware/dmi/entries/16-0");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("raw"), raw).unwrap();
        let inv = LinuxInventory::new(HostRoot::at(dir.path()));
        assert_eq!(inv.memory_slots().unwrap(), 4);
    }
}
