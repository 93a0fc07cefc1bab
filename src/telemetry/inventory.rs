//! Heuristics over hardware inventory records
//!
//! Pure functions: decoding SMBIOS codes, summarizing memory modules,
//! inferring overclock profiles, and fuzzy-matching GPU adapters to driver
//! records. The platform layer supplies the raw records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// One populated memory slot as reported by firmware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryModule {
    pub size_bytes: u64,
    pub form_factor: u8,
    pub memory_type: u8,
    pub speed_mts: u32,
    pub configured_speed_mts: u32,
    pub manufacturer: String,
    pub part_number: String,
}

/// A video controller with its driver details.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoController {
    pub name: String,
    pub driver_version: String,
    pub driver_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum MediaKind {
    Ssd,
    Hdd,
    #[default]
    Unknown,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssd => write!(f, "SSD"),
            Self::Hdd => write!(f, "HDD"),
            Self::Unknown => write!(f, ""),
        }
    }
}

pub fn form_factor_name(code: u8) -> &'static str {
    match code {
        8 => "DIMM",
        9 => "TBDIMM",
        12 => "SO-DIMM",
        16 => "RDIMM",
        17 => "Mini-RDIMM",
        18 => "UDIMM",
        _ => "",
    }
}

/// SMBIOS memory type. Some firmware reports the older WMI codes (20, 21)
/// for DDR and DDR2, so both are accepted.
pub fn memory_type_name(code: u8) -> &'static str {
    match code {
        18 | 20 => "DDR",
        19 | 21 => "DDR2",
        24 => "DDR3",
        26 => "DDR4",
        30 => "LPDDR4",
        34 => "DDR5",
        35 => "LPDDR5",
        _ => "",
    }
}

/// "DDR4-3200": generation plus data rate rounded to the nearest 100 MT/s.
pub fn type_and_speed(modules: &[MemoryModule]) -> String {
    let generation = modules
        .iter()
        .map(|m| m.memory_type)
        .max()
        .map(memory_type_name)
        .unwrap_or("");
    let rate = modules
        .iter()
        .map(|m| m.speed_mts.max(m.configured_speed_mts))
        .max()
        .unwrap_or(0);

    match (generation.is_empty(), rate) {
        (true, _) => String::new(),
        (false, 0) => generation.to_string(),
        (false, rate) => {
            let rounded = ((rate as f64 / 100.0).round() * 100.0) as u32;
            format!("{}-{}", generation, rounded)
        }
    }
}

/// Most common non-zero form factor.
pub fn dominant_form_factor(modules: &[MemoryModule]) -> &'static str {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for module in modules.iter().filter(|m| m.form_factor > 0) {
        *counts.entry(module.form_factor).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(code, count)| (*count, std::cmp::Reverse(*code)))
        .map(|(code, _)| form_factor_name(code))
        .unwrap_or("")
}

/// "2x16GB" when sizes agree, the majority group when it is strong enough,
/// otherwise "N modules". Empty when no sizes are known.
pub fn summarize_modules(sizes_gb: &[f64]) -> String {
    let rounded: Vec<u64> = sizes_gb
        .iter()
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.round() as u64)
        .collect();
    let Some(&first) = rounded.first() else {
        return String::new();
    };

    if rounded.iter().all(|&r| r == first) {
        return format!("{}x{}GB", rounded.len(), first);
    }

    let mut groups: BTreeMap<u64, usize> = BTreeMap::new();
    for r in &rounded {
        *groups.entry(*r).or_default() += 1;
    }
    // Largest group, larger size on equal counts.
    let (size, count) = groups
        .into_iter()
        .max_by_key(|(size, count)| (*count, *size))
        .unwrap_or((0, 0));
    let majority = ((rounded.len() as f64) * 0.5).ceil() as usize;
    if count >= majority.max(2) {
        return format!("{}x{}GB", count, size);
    }

    format!("{} modules", rounded.len())
}

/// Module summary with fallbacks when firmware gives counts but no sizes, or
/// nothing at all.
pub fn module_configuration(modules: &[MemoryModule], total_gb: f64) -> String {
    let sizes: Vec<f64> = modules
        .iter()
        .filter(|m| m.size_bytes > 0)
        .map(|m| m.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        .collect();
    let summary = summarize_modules(&sizes);
    if !summary.is_empty() {
        return summary;
    }

    let count = modules.len();
    if count > 0 {
        let avg = if sizes.is_empty() {
            total_gb.max(0.0) / count as f64
        } else {
            sizes.iter().sum::<f64>() / sizes.len() as f64
        };
        return format!("{}x{}GB", count, (avg.round() as u64).max(1));
    }

    if total_gb > 0.0 {
        let guess = if total_gb >= 12.0 { 2 } else { 1 };
        return format!("{}x{}GB", guess, ((total_gb / guess as f64).round() as u64).max(1));
    }

    String::new()
}

/// "2 of 4" populated slots.
pub fn slots_summary(used: usize, total: usize) -> String {
    match (used, total) {
        (0, _) => String::new(),
        (used, 0) => used.to_string(),
        (used, total) => format!("{} of {}", used, total),
    }
}

/// Overclock profile inferred from configured speed against JEDEC baselines.
/// AMD platforms call it EXPO, everyone else XMP.
pub fn overclock_profile(modules: &[MemoryModule], cpu_vendor: &str) -> Option<&'static str> {
    let configured = modules
        .iter()
        .map(|m| m.configured_speed_mts)
        .max()
        .unwrap_or(0) as f64;
    let is_ddr5 = modules.iter().map(|m| m.memory_type).max() == Some(34);
    let (baseline, threshold) = if is_ddr5 {
        (5600.0, 6000.0)
    } else {
        (3200.0, 3600.0)
    };

    let overclocked = configured >= threshold || configured > baseline + 150.0;
    if !overclocked {
        return None;
    }
    if cpu_vendor.to_lowercase().contains("amd") {
        Some("EXPO")
    } else {
        Some("XMP")
    }
}

fn is_placeholder(s: &str) -> bool {
    let t = s.trim();
    t.is_empty()
        || [
            "unknown",
            "undefined",
            "to be filled by o.e.m.",
            "manufacturer",
            "not available",
            "n/a",
        ]
        .iter()
        .any(|p| t.eq_ignore_ascii_case(p))
}

/// Brand from firmware manufacturer strings, else from part-number prefixes.
pub fn ram_brand(manufacturers: &[String], part_numbers: &[String]) -> String {
    let valid: Vec<&str> = manufacturers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !is_placeholder(m))
        .collect();
    if let Some(best) = valid.iter().max_by_key(|m| m.len()) {
        return best.to_string();
    }

    let joined = part_numbers.join(" ").to_uppercase();
    let has = |needles: &[&str]| needles.iter().any(|n| joined.contains(n));
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| joined.starts_with(p));

    let brand = if has(&["GSKILL", "G.SKILL", "F4-", "F5-"]) {
        "G.SKILL"
    } else if has(&["CORSAIR"]) || starts(&["CM"]) {
        "Corsair"
    } else if has(&["KINGSTON", "HYPERX"]) || starts(&["KF", "KVR", "KSM"]) {
        "Kingston"
    } else if has(&["CRUCIAL"]) || starts(&["CT"]) {
        "Crucial"
    } else if has(&["TEAM", "T-FORCE"]) || starts(&["TF"]) {
        "TeamGroup"
    } else if has(&["ADATA", "XPG"]) || starts(&["AX4U"]) {
        "ADATA"
    } else if has(&["PATRIOT"]) || starts(&["PV"]) {
        "Patriot"
    } else if has(&["GEIL"]) || starts(&["GL"]) {
        "GeIL"
    } else if has(&["HYNIX", "SKHYNIX"]) || starts(&["HMA", "HMT"]) {
        "SK hynix"
    } else if has(&["MICRON"]) || starts(&["MT"]) {
        "Micron"
    } else if has(&["SAMSUNG"]) || starts(&["M3", "M4"]) {
        "Samsung"
    } else {
        "Unknown"
    };
    brand.to_string()
}

/// Upper-case, drop trademark marks and generic words, collapse whitespace.
pub fn normalize_adapter_name(name: &str) -> String {
    let mut t = name.to_uppercase();
    for noise in ["(R)", "(TM)", "(C)", "GRAPHICS", "GPU", "VIDEO"] {
        t = t.replace(noise, "");
    }
    WHITESPACE.replace_all(&t, " ").trim().to_string()
}

/// Shared tokens, plus one when both names are reasonably long.
pub fn token_overlap_score(a: &str, b: &str) -> i32 {
    let at: HashSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let bt: HashSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    let mut score = at.intersection(&bt).count() as i32;
    if at.len().min(bt.len()) >= 3 {
        score += 1;
    }
    score
}

fn vendor_bonus(a: &str, b: &str) -> i32 {
    let both = |k: &str| a.contains(k) && b.contains(k);
    let mut bonus = 0;
    if both("NVIDIA") {
        bonus += 2;
    }
    if both("RADEON") {
        bonus += 2;
    }
    if both("AMD") {
        bonus += 1;
    }
    if both("INTEL") {
        bonus += 2;
    }
    bonus
}

/// Best driver record for an adapter; the first record when nothing scores.
pub fn match_driver<'c>(
    adapter_name: &str,
    controllers: &'c [VideoController],
) -> Option<&'c VideoController> {
    let first = controllers.first()?;
    let norm = normalize_adapter_name(adapter_name);
    if norm.is_empty() {
        return Some(first);
    }

    let mut best: Option<(&VideoController, i32)> = None;
    for controller in controllers {
        let other = normalize_adapter_name(&controller.name);
        let score = token_overlap_score(&norm, &other) + vendor_bonus(&norm, &other);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((controller, score));
        }
    }

    match best {
        Some((controller, score)) if score > 0 => Some(controller),
        _ => Some(first),
    }
}

/// Loose equality for adapter names coming from different sources.
pub fn names_roughly_match(a: &str, b: &str) -> bool {
    let na = normalize_adapter_name(a);
    let nb = normalize_adapter_name(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb || token_overlap_score(&na, &nb) >= 2 {
        return true;
    }
    let amd = |s: &str| s.contains("RADEON") || s.contains("AMD");
    (na.contains("NVIDIA") && nb.contains("NVIDIA"))
        || (amd(&na) && amd(&nb))
        || (na.contains("INTEL") && nb.contains("INTEL"))
}

/// Media kind from a model string.
pub fn media_kind_from_model(model: &str) -> Option<MediaKind> {
    let m = model.to_uppercase();
    if ["SSD", "SOLID STATE", "NVME", "NV-ME", "M.2"]
        .iter()
        .any(|k| m.contains(k))
    {
        Some(MediaKind::Ssd)
    } else if ["HDD", "HARD DISK"].iter().any(|k| m.contains(k)) {
        Some(MediaKind::Hdd)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn module(gb: u64, kind: u8, configured: u32) -> MemoryModule {
        MemoryModule {
            size_bytes: gb * 1024 * 1024 * 1024,
            form_factor: 8,
            memory_type: kind,
            speed_mts: configured,
            configured_speed_mts: configured,
            ..Default::default()
        }
    }

    #[test]
    fn test_summarize_equal_modules() {
        assert_eq!(summarize_modules(&[16.0, 16.0]), "2x16GB");
    }

    #[test]
    fn test_summarize_majority() {
        assert_eq!(summarize_modules(&[16.0, 16.0, 8.0]), "2x16GB");
    }

    #[test]
    fn test_summarize_mixed() {
        assert_eq!(summarize_modules(&[16.0, 8.0]), "2 modules");
        assert_eq!(summarize_modules(&[]), "");
    }

    #[test]
    fn test_module_configuration_guesses_without_firmware() {
        assert_eq!(module_configuration(&[], 32.0), "2x16GB");
        assert_eq!(module_configuration(&[], 8.0), "1x8GB");
        let sizeless = vec![MemoryModule::default(), MemoryModule::default()];
        assert_eq!(module_configuration(&sizeless, 16.0), "2x8GB");
    }

    #[test]
    fn test_type_and_speed_rounds() {
        assert_eq!(type_and_speed(&[module(16, 26, 3199)]), "DDR4-3200");
        assert_eq!(type_and_speed(&[module(16, 34, 0)]), "DDR5");
        assert_eq!(type_and_speed(&[]), "");
    }

    #[test]
    fn test_overclock_profile() {
        assert_eq!(overclock_profile(&[module(16, 26, 3600)], "GenuineIntel"), Some("XMP"));
        assert_eq!(overclock_profile(&[module(16, 34, 6000)], "AuthenticAMD"), Some("EXPO"));
        assert_eq!(overclock_profile(&[module(16, 34, 5600)], "AuthenticAMD"), None);
        assert_eq!(overclock_profile(&[module(16, 26, 3200)], "GenuineIntel"), None);
    }

    #[test]
    fn test_form_factor() {
        let mut so = module(8, 26, 3200);
        so.form_factor = 12;
        assert_eq!(dominant_form_factor(&[so.clone(), so]), "SO-DIMM");
        assert_eq!(slots_summary(2, 4), "2 of 4");
        assert_eq!(slots_summary(2, 0), "2");
    }

    #[test]
    fn test_ram_brand() {
        assert_eq!(
            ram_brand(&["Unknown".into(), "Kingston".into()], &[]),
            "Kingston"
        );
        assert_eq!(ram_brand(&[], &["F4-3600C16-16GTZNC".into()]), "G.SKILL");
        assert_eq!(ram_brand(&[], &["CMK32GX4M2E3200C16".into()]), "Corsair");
        assert_eq!(ram_brand(&[], &[]), "Unknown");
    }

    #[test]
    fn test_normalize_adapter_name() {
        assert_eq!(
            normalize_adapter_name("Intel(R) UHD Graphics  770"),
            "INTEL UHD 770"
        );
    }

    #[test]
    fn test_match_driver_prefers_token_overlap() {
        let controllers = vec![
            VideoController {
                name: "Intel(R) UHD Graphics 770".into(),
                driver_version: "31.0".into(),
                ..Default::default()
            },
            VideoController {
                name: "NVIDIA GeForce RTX 4070".into(),
                driver_version: "550.54".into(),
                ..Default::default()
            },
        ];
        let m = match_driver("NVIDIA GeForce RTX 4070", &controllers).unwrap();
        assert_eq!(m.driver_version, "550.54");
        let fallback = match_driver("", &controllers).unwrap();
        assert_eq!(fallback.driver_version, "31.0");
        assert!(match_driver("x", &[]).is_none());
    }

    #[test]
    fn test_names_roughly_match() {
        assert!(names_roughly_match("AMD Radeon RX 7900", "Radeon RX 7900 XTX"));
        assert!(names_roughly_match("AMD Radeon Graphics", "Radeon 780M"));
        assert!(!names_roughly_match("NVIDIA RTX", "Intel Arc"));
    }

    #[test]
    fn test_media_kind_from_model() {
        assert_eq!(media_kind_from_model("Samsung SSD 980 PRO"), Some(MediaKind::Ssd));
        assert_eq!(media_kind_from_model("WDC WD40 Hard Disk"), Some(MediaKind::Hdd));
        assert_eq!(media_kind_from_model("ST4000DM004"), None);
    }
}
