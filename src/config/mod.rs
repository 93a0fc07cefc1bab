//! Configuration system for Vigil

pub mod settings;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use settings::{SettingsChange, SettingsStore};

pub const DEBUG_GPU_COUNT_ENV: &str = "VIGIL_DEBUG_GPU_COUNT";
pub const DEBUG_DISK_COUNT_ENV: &str = "VIGIL_DEBUG_DISK_COUNT";

/// Global application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub processes: ProcessConfig,
    pub display: DisplayConfig,
    pub keybindings: KeybindingsConfig,
    pub debug: DebugConfig,
}

impl Config {
    /// Load TOML, or YAML when the extension says so.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vigil").join("config.toml"))
    }

    /// Load from `path` or the default location, falling back to defaults
    /// when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        let mut config = match path {
            Some(p) => Self::load(&p)?,
            None => Self::default(),
        };
        config.debug.apply_env();
        Ok(config)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Sampling cadence of the page loops.
    pub tick_interval_ms: u64,
    pub theme: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            theme: "tokyo-night".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMetric {
    #[default]
    WorkingSet,
    PrivateBytes,
}

/// Processes that always belong together regardless of OS parentage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleRule {
    pub anchor: String,
    pub helpers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub group_same_names: bool,
    pub memory_metric: MemoryMetric,
    /// Scale per-process usage so it adds up to the system totals.
    pub normalize_usage: bool,
    /// Appended to every process name lacking it (empty disables).
    pub name_suffix: String,
    pub top_n: usize,
    pub max_processes: usize,
    /// Generic hosts that are never treated as a meaningful parent.
    pub launcher_names: Vec<String>,
    pub launcher_suffixes: Vec<String>,
    pub bundles: Vec<BundleRule>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            group_same_names: true,
            memory_metric: MemoryMetric::WorkingSet,
            normalize_usage: false,
            name_suffix: String::new(),
            top_n: 5,
            max_processes: 200,
            launcher_names: [
                "systemd",
                "init",
                "kthreadd",
                "sh",
                "bash",
                "zsh",
                "fish",
                "tmux: server",
                "screen",
                "sshd",
                "login",
                "dbus-daemon",
                "gnome-shell",
                "plasmashell",
                "kwin_wayland",
                "xdg-desktop-portal",
                "flatpak-session-helper",
                "bwrap",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            launcher_suffixes: vec!["-launcher".to_string(), "-portal".to_string()],
            bundles: vec![BundleRule {
                anchor: "steam".to_string(),
                helpers: vec!["steamwebhelper".to_string()],
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Switch drives to two columns from four drives instead of five.
    pub two_column_drives_at_four: bool,
    pub cpu_per_core_view: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            two_column_drives_at_four: true,
            cpu_per_core_view: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeybindingsConfig {
    pub quit: String,
    pub help: String,
    pub search: String,
    pub pin: String,
    pub group: String,
    pub kill: String,
    pub page: String,
}

impl Default for KeybindingsConfig {
    fn default() -> Self {
        Self {
            quit: "q".to_string(),
            help: "?".to_string(),
            search: "/".to_string(),
            pin: "p".to_string(),
            group: "g".to_string(),
            kill: "K".to_string(),
            page: "tab".to_string(),
        }
    }
}

/// Padding counts for UI testing without hardware. Negative disables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub gpu_count: i32,
    pub disk_count: i32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            gpu_count: -1,
            disk_count: -1,
        }
    }
}

impl DebugConfig {
    pub fn gpu_target(&self) -> Option<usize> {
        usize::try_from(self.gpu_count).ok()
    }

    pub fn disk_target(&self) -> Option<usize> {
        usize::try_from(self.disk_count).ok()
    }

    /// Environment overrides win over the file.
    pub fn apply_env(&mut self) {
        let read = |key: &str| std::env::var(key).ok().and_then(|v| v.trim().parse::<i32>().ok());
        if let Some(n) = read(DEBUG_GPU_COUNT_ENV) {
            self.gpu_count = n;
        }
        if let Some(n) = read(DEBUG_DISK_COUNT_ENV) {
            self.disk_count = n;
        }
    }
}

/// Write a default configuration file.
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("Configuration already exists. Use --force to overwrite.");
    }

    Config::default().save(path)?;
    println!("Created {}", path.display());
    Ok(())
}
