//! Live settings with change notification
//!
//! The samplers and the reconciler only read current values and subscribe
//! to changes; persistence stays with `Config`.

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{Config, MemoryMetric};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    Grouping(bool),
    MemoryMetric(MemoryMetric),
    DebugEmulation {
        gpu: Option<usize>,
        disk: Option<usize>,
    },
    TwoColumnDrives(bool),
    NormalizeUsage(bool),
    /// Anything else (launcher lists, bundles, theme).
    Other,
}

/// Changes between two configurations, in a fixed order.
pub fn diff(old: &Config, new: &Config) -> Vec<SettingsChange> {
    let mut changes = Vec::new();
    if old.processes.group_same_names != new.processes.group_same_names {
        changes.push(SettingsChange::Grouping(new.processes.group_same_names));
    }
    if old.processes.memory_metric != new.processes.memory_metric {
        changes.push(SettingsChange::MemoryMetric(new.processes.memory_metric));
    }
    if old.debug != new.debug {
        changes.push(SettingsChange::DebugEmulation {
            gpu: new.debug.gpu_target(),
            disk: new.debug.disk_target(),
        });
    }
    if old.display.two_column_drives_at_four != new.display.two_column_drives_at_four {
        changes.push(SettingsChange::TwoColumnDrives(new.display.two_column_drives_at_four));
    }
    if old.processes.normalize_usage != new.processes.normalize_usage {
        changes.push(SettingsChange::NormalizeUsage(new.processes.normalize_usage));
    }
    if changes.is_empty() && old != new {
        changes.push(SettingsChange::Other);
    }
    changes
}

pub struct SettingsStore {
    config: RwLock<Config>,
    tx: broadcast::Sender<SettingsChange>,
}

impl SettingsStore {
    pub fn new(config: Config) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            config: RwLock::new(config),
            tx,
        }
    }

    pub fn snapshot(&self) -> Config {
        self.config.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        f(&self.config.read())
    }

    pub fn group_same_names(&self) -> bool {
        self.config.read().processes.group_same_names
    }

    pub fn memory_metric(&self) -> MemoryMetric {
        self.config.read().processes.memory_metric
    }

    pub fn debug_gpu_count(&self) -> Option<usize> {
        self.config.read().debug.gpu_target()
    }

    pub fn debug_disk_count(&self) -> Option<usize> {
        self.config.read().debug.disk_target()
    }

    /// Mutate the settings and publish what changed.
    pub fn update(&self, f: impl FnOnce(&mut Config)) -> Vec<SettingsChange> {
        let changes = {
            let mut config = self.config.write();
            let old = config.clone();
            f(&mut config);
            diff(&old, &config)
        };
        for change in &changes {
            // No subscribers is fine.
            let _ = self.tx.send(change.clone());
        }
        changes
    }

    pub fn replace(&self, new: Config) -> Vec<SettingsChange> {
        self.update(|config| *config = new)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.tx.subscribe()
    }

    /// Reload `path` whenever it changes on disk. Keep the returned
    /// debouncer alive for as long as the watch should run.
    pub fn watch(self: &Arc<Self>, path: PathBuf) -> Result<Debouncer<RecommendedWatcher>> {
        let store = Arc::clone(self);
        let target = path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());
        let mut debouncer = new_debouncer(Duration::from_millis(500), move |res: DebounceEventResult| {
            match res {
                Ok(events) if events.iter().any(|e| e.path.file_name() == file_name.as_deref()) => {
                    store.reload(&target)
                }
                Ok(_) => {}
                Err(err) => tracing::debug!(error = ?err, "config watch error"),
            }
        })?;

        // Editors often replace the file, so watch its directory.
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "watching config for changes");
        Ok(debouncer)
    }

    fn reload(&self, path: &Path) {
        match Config::load(path) {
            Ok(mut config) => {
                config.debug.apply_env();
                let changes = self.replace(config);
                tracing::info!(?changes, "config reloaded");
            }
            Err(err) => tracing::warn!(error = %err, "ignoring invalid config"),
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_update_publishes_changes() {
        let store = SettingsStore::default();
        let mut rx = store.subscribe();
        let changes = store.update(|c| {
            c.processes.group_same_names = false;
            c.debug.gpu_count = 3;
        });
        assert_eq!(
            changes,
            vec![
                SettingsChange::Grouping(false),
                SettingsChange::DebugEmulation {
                    gpu: Some(3),
                    disk: None
                },
            ]
        );
        assert_eq!(rx.try_recv().unwrap(), SettingsChange::Grouping(false));
        assert!(!store.group_same_names());
        assert_eq!(store.debug_gpu_count(), Some(3));
    }

    #[test]
    fn test_no_change_publishes_nothing() {
        let store = SettingsStore::default();
        assert!(store.update(|_| {}).is_empty());
    }

    #[test]
    fn test_other_changes_are_reported() {
        let store = SettingsStore::default();
        let changes = store.update(|c| c.processes.launcher_names.clear());
        assert_eq!(changes, vec![SettingsChange::Other]);
    }

    #[test]
    fn test_reload_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\ntwo_column_drives_at_four = false\n").unwrap();
        let store = SettingsStore::default();
        store.reload(&path);
        assert!(!store.read(|c| c.display.two_column_drives_at_four));
    }

    #[test]
    fn test_watch_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let store = Arc::new(SettingsStore::default());
        let _watcher = store.watch(path.clone()).unwrap();

        std::fs::write(&path, "[display]\ntwo_column_drives_at_four = false\n").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while store.read(|c| c.display.two_column_drives_at_four)
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!store.read(|c| c.display.two_column_drives_at_four));
    }
}
