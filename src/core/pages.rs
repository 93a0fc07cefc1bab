//! Per-page sampling loops
//!
//! Each page owns a model with a blocking `tick` and runs it on a fixed
//! interval from its own task. Results land in the `StateStore`; the UI is
//! told through a coalescing dispatcher so a burst of ticks queues at most
//! one redraw. Loops stop on a cancel signal checked around every tick and
//! sleep, and shutdown waits a bounded time for the task to finish.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SettingsStore;
use crate::core::events::Event;
use crate::core::state::{Page, StateChange, StateStore};
use crate::process::normalize::{normalize_cpu, normalize_gpu};
use crate::process::{ProcessTableSampler, ProcessTreeReconciler};
use crate::telemetry::history::{HistoryBook, PERFORMANCE_HISTORY};
use crate::telemetry::SystemSnapshotSampler;

const SHUTDOWN_WAIT: Duration = Duration::from_millis(250);

/// Posts page updates to the event loop, collapsing bursts into one
/// outstanding event until the UI acknowledges it.
#[derive(Clone)]
pub struct UiDispatcher {
    pending: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Event>,
}

impl UiDispatcher {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Returns false when an update is already queued.
    pub fn post(&self, page: Page) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.tx.send(Event::PageUpdated(page)).is_err() {
            self.pending.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Called by the UI once it has consumed the queued update.
    pub fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

pub trait PageModel: Send + Sync {
    fn page(&self) -> Page;

    /// One blocking sampling pass, publishing into `state`.
    fn tick(&self, state: &StateStore);
}

/// Copy the reconciled forest into the dashboard state.
pub fn publish_processes(tree: &ProcessTreeReconciler, state: &StateStore) {
    let rows = tree.rows(false);
    let top = tree.top().iter().filter_map(|k| tree.row(k, 0)).collect();
    let sort = tree.sort_state();
    let grouping = tree.grouping();
    let search = tree.search().to_string();
    let selected = tree.selection().cloned();
    state.update(|s| {
        let dash = &mut s.dashboard;
        let anchor = dash.cursor_row().map(|r| r.key.clone());
        dash.rows = rows;
        dash.top = top;
        dash.sort = sort;
        dash.grouping = grouping;
        dash.search = search;
        dash.follow(anchor.as_ref().or(selected.as_ref()));
        ((), Some(StateChange::ProcessesUpdated))
    });
}

pub struct DashboardModel {
    sampler: Arc<SystemSnapshotSampler>,
    table: Mutex<ProcessTableSampler>,
    tree: Arc<Mutex<ProcessTreeReconciler>>,
    settings: Arc<SettingsStore>,
}

impl DashboardModel {
    pub fn new(
        sampler: Arc<SystemSnapshotSampler>,
        table: ProcessTableSampler,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let tree = settings.read(|c| ProcessTreeReconciler::new(&c.processes));
        Self {
            sampler,
            table: Mutex::new(table),
            tree: Arc::new(Mutex::new(tree)),
            settings,
        }
    }

    pub fn tree(&self) -> Arc<Mutex<ProcessTreeReconciler>> {
        Arc::clone(&self.tree)
    }
}

impl PageModel for DashboardModel {
    fn page(&self) -> Page {
        Page::Dashboard
    }

    fn tick(&self, state: &StateStore) {
        let snapshot = self.sampler.snapshot();
        let mut processes = self.table.lock().sample();

        let (normalize, two_column) = self.settings.read(|c| {
            (
                c.processes.normalize_usage,
                c.display.two_column_drives_at_four,
            )
        });
        if normalize {
            normalize_cpu(&mut processes, snapshot.cpu.usage);
            normalize_gpu(&mut processes, &snapshot.gpus);
        }
        let count = processes.len();

        state.update(|s| {
            s.dashboard.snapshot = snapshot;
            s.dashboard.process_count = count;
            s.dashboard.two_column_drives_at_four = two_column;
            s.dashboard.sampled_at = Some(chrono::Local::now());
            ((), Some(StateChange::SnapshotUpdated))
        });

        let mut tree = self.tree.lock();
        tree.reconcile(&processes);
        publish_processes(&tree, state);
    }
}

pub struct PerformanceModel {
    sampler: Arc<SystemSnapshotSampler>,
    history: Mutex<HistoryBook>,
    settings: Arc<SettingsStore>,
}

impl PerformanceModel {
    pub fn new(sampler: Arc<SystemSnapshotSampler>, settings: Arc<SettingsStore>) -> Self {
        Self {
            sampler,
            history: Mutex::new(HistoryBook::new(PERFORMANCE_HISTORY)),
            settings,
        }
    }
}

impl PageModel for PerformanceModel {
    fn page(&self) -> Page {
        Page::Performance
    }

    fn tick(&self, state: &StateStore) {
        let snapshot = self.sampler.snapshot();

        let mut keys = vec!["CPU".to_string(), "RAM".to_string()];
        keys.extend(snapshot.storage.iter().map(|d| format!("Disk {}", d.name)));
        keys.extend(
            snapshot
                .gpus
                .iter()
                .enumerate()
                .map(|(i, g)| format!("GPU {} {}", i, g.name)),
        );
        let values = [snapshot.cpu.usage, snapshot.ram.usage]
            .into_iter()
            .chain(snapshot.storage.iter().map(|d| d.activity_percent))
            .chain(snapshot.gpus.iter().map(|g| g.usage));

        let series = {
            let mut book = self.history.lock();
            for (key, value) in keys.iter().zip(values) {
                book.push(key, value);
            }
            book.retain_keys(keys.iter().map(String::as_str));
            book.series()
        };

        let per_core = self.settings.read(|c| c.display.cpu_per_core_view);
        state.update(|s| {
            let perf = &mut s.performance;
            perf.upload_history = snapshot.network.upload_history.clone();
            perf.download_history = snapshot.network.download_history.clone();
            perf.cpu = snapshot.cpu;
            perf.ram = snapshot.ram;
            perf.history = series;
            perf.per_core_view = per_core;
            perf.sampled_at = Some(chrono::Local::now());
            ((), Some(StateChange::PerformanceUpdated))
        });
    }
}

/// A running page loop.
pub struct PageLoop {
    page: Page,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PageLoop {
    pub fn spawn(
        model: Arc<dyn PageModel>,
        state: StateStore,
        dispatcher: UiDispatcher,
        interval: Duration,
    ) -> Self {
        let page = model.page();
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            tracing::debug!(%page, "page loop started");
            loop {
                if *cancelled.borrow() {
                    break;
                }
                let tick_model = Arc::clone(&model);
                let tick_state = state.clone();
                if let Err(err) =
                    tokio::task::spawn_blocking(move || tick_model.tick(&tick_state)).await
                {
                    tracing::warn!(%page, error = %err, "page tick failed");
                }
                if *cancelled.borrow() {
                    break;
                }
                dispatcher.post(page);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancelled.changed() => break,
                }
            }
            tracing::debug!(%page, "page loop stopped");
        });
        Self {
            page,
            cancel,
            handle,
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    /// Cancel and wait briefly; a tick stuck in a slow read is left to
    /// finish on its own.
    pub async fn shutdown(self) {
        let Self {
            page,
            cancel,
            handle,
        } = self;
        let _ = cancel.send(true);
        if tokio::time::timeout(SHUTDOWN_WAIT, handle).await.is_err() {
            tracing::warn!(%page, "page loop did not stop in time");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::state::AppState;
    use crate::platform::linux::HostRoot;
    use crate::process::sampler::ProcessSnapshot;
    use crate::telemetry::sampler::SamplerSources;
    use crate::ui::theme::Theme;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn store() -> StateStore {
        StateStore::new(AppState::new(Theme::tokyo_night()))
    }

    #[test]
    fn test_dispatcher_coalesces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = UiDispatcher::new(tx);
        assert!(dispatcher.post(Page::Dashboard));
        assert!(!dispatcher.post(Page::Dashboard));
        assert!(matches!(rx.try_recv(), Ok(Event::PageUpdated(Page::Dashboard))));
        assert!(rx.try_recv().is_err());
        dispatcher.complete();
        assert!(dispatcher.post(Page::Dashboard));
    }

    struct Counting {
        ticks: AtomicUsize,
    }

    impl PageModel for Counting {
        fn page(&self) -> Page {
            Page::Performance
        }

        fn tick(&self, _state: &StateStore) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_loop_ticks_until_shutdown() {
        let model = Arc::new(Counting {
            ticks: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = UiDispatcher::new(tx);
        let page_loop = PageLoop::spawn(
            model.clone(),
            store(),
            dispatcher.clone(),
            Duration::from_millis(10),
        );
        assert!(matches!(rx.recv().await, Some(Event::PageUpdated(Page::Performance))));
        dispatcher.complete();
        tokio::time::sleep(Duration::from_millis(50)).await;
        page_loop.shutdown().await;

        let after = model.ticks.load(Ordering::SeqCst);
        assert!(after >= 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(model.ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_publish_processes_copies_rows() {
        let mut tree = ProcessTreeReconciler::new(&Config::default().processes);
        tree.reconcile(&[
            ProcessSnapshot {
                pid: 1,
                name: "init".into(),
                cpu_percent: 2.0,
                ..Default::default()
            },
            ProcessSnapshot {
                pid: 2,
                name: "worker".into(),
                cpu_percent: 8.0,
                ..Default::default()
            },
        ]);
        tree.select(Some(crate::process::NodeKey::Pid(1)));
        let state = store();
        publish_processes(&tree, &state);

        let s = state.read();
        assert_eq!(s.dashboard.rows.len(), 2);
        assert_eq!(s.dashboard.rows[0].name, "worker");
        assert_eq!(s.dashboard.cursor, 1);
        assert_eq!(s.dashboard.top.len(), 2);
    }

    #[test]
    fn test_performance_tick_builds_history() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::default());
        let sampler = Arc::new(SystemSnapshotSampler::new(
            SamplerSources::linux(HostRoot::at(tmp.path())),
            Arc::clone(&settings),
        ));
        let model = PerformanceModel::new(sampler, settings);
        let state = store();
        model.tick(&state);
        model.tick(&state);

        let s = state.read();
        let cpu = s.performance.history.iter().find(|(k, _)| k == "CPU");
        assert_eq!(cpu.map(|(_, v)| v.len()), Some(2));
        assert!(s.performance.sampled_at.is_some());
    }
}
