//! Application state shared between the page loops and the renderer

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::process::{NodeKey, ProcessRow, SortState};
use crate::telemetry::{CpuInfo, RamInfo, SystemSnapshot};
use crate::ui::theme::Theme;

/// Top-level views, each backed by its own sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Page {
    #[default]
    Dashboard,
    Performance,
}

impl Page {
    pub const ALL: [Page; 2] = [Page::Dashboard, Page::Performance];

    pub fn next(self) -> Self {
        match self {
            Self::Dashboard => Self::Performance,
            Self::Performance => Self::Dashboard,
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dashboard => write!(f, "Dashboard"),
            Self::Performance => write!(f, "Performance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppMode {
    #[default]
    Normal,
    Help,
    /// Typing into the process search box
    Search,
    /// Waiting for a yes/no on terminating a row
    ConfirmKill {
        target: NodeKey,
        label: String,
        tree: bool,
    },
}

/// What the dashboard page shows.
#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub snapshot: SystemSnapshot,
    pub rows: Vec<ProcessRow>,
    pub top: Vec<ProcessRow>,
    pub process_count: usize,
    pub cursor: usize,
    pub sort: SortState,
    pub grouping: bool,
    pub search: String,
    pub two_column_drives_at_four: bool,
    pub sampled_at: Option<chrono::DateTime<chrono::Local>>,
}

impl DashboardState {
    pub fn cursor_row(&self) -> Option<&ProcessRow> {
        self.rows.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.rows.is_empty() {
            self.cursor = 0;
            return;
        }
        let max = self.rows.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(max);
    }

    /// Keep the cursor on `key`'s row, or at least inside the list.
    pub fn follow(&mut self, key: Option<&NodeKey>) {
        if let Some(pos) = key.and_then(|k| self.rows.iter().position(|r| &r.key == k)) {
            self.cursor = pos;
        } else {
            self.cursor = self.cursor.min(self.rows.len().saturating_sub(1));
        }
    }
}

/// What the performance page shows.
#[derive(Debug, Clone, Default)]
pub struct PerformanceState {
    pub cpu: CpuInfo,
    pub ram: RamInfo,
    /// Per-entity history, keyed by stable name ("CPU", "RAM", drive, GPU).
    pub history: Vec<(String, Vec<f64>)>,
    pub upload_history: Vec<f64>,
    pub download_history: Vec<f64>,
    pub per_core_view: bool,
    pub sampled_at: Option<chrono::DateTime<chrono::Local>>,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub mode: AppMode,
    pub page: Page,
    pub dashboard: DashboardState,
    pub performance: PerformanceState,
    pub theme: Theme,
    pub notifications: Vec<Notification>,
    pub terminal_size: (u16, u16),
    next_notification: u64,
}

impl AppState {
    pub fn new(theme: Theme) -> Self {
        Self {
            mode: AppMode::Normal,
            page: Page::Dashboard,
            dashboard: DashboardState::default(),
            performance: PerformanceState::default(),
            theme,
            notifications: Vec::new(),
            terminal_size: (80, 24),
            next_notification: 0,
        }
    }

    pub fn add_notification(&mut self, message: String, level: NotificationLevel) -> u64 {
        self.next_notification += 1;
        let id = self.next_notification;
        self.notifications.push(Notification {
            id,
            message,
            level,
            created_at: chrono::Utc::now(),
            duration_ms: 4000,
        });
        id
    }

    pub fn remove_expired_notifications(&mut self) {
        let now = chrono::Utc::now();
        self.notifications.retain(|n| {
            let elapsed = now.signed_duration_since(n.created_at).num_milliseconds().max(0) as u64;
            elapsed < n.duration_ms
        });
    }
}

/// Reactive state changes via broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    ModeChanged(AppMode),
    PageChanged(Page),
    SnapshotUpdated,
    ProcessesUpdated,
    PerformanceUpdated,
    NotificationAdded(u64),
}

/// Thread-safe state store
pub struct StateStore {
    state: Arc<RwLock<AppState>>,
    change_tx: broadcast::Sender<StateChange>,
}

impl StateStore {
    pub fn new(initial: AppState) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.change_tx.subscribe()
    }

    /// Atomic state mutation with change notification
    pub fn update<F, R>(&self, mutator: F) -> R
    where
        F: FnOnce(&mut AppState) -> (R, Option<StateChange>),
    {
        let mut state = self.state.write();
        let (result, change) = mutator(&mut state);
        if let Some(change) = change {
            let _ = self.change_tx.send(change);
        }
        result
    }

    pub fn notify(&self, message: impl Into<String>, level: NotificationLevel) {
        self.update(|s| {
            let id = s.add_notification(message.into(), level);
            ((), Some(StateChange::NotificationAdded(id)))
        });
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, AppState> {
        self.state.read()
    }

    /// Get a clone of the current state
    pub fn snapshot(&self) -> AppState {
        self.state.read().clone()
    }
}

impl Clone for StateStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            change_tx: self.change_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::NodeKey;
    use pretty_assertions::assert_eq;

    fn row(pid: u32) -> ProcessRow {
        ProcessRow {
            key: NodeKey::Pid(pid),
            depth: 0,
            name: format!("p{}", pid),
            cpu_percent: 0.0,
            memory_bytes: 0,
            gpu_percent: 0.0,
            instance_count: 1,
            is_group: false,
            is_pinned: false,
            is_selected: false,
            is_expanded: false,
            has_children: false,
        }
    }

    #[test]
    fn test_cursor_is_clamped() {
        let mut dash = DashboardState {
            rows: vec![row(1), row(2), row(3)],
            ..Default::default()
        };
        dash.move_cursor(-1);
        assert_eq!(dash.cursor, 0);
        dash.move_cursor(10);
        assert_eq!(dash.cursor, 2);
        dash.rows.truncate(1);
        dash.follow(None);
        assert_eq!(dash.cursor, 0);
    }

    #[test]
    fn test_cursor_follows_selection() {
        let mut dash = DashboardState {
            rows: vec![row(1), row(2), row(3)],
            ..Default::default()
        };
        dash.follow(Some(&NodeKey::Pid(3)));
        assert_eq!(dash.cursor_row().map(|r| r.key.clone()), Some(NodeKey::Pid(3)));
    }

    #[test]
    fn test_notify_publishes_change() {
        let store = StateStore::new(AppState::new(Theme::tokyo_night()));
        let mut rx = store.subscribe();
        store.notify("hello", NotificationLevel::Info);
        assert_eq!(rx.try_recv().ok(), Some(StateChange::NotificationAdded(1)));
        assert_eq!(store.read().notifications.len(), 1);
    }

    #[test]
    fn test_expired_notifications_removed() {
        let mut state = AppState::new(Theme::tokyo_night());
        state.add_notification("old".into(), NotificationLevel::Warning);
        state.notifications[0].duration_ms = 0;
        state.add_notification("new".into(), NotificationLevel::Info);
        state.remove_expired_notifications();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.notifications[0].message, "new");
    }

    #[test]
    fn test_page_cycle() {
        assert_eq!(Page::Dashboard.next(), Page::Performance);
        assert_eq!(Page::Performance.next(), Page::Dashboard);
    }
}
