//! Main application orchestrator

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, MouseEventKind};
use parking_lot::Mutex;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::Stdout;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SettingsChange, SettingsStore};
use crate::core::events::{Event, EventHandler, EventResult, KeyBindings};
use crate::core::pages::{
    publish_processes, DashboardModel, PageLoop, PageModel, PerformanceModel, UiDispatcher,
};
use crate::core::state::{AppMode, AppState, NotificationLevel, Page, StateChange, StateStore};
use crate::process::{NodeKey, ProcessActions, ProcessTableSampler, ProcessTreeReconciler, SortColumn};
use crate::telemetry::SystemSnapshotSampler;
use crate::ui::renderer::Renderer;
use crate::ui::theme::Theme;

pub struct App {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    state: StateStore,
    settings: Arc<SettingsStore>,
    keys: KeyBindings,
    dashboard: Arc<DashboardModel>,
    performance: Arc<PerformanceModel>,
    tree: Arc<Mutex<ProcessTreeReconciler>>,
    actions: ProcessActions,
    dispatcher: Option<UiDispatcher>,
    page_loop: Option<PageLoop>,
    interval: Duration,
}

impl App {
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let backend = CrosstermBackend::new(std::io::stdout());
        let terminal = Terminal::new(backend)?;

        let config = settings.snapshot();
        let theme = Theme::from_name(&config.general.theme);
        let state = StateStore::new(AppState::new(theme));

        // One sampler shared by both pages; resources open lazily on first tick.
        let sampler = Arc::new(SystemSnapshotSampler::linux(Arc::clone(&settings)));
        let table = ProcessTableSampler::linux(Arc::clone(&settings));
        let actions = ProcessActions::new(table.source());
        let dashboard = Arc::new(DashboardModel::new(
            Arc::clone(&sampler),
            table,
            Arc::clone(&settings),
        ));
        let performance = Arc::new(PerformanceModel::new(sampler, Arc::clone(&settings)));
        let tree = dashboard.tree();

        Ok(Self {
            terminal,
            state,
            keys: KeyBindings::from_config(&config.keybindings),
            interval: Duration::from_millis(config.general.tick_interval_ms.max(100)),
            settings,
            dashboard,
            performance,
            tree,
            actions,
            dispatcher: None,
            page_loop: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.setup_terminal()?;

        let (mut event_handler, event_tx) = EventHandler::new();
        EventHandler::spawn_sources(event_tx.clone());
        EventHandler::spawn_settings(self.settings.subscribe(), event_tx.clone());
        self.dispatcher = Some(UiDispatcher::new(event_tx));

        self.start_page(Page::Dashboard);
        self.render()?;

        let result = self.event_loop(&mut event_handler).await;

        if let Some(page_loop) = self.page_loop.take() {
            page_loop.shutdown().await;
        }
        self.shutdown()?;
        result
    }

    fn setup_terminal(&mut self) -> Result<()> {
        crossterm::terminal::enable_raw_mode()?;
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::EnterAlternateScreen,
            crossterm::event::EnableMouseCapture,
            crossterm::cursor::Hide,
        )?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::LeaveAlternateScreen,
            crossterm::event::DisableMouseCapture,
            crossterm::cursor::Show,
        )?;
        Ok(())
    }

    fn model(&self, page: Page) -> Arc<dyn PageModel> {
        match page {
            Page::Dashboard => self.dashboard.clone(),
            Page::Performance => self.performance.clone(),
        }
    }

    fn start_page(&mut self, page: Page) {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return;
        };
        self.page_loop = Some(PageLoop::spawn(
            self.model(page),
            self.state.clone(),
            dispatcher,
            self.interval,
        ));
        self.state.update(|s| {
            s.page = page;
            ((), Some(StateChange::PageChanged(page)))
        });
    }

    async fn switch_page(&mut self, page: Page) {
        if let Some(old) = self.page_loop.take() {
            if old.page() == page {
                self.page_loop = Some(old);
                return;
            }
            old.shutdown().await;
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.complete();
        }
        tracing::info!(%page, "switching page");
        self.start_page(page);
    }

    async fn event_loop(&mut self, event_handler: &mut EventHandler) -> Result<()> {
        loop {
            let Some(event) = event_handler.next().await else {
                break;
            };
            match self.handle_event(event).await? {
                EventResult::Continue => {}
                EventResult::Quit => break,
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) -> Result<EventResult> {
        match event {
            Event::Key(key) => {
                let result = self.handle_key(key).await?;
                self.render()?;
                Ok(result)
            }
            Event::Mouse(mouse) => {
                let delta = match mouse.kind {
                    MouseEventKind::ScrollUp => -3,
                    MouseEventKind::ScrollDown => 3,
                    _ => return Ok(EventResult::Continue),
                };
                if self.state.read().page == Page::Dashboard {
                    self.move_cursor(delta);
                    self.render()?;
                }
                Ok(EventResult::Continue)
            }
            Event::Resize(w, h) => {
                self.state.update(|s| {
                    s.terminal_size = (w, h);
                    ((), None)
                });
                self.render()?;
                Ok(EventResult::Continue)
            }
            Event::Tick => {
                self.state.update(|s| {
                    s.remove_expired_notifications();
                    ((), None)
                });
                self.render()?;
                Ok(EventResult::Continue)
            }
            Event::PageUpdated(page) => {
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.complete();
                }
                if self.state.read().page == page {
                    self.render()?;
                }
                Ok(EventResult::Continue)
            }
            Event::Settings(change) => {
                self.apply_settings(change);
                self.render()?;
                Ok(EventResult::Continue)
            }
        }
    }

    fn apply_settings(&mut self, change: SettingsChange) {
        tracing::debug!(?change, "applying settings change");
        let config = self.settings.snapshot();
        self.keys = KeyBindings::from_config(&config.keybindings);
        {
            let mut tree = self.tree.lock();
            tree.apply_config(&config.processes);
            publish_processes(&tree, &self.state);
        }
        self.state.update(|s| {
            s.theme = Theme::from_name(&config.general.theme);
            s.dashboard.two_column_drives_at_four = config.display.two_column_drives_at_four;
            s.performance.per_core_view = config.display.cpu_per_core_view;
            ((), None)
        });
        if let SettingsChange::Grouping(enabled) = change {
            let label = if enabled { "Grouping by name" } else { "Grouping off" };
            self.state.notify(label, NotificationLevel::Info);
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) -> Result<EventResult> {
        let mode = self.state.read().mode.clone();
        match mode {
            AppMode::Normal => self.handle_normal_key(key).await,
            AppMode::Help => {
                if KeyBindings::escape().matches(&key)
                    || self.keys.help.matches(&key)
                    || self.keys.quit.matches(&key)
                {
                    self.set_mode(AppMode::Normal);
                }
                Ok(EventResult::Continue)
            }
            AppMode::Search => {
                self.handle_search_key(key);
                Ok(EventResult::Continue)
            }
            AppMode::ConfirmKill { target, label, tree } => {
                self.handle_confirm_key(key, target, label, tree).await;
                Ok(EventResult::Continue)
            }
        }
    }

    fn set_mode(&self, mode: AppMode) {
        // Interactive modes hold the process order still.
        let interacting = matches!(mode, AppMode::Search | AppMode::ConfirmKill { .. });
        self.tree.lock().set_suppress_sort(interacting);
        self.state.update(|s| {
            s.mode = mode.clone();
            ((), Some(StateChange::ModeChanged(mode)))
        });
    }

    async fn handle_normal_key(&mut self, key: KeyEvent) -> Result<EventResult> {
        if self.keys.quit.matches(&key) || KeyBindings::quit_alt().matches(&key) {
            return Ok(EventResult::Quit);
        }
        if self.keys.help.matches(&key) {
            self.set_mode(AppMode::Help);
            return Ok(EventResult::Continue);
        }
        if self.keys.page.matches(&key) {
            let next = self.state.read().page.next();
            self.switch_page(next).await;
            return Ok(EventResult::Continue);
        }
        if self.state.read().page != Page::Dashboard {
            return Ok(EventResult::Continue);
        }

        if KeyBindings::kill_tree().matches(&key) {
            self.request_kill(true);
        } else if self.keys.kill.matches(&key) {
            self.request_kill(false);
        } else if self.keys.search.matches(&key) {
            self.set_mode(AppMode::Search);
        } else if self.keys.group.matches(&key) {
            // Round-trips through the settings store so other consumers see it.
            self.settings
                .update(|c| c.processes.group_same_names = !c.processes.group_same_names);
        } else if self.keys.pin.matches(&key) {
            self.with_cursor_row(|tree, key| {
                tree.toggle_pin(key);
            });
        } else if KeyBindings::expand().matches(&key) || key.code == KeyCode::Right {
            self.with_cursor_row(|tree, key| {
                tree.toggle_expanded(key);
            });
        } else if KeyBindings::enter().matches(&key) {
            self.with_cursor_row(|tree, key| tree.toggle_selection(key));
        } else if KeyBindings::up().matches(&key) || KeyBindings::vim_up().matches(&key) {
            self.move_cursor(-1);
        } else if KeyBindings::down().matches(&key) || KeyBindings::vim_down().matches(&key) {
            self.move_cursor(1);
        } else if KeyBindings::page_up().matches(&key) {
            self.move_cursor(-10);
        } else if KeyBindings::page_down().matches(&key) {
            self.move_cursor(10);
        } else if let KeyCode::Char(c @ '1'..='4') = key.code {
            let column = match c {
                '1' => SortColumn::Name,
                '2' => SortColumn::Cpu,
                '3' => SortColumn::Memory,
                _ => SortColumn::Gpu,
            };
            let mut tree = self.tree.lock();
            tree.set_sort(column);
            publish_processes(&tree, &self.state);
        }
        Ok(EventResult::Continue)
    }

    fn move_cursor(&self, delta: isize) {
        self.state.update(|s| {
            s.dashboard.move_cursor(delta);
            ((), None)
        });
    }

    /// Run `f` on the row under the cursor and republish the rows.
    fn with_cursor_row(&self, f: impl FnOnce(&mut ProcessTreeReconciler, &NodeKey)) {
        let Some(key) = self.state.read().dashboard.cursor_row().map(|r| r.key.clone()) else {
            return;
        };
        let mut tree = self.tree.lock();
        f(&mut tree, &key);
        publish_processes(&tree, &self.state);
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        let mut query = self.state.read().dashboard.search.clone();
        match key.code {
            KeyCode::Esc => {
                query.clear();
                self.set_mode(AppMode::Normal);
            }
            KeyCode::Enter => self.set_mode(AppMode::Normal),
            KeyCode::Backspace => {
                query.pop();
            }
            KeyCode::Char(c) => query.push(c),
            _ => return,
        }
        let mut tree = self.tree.lock();
        tree.set_search(&query);
        publish_processes(&tree, &self.state);
    }

    fn request_kill(&mut self, tree: bool) {
        let Some(row) = self.state.read().dashboard.cursor_row().cloned() else {
            return;
        };
        let label = if row.instance_count > 1 {
            format!("{} ({} processes)", row.name, row.instance_count)
        } else {
            row.name.clone()
        };
        self.set_mode(AppMode::ConfirmKill {
            target: row.key,
            label,
            tree,
        });
    }

    async fn handle_confirm_key(&mut self, key: KeyEvent, target: NodeKey, label: String, tree: bool) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                self.set_mode(AppMode::Normal);
                let pids = self.tree.lock().member_pids(&target);
                let actions = self.actions.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || actions.kill_group(&pids, tree)).await;
                match outcome {
                    Ok(report) if report.success() => {
                        self.state
                            .notify(format!("Terminated {}", label), NotificationLevel::Success);
                    }
                    Ok(report) => {
                        let detail = report
                            .failed
                            .first()
                            .map(|(pid, err)| format!("{}: {}", pid, err))
                            .unwrap_or_default();
                        tracing::warn!(target = %target, failed = report.failed.len(), "kill incomplete");
                        self.state.notify(
                            format!("Could not terminate {} ({})", label, detail),
                            NotificationLevel::Error,
                        );
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "kill task failed");
                        self.state
                            .notify(format!("Kill failed: {}", err), NotificationLevel::Error);
                    }
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.set_mode(AppMode::Normal);
            }
            _ => {}
        }
    }

    fn render(&mut self) -> Result<()> {
        let state = self.state.snapshot();
        self.terminal.draw(|frame| {
            Renderer::render(frame, &state);
        })?;
        Ok(())
    }
}
