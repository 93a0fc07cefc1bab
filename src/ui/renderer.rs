//! Main UI renderer

use ratatui::{
    layout::{Alignment, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::core::state::{AppMode, AppState, NotificationLevel};
use crate::ui::layout::{centered_rect, LayoutManager};
use crate::ui::widgets::*;

pub struct Renderer;

impl Renderer {
    pub fn render(frame: &mut Frame, state: &AppState) {
        let area = frame.area();
        let theme = &state.theme;

        frame.render_widget(
            Block::default().style(Style::default().bg(theme.colors.bg)),
            area,
        );

        let layout = LayoutManager::compute(area, state);

        frame.render_widget(Header::new(state, theme), layout.header);
        frame.render_widget(Footer::new(state, theme), layout.footer);

        if let Some(dash) = &layout.dashboard {
            let cards = [Card::Cpu, Card::Ram, Card::Gpu, Card::Network];
            for (card, rect) in cards.into_iter().zip(dash.cards) {
                frame.render_widget(MetricsPanel::new(state, theme, card), rect);
            }
            frame.render_widget(ProcessPanel::new(state, theme), dash.processes);
            frame.render_widget(TopProcesses::new(state, theme), dash.top);
            frame.render_widget(DrivesPanel::new(state, theme), dash.drives);
        }

        if let Some(perf) = &layout.performance {
            frame.render_widget(HistoryPanel::new(state, theme), perf.history);
            frame.render_widget(CoresPanel::new(state, theme), perf.cores);
            frame.render_widget(NetworkPanel::new(state, theme), perf.network);
        }

        match &state.mode {
            AppMode::Help => {
                frame.render_widget(HelpOverlay::new(theme), layout.overlay_area);
            }
            AppMode::ConfirmKill { label, tree, .. } => {
                let message = if *tree {
                    format!("Terminate {} and all of its descendants?", label)
                } else {
                    format!("Terminate {}?", label)
                };
                Self::render_confirm_dialog(frame, state, &message, layout.overlay_area);
            }
            AppMode::Normal | AppMode::Search => {}
        }

        Self::render_notifications(frame, state);
    }

    fn render_confirm_dialog(frame: &mut Frame, state: &AppState, message: &str, area: Rect) {
        let theme = &state.theme;
        let dialog_area = centered_rect(50, 30, area);

        frame.render_widget(Clear, dialog_area);

        let block = Block::default()
            .title(Span::styled(" Confirm ", theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(theme.styles.panel_border_active)
            .style(Style::default().bg(theme.colors.surface));

        let inner = block.inner(dialog_area);
        frame.render_widget(block, dialog_area);
        if inner.height < 3 {
            return;
        }

        frame.render_widget(
            Paragraph::new(message)
                .style(Style::default().fg(theme.colors.text))
                .alignment(Alignment::Center),
            Rect {
                y: inner.y + 1,
                height: 1,
                ..inner
            },
        );

        let buttons = Line::from(vec![
            Span::styled("[Y]es", theme.styles.keybind_key),
            Span::styled("  ", theme.styles.keybind),
            Span::styled("[N]o", theme.styles.keybind_key),
        ]);

        frame.render_widget(
            Paragraph::new(buttons).alignment(Alignment::Center),
            Rect {
                y: inner.y + inner.height - 1,
                height: 1,
                ..inner
            },
        );
    }

    fn render_notifications(frame: &mut Frame, state: &AppState) {
        let theme = &state.theme;
        let area = frame.area();

        // Newest three, top-right corner
        let mut y = 2;
        for notification in state.notifications.iter().rev().take(3) {
            let (style, icon) = match notification.level {
                NotificationLevel::Info => (theme.styles.notification_info, "ℹ"),
                NotificationLevel::Success => (theme.styles.notification_success, "✓"),
                NotificationLevel::Warning => (theme.styles.notification_warning, "⚠"),
                NotificationLevel::Error => (theme.styles.notification_error, "✗"),
            };

            let msg = format!(" {} {} ", icon, notification.message);
            let width = (msg.width() as u16).min(48).min(area.width);
            if y >= area.height {
                break;
            }
            let notification_area = Rect {
                x: area.width.saturating_sub(width + 2),
                y,
                width,
                height: 1,
            };

            frame.render_widget(Clear, notification_area);
            frame.render_widget(
                Paragraph::new(Span::styled(msg, style))
                    .style(Style::default().bg(theme.colors.overlay)),
                notification_area,
            );

            y += 2;
        }
    }
}
