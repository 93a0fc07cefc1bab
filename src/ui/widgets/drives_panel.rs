//! Storage cards in one or two columns

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

use crate::core::state::AppState;
use crate::telemetry::format::format_size_gb;
use crate::telemetry::StorageInfo;
use crate::ui::layout::DriveLayout;
use crate::ui::theme::Theme;
use crate::ui::widgets::metrics_panel::usage_bar;

const CARD_HEIGHT: u16 = 2;

pub struct DrivesPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> DrivesPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }

    fn render_card(&self, drive: &StorageInfo, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let kind = drive.media_kind.to_string();
        let mut title = format!("{} {}", drive.name, drive.mount_point);
        if !kind.is_empty() {
            title.push_str(&format!(" · {}", kind));
        }
        let bar_width = (area.width as usize).saturating_sub(8).min(20);
        let first = Line::from(vec![
            Span::styled(
                usage_bar(drive.used_percent, bar_width),
                Style::default().fg(self.theme.usage_color(drive.used_percent)),
            ),
            Span::styled(format!(" {:>3.0}%  ", drive.used_percent), self.theme.styles.value),
            Span::styled(title, self.theme.styles.label),
        ]);
        buf.set_line(area.x, area.y, &first, area.width);

        if area.height > 1 {
            let second = Line::from(vec![
                Span::styled(
                    format!(
                        "{} free of {}",
                        format_size_gb(drive.free_gb),
                        format_size_gb(drive.total_gb)
                    ),
                    self.theme.styles.label,
                ),
                Span::styled(
                    format!("  active {:.0}%", drive.activity_percent),
                    Style::default().fg(self.theme.usage_color(drive.activity_percent)),
                ),
            ]);
            buf.set_line(area.x, area.y + 1, &second, area.width);
        }
    }

    fn render_column(&self, indices: &[usize], area: Rect, buf: &mut Buffer) {
        let drives = &self.state.dashboard.snapshot.storage;
        for (slot, &index) in indices.iter().enumerate() {
            let y = area.y + slot as u16 * CARD_HEIGHT;
            if y >= area.y + area.height {
                break;
            }
            let card = Rect {
                y,
                height: CARD_HEIGHT.min(area.y + area.height - y),
                ..area
            };
            if let Some(drive) = drives.get(index) {
                self.render_card(drive, card, buf);
            }
        }
    }
}

impl<'a> Widget for DrivesPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let dash = &self.state.dashboard;
        let block = Block::default()
            .title(Span::styled(" STORAGE ", self.theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(self.theme.styles.panel_border)
            .style(Style::default().bg(self.theme.colors.bg));
        let mut inner = block.inner(area);
        block.render(area, buf);

        let layout = DriveLayout::compute(&dash.snapshot.storage, dash.two_column_drives_at_four);

        if let Some(system) = layout.system_row {
            if let Some(drive) = dash.snapshot.storage.get(system) {
                let row = Rect {
                    height: CARD_HEIGHT.min(inner.height),
                    ..inner
                };
                self.render_card(drive, row, buf);
                inner.y += row.height;
                inner.height -= row.height;
            }
        }

        if !layout.two_column {
            self.render_column(&layout.left, inner, buf);
            return;
        }

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(inner);
        self.render_column(&layout.left, columns[0], buf);
        self.render_column(&layout.right, columns[1], buf);
    }
}
