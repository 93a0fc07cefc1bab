//! Process forest table and the top-consumers list

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};
use unicode_width::UnicodeWidthStr;

use crate::core::state::{AppMode, AppState};
use crate::process::{ProcessRow, SortColumn, SortState};
use crate::telemetry::format::format_bytes;
use crate::ui::theme::Theme;

const NUMERIC_WIDTH: usize = 8;

/// Truncate or pad to exactly `width` terminal cells.
fn fit(text: &str, width: usize) -> String {
    if text.width() <= width {
        return format!("{}{}", text, " ".repeat(width - text.width()));
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + 2 > width {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    format!("{}{}", out, " ".repeat(width.saturating_sub(out.width())))
}

fn column_header(sort: SortState, column: SortColumn, label: &str) -> String {
    if sort.column != column {
        return label.to_string();
    }
    let arrow = if sort.descending { '▼' } else { '▲' };
    format!("{}{}", label, arrow)
}

fn tree_marker(row: &ProcessRow) -> &'static str {
    match (row.has_children, row.is_expanded) {
        (true, true) => "▾ ",
        (true, false) => "▸ ",
        (false, _) => "  ",
    }
}

pub struct ProcessPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> ProcessPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }

    fn row_line(&self, row: &ProcessRow, name_width: usize, is_cursor: bool) -> Line<'a> {
        let theme = self.theme;
        let base = if is_cursor {
            theme.styles.row_cursor
        } else if row.is_selected {
            theme.styles.row_selected
        } else if row.is_group {
            theme.styles.row_group
        } else {
            theme.styles.row
        };

        let pin = if row.is_pinned { "● " } else { "  " };
        let mut name = format!("{}{}{}", "  ".repeat(row.depth), tree_marker(row), row.name);
        if row.instance_count > 1 {
            name.push_str(&format!(" ({})", row.instance_count));
        }

        let numeric = |text: String, percent: Option<f64>| {
            let style = match percent {
                Some(p) if !is_cursor => base.fg(theme.usage_color(p)),
                _ => base,
            };
            Span::styled(format!("{:>w$}", text, w = NUMERIC_WIDTH), style)
        };

        Line::from(vec![
            Span::styled(pin, if is_cursor { base } else { theme.styles.pin_marker }),
            Span::styled(fit(&name, name_width), base),
            numeric(format!("{:.1}%", row.cpu_percent), Some(row.cpu_percent)),
            numeric(format_bytes(row.memory_bytes), None),
            numeric(format!("{:.1}%", row.gpu_percent), Some(row.gpu_percent)),
        ])
    }
}

impl<'a> Widget for ProcessPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let dash = &self.state.dashboard;
        let mut title = format!(" PROCESSES {} ", dash.process_count);
        if dash.grouping {
            title.push_str("· grouped ");
        }
        let searching = self.state.mode == AppMode::Search;
        let block = Block::default()
            .title(Span::styled(title, self.theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(if searching {
                self.theme.styles.panel_border_active
            } else {
                self.theme.styles.panel_border
            })
            .style(Style::default().bg(self.theme.colors.bg));

        let inner = block.inner(area);
        block.render(area, buf);
        if inner.height < 2 || inner.width < 10 {
            return;
        }

        let name_width = (inner.width as usize).saturating_sub(2 + NUMERIC_WIDTH * 3);
        let header = Line::from(vec![
            Span::raw("  "),
            Span::raw(fit(&column_header(dash.sort, SortColumn::Name, "Name"), name_width)),
            Span::raw(format!(
                "{:>w$}{:>w$}{:>w$}",
                column_header(dash.sort, SortColumn::Cpu, "CPU"),
                column_header(dash.sort, SortColumn::Memory, "Mem"),
                column_header(dash.sort, SortColumn::Gpu, "GPU"),
                w = NUMERIC_WIDTH
            )),
        ])
        .style(self.theme.styles.label.add_modifier(Modifier::UNDERLINED));
        buf.set_line(inner.x, inner.y, &header, inner.width);

        if dash.rows.is_empty() {
            let message = if dash.search.is_empty() {
                "Waiting for samples…"
            } else {
                "No matching processes"
            };
            let span = Span::styled(message, Style::default().fg(self.theme.colors.muted));
            buf.set_span(inner.x + 2, inner.y + 1, &span, inner.width.saturating_sub(2));
            return;
        }

        // Scroll so the cursor stays visible.
        let visible = (inner.height - 1) as usize;
        let offset = dash.cursor.saturating_sub(visible.saturating_sub(1));
        for (i, row) in dash.rows.iter().skip(offset).take(visible).enumerate() {
            let line = self.row_line(row, name_width, offset + i == dash.cursor);
            buf.set_line(inner.x, inner.y + 1 + i as u16, &line, inner.width);
        }
    }
}

/// Heaviest processes by smoothed CPU.
pub struct TopProcesses<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> TopProcesses<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }
}

impl<'a> Widget for TopProcesses<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(Span::styled(" TOP ", self.theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(self.theme.styles.panel_border)
            .style(Style::default().bg(self.theme.colors.bg));
        let inner = block.inner(area);
        block.render(area, buf);

        let name_width = (inner.width as usize).saturating_sub(NUMERIC_WIDTH);
        for (i, row) in self
            .state
            .dashboard
            .top
            .iter()
            .take(inner.height as usize)
            .enumerate()
        {
            let line = Line::from(vec![
                Span::styled(fit(&row.name, name_width), self.theme.styles.row),
                Span::styled(
                    format!("{:>w$.1}%", row.cpu_percent, w = NUMERIC_WIDTH - 1),
                    Style::default().fg(self.theme.usage_color(row.cpu_percent)),
                ),
            ]);
            buf.set_line(inner.x, inner.y + i as u16, &line, inner.width);
        }
    }
}
