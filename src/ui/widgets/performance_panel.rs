//! Performance page: per-entity history, CPU cores and network traffic

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Sparkline, Widget},
};

use crate::core::state::AppState;
use crate::telemetry::format::format_rate;
use crate::ui::theme::Theme;
use crate::ui::widgets::metrics_panel::usage_bar;

/// Rows per history entry: caption plus a two-row sparkline.
const ENTRY_HEIGHT: u16 = 3;

fn panel<'b>(title: &'b str, theme: &Theme) -> Block<'b> {
    Block::default()
        .title(Span::styled(title, theme.styles.panel_title))
        .borders(Borders::ALL)
        .border_style(theme.styles.panel_border)
        .style(Style::default().bg(theme.colors.bg))
}

/// Scale percentages to the integer domain `Sparkline` draws.
fn to_points(values: &[f64], width: u16) -> Vec<u64> {
    let start = values.len().saturating_sub(width as usize);
    values[start..]
        .iter()
        .map(|v| (v.max(0.0) * 10.0).round() as u64)
        .collect()
}

pub struct HistoryPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> HistoryPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }
}

impl<'a> Widget for HistoryPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = panel(" HISTORY ", self.theme);
        let inner = block.inner(area);
        block.render(area, buf);

        let history = &self.state.performance.history;
        if history.is_empty() {
            let span = Span::styled("Collecting…", Style::default().fg(self.theme.colors.muted));
            buf.set_span(inner.x + 1, inner.y, &span, inner.width.saturating_sub(1));
            return;
        }

        for (i, (name, values)) in history.iter().enumerate() {
            let y = inner.y + i as u16 * ENTRY_HEIGHT;
            if y + ENTRY_HEIGHT > inner.y + inner.height {
                break;
            }
            let latest = values.last().copied().unwrap_or(0.0);
            let caption = Line::from(vec![
                Span::styled(name.clone(), self.theme.styles.label),
                Span::styled(
                    format!("  {:.0}%", latest),
                    Style::default().fg(self.theme.usage_color(latest)),
                ),
            ]);
            buf.set_line(inner.x, y, &caption, inner.width);

            let points = to_points(values, inner.width);
            Sparkline::default()
                .data(&points)
                .max(1000)
                .style(Style::default().fg(self.theme.usage_color(latest)))
                .render(
                    Rect {
                        y: y + 1,
                        height: ENTRY_HEIGHT - 1,
                        ..inner
                    },
                    buf,
                );
        }
    }
}

pub struct CoresPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> CoresPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }
}

impl<'a> Widget for CoresPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let perf = &self.state.performance;
        let title = format!(" {} ", perf.cpu.cores_and_threads);
        let block = panel(&title, self.theme);
        let inner = block.inner(area);
        block.render(area, buf);
        if inner.height == 0 {
            return;
        }

        let bar_width = (inner.width as usize).saturating_sub(12);
        let line = |label: String, percent: f64| {
            Line::from(vec![
                Span::styled(format!("{:<5}", label), self.theme.styles.label),
                Span::styled(
                    usage_bar(percent, bar_width),
                    Style::default().fg(self.theme.usage_color(percent)),
                ),
                Span::styled(format!(" {:>4.0}%", percent), self.theme.styles.value),
            ])
        };

        let mut lines = vec![line("CPU".to_string(), perf.cpu.usage)];
        if perf.per_core_view {
            lines.extend(
                perf.cpu
                    .per_core_usage
                    .iter()
                    .enumerate()
                    .map(|(i, &usage)| line(format!("#{}", i), usage)),
            );
        } else {
            lines.push(line("RAM".to_string(), perf.ram.usage));
        }

        for (i, l) in lines.iter().take(inner.height as usize).enumerate() {
            buf.set_line(inner.x, inner.y + i as u16, l, inner.width);
        }
    }
}

pub struct NetworkPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> NetworkPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }
}

impl<'a> Widget for NetworkPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = panel(" NETWORK ", self.theme);
        let inner = block.inner(area);
        block.render(area, buf);

        let perf = &self.state.performance;
        let halves = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
            .split(inner);

        let series = [
            ("↑", &perf.upload_history, self.theme.colors.accent),
            ("↓", &perf.download_history, self.theme.colors.accent_alt),
        ];
        for (half, (arrow, history, color)) in halves.iter().zip(series) {
            if half.height == 0 {
                continue;
            }
            let latest = history.last().copied().unwrap_or(0.0);
            let caption = Span::styled(
                format!("{} {}", arrow, format_rate(latest * 1_000_000.0)),
                self.theme.styles.label,
            );
            buf.set_span(half.x, half.y, &caption, half.width);

            // Mbps histories share one scale per series.
            let points: Vec<u64> = history
                .iter()
                .rev()
                .take(half.width as usize)
                .rev()
                .map(|v| (v.max(0.0) * 1000.0).round() as u64)
                .collect();
            Sparkline::default()
                .data(&points)
                .style(Style::default().fg(color))
                .render(
                    Rect {
                        y: half.y + 1,
                        height: half.height.saturating_sub(1),
                        ..*half
                    },
                    buf,
                );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_points_take_newest_window() {
        assert_eq!(to_points(&[1.0, 2.5, 100.0], 2), vec![25, 1000]);
        assert_eq!(to_points(&[-3.0], 4), vec![0]);
    }
}
