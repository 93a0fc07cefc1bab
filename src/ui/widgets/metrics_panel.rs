//! Summary cards for CPU, RAM, GPU and network

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

use crate::core::state::AppState;
use crate::telemetry::format::{format_size_gb, format_used_of_total};
use crate::ui::theme::Theme;

const SPARK_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// `█░` bar for a 0-100 reading.
pub fn usage_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    "█".repeat(filled) + &"░".repeat(width - filled)
}

/// One-line sparkline of the newest `width` values, scaled to `max`.
pub fn spark_line(values: &[f64], width: usize, max: f64) -> String {
    let max = if max > 0.0 { max } else { 1.0 };
    let start = values.len().saturating_sub(width);
    values[start..]
        .iter()
        .map(|&v| {
            let idx = ((v.max(0.0) / max) * 7.0).round() as usize;
            SPARK_CHARS[idx.min(7)]
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Card {
    Cpu,
    Ram,
    Gpu,
    Network,
}

pub struct MetricsPanel<'a> {
    state: &'a AppState,
    theme: &'a Theme,
    card: Card,
}

impl<'a> MetricsPanel<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme, card: Card) -> Self {
        Self { state, theme, card }
    }

    fn title(&self) -> String {
        let snapshot = &self.state.dashboard.snapshot;
        match self.card {
            Card::Cpu => " CPU ".to_string(),
            Card::Ram => " MEMORY ".to_string(),
            Card::Gpu if snapshot.gpus.len() > 1 => format!(" GPU ×{} ", snapshot.gpus.len()),
            Card::Gpu => " GPU ".to_string(),
            Card::Network => format!(" {} ", snapshot.network.kind.to_string().to_uppercase()),
        }
    }

    fn lines(&self, width: usize) -> Vec<Line<'a>> {
        let snapshot = &self.state.dashboard.snapshot;
        let label = self.theme.styles.label;
        let value = self.theme.styles.value;
        let bar_width = width.saturating_sub(6).min(24);

        match self.card {
            Card::Cpu => {
                let cpu = &snapshot.cpu;
                let mut details = Vec::new();
                if cpu.temperature_c > 0.0 {
                    details.push(format!("{:.0}°C", cpu.temperature_c));
                }
                if cpu.clock_ghz > 0.0 {
                    details.push(format!("{:.2} GHz", cpu.clock_ghz));
                }
                if cpu.power_watts > 0.0 {
                    details.push(format!("{:.0} W", cpu.power_watts));
                }
                vec![
                    self.gauge_line(cpu.usage, bar_width),
                    Line::from(Span::styled(cpu.name.clone(), label)),
                    Line::from(vec![
                        Span::styled(cpu.cores_and_threads.clone(), value),
                        Span::styled(format!("  {}", details.join("  ")), label),
                    ]),
                ]
            }
            Card::Ram => {
                let ram = &snapshot.ram;
                vec![
                    self.gauge_line(ram.usage, bar_width),
                    Line::from(Span::styled(
                        format_used_of_total(ram.used_gb, ram.total_gb),
                        value,
                    )),
                    Line::from(Span::styled(
                        [ram.type_and_speed.as_str(), ram.module_configuration.as_str()]
                            .iter()
                            .filter(|s| !s.is_empty())
                            .copied()
                            .collect::<Vec<_>>()
                            .join("  "),
                        label,
                    )),
                ]
            }
            Card::Gpu => match snapshot.gpus.first() {
                None => vec![Line::from(Span::styled("No adapters", label))],
                Some(gpu) => {
                    let mut lines = vec![
                        self.gauge_line(gpu.usage, bar_width),
                        Line::from(Span::styled(gpu.name.clone(), label)),
                        Line::from(Span::styled(gpu.memory_display.clone(), value)),
                    ];
                    for other in snapshot.gpus.iter().skip(1) {
                        lines.push(Line::from(Span::styled(
                            format!("{} {:>3.0}%", other.name, other.usage),
                            label,
                        )));
                    }
                    lines
                }
            },
            Card::Network => {
                let net = &snapshot.network;
                let spark = width.saturating_sub(14);
                let max = net
                    .upload_history
                    .iter()
                    .chain(&net.download_history)
                    .copied()
                    .fold(0.0, f64::max);
                vec![
                    Line::from(vec![
                        Span::styled(format!("{} ", net.status()), value),
                        Span::styled(net.ipv4.clone(), label),
                    ]),
                    Line::from(vec![
                        Span::styled(format!("↑ {:>10} ", net.upload_display), label),
                        Span::styled(
                            spark_line(&net.upload_history, spark, max),
                            self.theme.styles.sparkline,
                        ),
                    ]),
                    Line::from(vec![
                        Span::styled(format!("↓ {:>10} ", net.download_display), label),
                        Span::styled(
                            spark_line(&net.download_history, spark, max),
                            Style::default().fg(self.theme.colors.accent_alt),
                        ),
                    ]),
                ]
            }
        }
    }

    fn gauge_line(&self, percent: f64, width: usize) -> Line<'a> {
        let color = self.theme.usage_color(percent);
        Line::from(vec![
            Span::styled(usage_bar(percent, width), Style::default().fg(color)),
            Span::styled(format!(" {:>3.0}%", percent), self.theme.styles.value),
        ])
    }
}

impl<'a> Widget for MetricsPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(Span::styled(self.title(), self.theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(self.theme.styles.panel_border)
            .style(Style::default().bg(self.theme.colors.bg));

        let inner = block.inner(area);
        block.render(area, buf);

        for (i, line) in self
            .lines(inner.width as usize)
            .iter()
            .take(inner.height as usize)
            .enumerate()
        {
            buf.set_line(inner.x, inner.y + i as u16, line, inner.width);
        }

        if self.card == Card::Ram && inner.height > 3 {
            let ram = &self.state.dashboard.snapshot.ram;
            let extra = Span::styled(
                format!("cached {}", format_size_gb(ram.cached_gb)),
                self.theme.styles.label,
            );
            buf.set_span(inner.x, inner.y + 3, &extra, inner.width);
        }
    }
}
