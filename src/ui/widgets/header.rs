//! Header widget: page tabs, sample age and clock

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Widget,
};

use crate::core::state::{AppState, Page};
use crate::ui::theme::Theme;

pub struct Header<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> Header<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }

    fn separator(&self) -> Span<'static> {
        Span::styled(" │ ", Style::default().fg(self.theme.colors.muted))
    }
}

impl<'a> Widget for Header<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        buf.set_style(area, self.theme.styles.header);

        let mut spans = vec![Span::styled(
            " VIGIL ",
            Style::default()
                .fg(self.theme.colors.accent)
                .add_modifier(Modifier::BOLD),
        )];
        spans.push(self.separator());

        for page in Page::ALL {
            let style = if page == self.state.page {
                Style::default()
                    .fg(self.theme.colors.bg)
                    .bg(self.theme.colors.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.theme.colors.subtext)
            };
            spans.push(Span::styled(format!(" {} ", page), style));
            spans.push(Span::raw(" "));
        }

        let dash = &self.state.dashboard;
        if dash.process_count > 0 {
            spans.push(self.separator());
            spans.push(Span::styled(
                format!("{} processes", dash.process_count),
                Style::default().fg(self.theme.colors.info),
            ));
        }

        let sampled_at = match self.state.page {
            Page::Dashboard => dash.sampled_at,
            Page::Performance => self.state.performance.sampled_at,
        };
        if sampled_at.is_none() {
            spans.push(self.separator());
            spans.push(Span::styled(
                "sampling…",
                Style::default().fg(self.theme.colors.muted),
            ));
        }

        buf.set_line(area.x, area.y, &Line::from(spans), area.width);

        let time = chrono::Local::now().format("%H:%M:%S").to_string();
        let time_span = Span::styled(&time, Style::default().fg(self.theme.colors.muted));
        let time_x = area.x + area.width.saturating_sub(time.len() as u16 + 1);
        buf.set_span(time_x, area.y, &time_span, time.len() as u16);
    }
}
