//! Footer widget with keybindings

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Widget,
};

use crate::core::state::{AppMode, AppState, Page};
use crate::ui::theme::Theme;

pub struct Footer<'a> {
    state: &'a AppState,
    theme: &'a Theme,
}

impl<'a> Footer<'a> {
    pub fn new(state: &'a AppState, theme: &'a Theme) -> Self {
        Self { state, theme }
    }

    fn bindings(&self) -> Vec<(&'static str, &'static str)> {
        match (&self.state.mode, self.state.page) {
            (AppMode::Normal, Page::Dashboard) => vec![
                ("↑/↓", "Move"),
                ("Enter", "Select"),
                ("Space", "Expand"),
                ("p", "Pin"),
                ("g", "Group"),
                ("/", "Search"),
                ("1-4", "Sort"),
                ("K", "Kill"),
                ("Tab", "Page"),
                ("?", "Help"),
                ("q", "Quit"),
            ],
            (AppMode::Normal, Page::Performance) => {
                vec![("Tab", "Page"), ("?", "Help"), ("q", "Quit")]
            }
            (AppMode::Help, _) => vec![("Esc", "Close")],
            (AppMode::Search, _) => vec![("Enter", "Keep"), ("Esc", "Clear")],
            (AppMode::ConfirmKill { .. }, _) => vec![("y", "Confirm"), ("n", "Cancel")],
        }
    }
}

impl<'a> Widget for Footer<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        buf.set_style(area, self.theme.styles.footer);

        let mut spans = Vec::new();
        let search = &self.state.dashboard.search;
        if self.state.mode == AppMode::Search || !search.is_empty() {
            spans.push(Span::styled("/", self.theme.styles.keybind_key));
            spans.push(Span::styled(
                search.clone(),
                Style::default().fg(self.theme.colors.text),
            ));
            if self.state.mode == AppMode::Search {
                spans.push(Span::styled("█", Style::default().fg(self.theme.colors.accent)));
            }
            spans.push(Span::styled("   ", self.theme.styles.keybind));
        }

        for (i, (key, action)) in self.bindings().iter().enumerate() {
            if i > 0 {
                spans.push(Span::styled("  ", self.theme.styles.keybind));
            }
            spans.push(Span::styled(format!("[{}]", key), self.theme.styles.keybind_key));
            spans.push(Span::styled(format!(" {}", action), self.theme.styles.keybind));
        }

        let line = Line::from(spans);
        buf.set_line(area.x + 1, area.y, &line, area.width.saturating_sub(2));
    }
}
