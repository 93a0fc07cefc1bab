//! Help overlay widget

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Widget},
};

use crate::ui::theme::Theme;

const SECTIONS: [(&str, &[(&str, &str)]); 4] = [
    (
        "General",
        &[
            ("q", "Quit"),
            ("?", "Toggle help"),
            ("Tab", "Next page"),
        ],
    ),
    (
        "Processes",
        &[
            ("↑/k ↓/j", "Move cursor"),
            ("PgUp/PgDn", "Move by ten rows"),
            ("Enter", "Select row"),
            ("Space", "Expand or collapse children"),
            ("p", "Pin row to the top"),
            ("g", "Group processes by name"),
            ("/", "Search by name"),
        ],
    ),
    (
        "Sorting",
        &[
            ("1", "Name"),
            ("2", "CPU"),
            ("3", "Memory"),
            ("4", "GPU (again to reverse)"),
        ],
    ),
    (
        "Terminate",
        &[
            ("K", "Terminate row"),
            ("Ctrl-k", "Terminate row with descendants"),
        ],
    ),
];

pub struct HelpOverlay<'a> {
    theme: &'a Theme,
}

impl<'a> HelpOverlay<'a> {
    pub fn new(theme: &'a Theme) -> Self {
        Self { theme }
    }
}

impl<'a> Widget for HelpOverlay<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        Clear.render(area, buf);

        let block = Block::default()
            .title(Span::styled(" Vigil Help ", self.theme.styles.panel_title))
            .borders(Borders::ALL)
            .border_style(self.theme.styles.panel_border_active)
            .style(Style::default().bg(self.theme.colors.surface));

        let inner = block.inner(area);
        block.render(area, buf);

        let mut y = inner.y;
        let bottom = inner.y + inner.height;

        for (section, bindings) in SECTIONS {
            if y >= bottom {
                break;
            }

            let header = Line::from(vec![Span::styled(
                format!("─── {} ", section),
                Style::default()
                    .fg(self.theme.colors.accent)
                    .add_modifier(Modifier::BOLD),
            )]);
            buf.set_line(inner.x + 1, y, &header, inner.width.saturating_sub(2));
            y += 1;

            for (key, desc) in bindings {
                if y >= bottom {
                    break;
                }
                let line = Line::from(vec![
                    Span::styled(format!("  {:>10}  ", key), self.theme.styles.keybind_key),
                    Span::styled(*desc, self.theme.styles.keybind),
                ]);
                buf.set_line(inner.x + 1, y, &line, inner.width.saturating_sub(2));
                y += 1;
            }

            y += 1;
        }

        let hint = " Press Esc or ? to close ";
        if area.height > 0 && area.width as usize > hint.len() {
            let footer = Span::styled(hint, Style::default().fg(self.theme.colors.muted));
            buf.set_span(
                area.x + (area.width - hint.len() as u16) / 2,
                area.y + area.height - 1,
                &footer,
                hint.len() as u16,
            );
        }
    }
}
