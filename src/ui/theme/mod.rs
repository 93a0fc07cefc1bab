//! Color palettes and the derived styles the widgets draw with

use ratatui::style::{Color, Modifier, Style};

/// Usage above this renders in the warning color.
const USAGE_MEDIUM: f64 = 50.0;
/// Usage above this renders in the critical color.
const USAGE_HIGH: f64 = 85.0;

#[derive(Debug, Clone)]
pub struct Theme {
    pub name: String,
    pub colors: ThemeColors,
    pub styles: ThemeStyles,
}

#[derive(Debug, Clone)]
pub struct ThemeColors {
    pub bg: Color,
    pub surface: Color,
    pub overlay: Color,
    pub selection: Color,

    pub text: Color,
    pub subtext: Color,
    pub muted: Color,

    pub accent: Color,
    pub accent_alt: Color,

    // Load levels
    pub low: Color,
    pub medium: Color,
    pub high: Color,
    pub info: Color,

    pub border: Color,
    pub border_active: Color,
}

#[derive(Debug, Clone)]
pub struct ThemeStyles {
    pub header: Style,
    pub footer: Style,
    pub panel_title: Style,
    pub panel_border: Style,
    pub panel_border_active: Style,
    pub row: Style,
    pub row_cursor: Style,
    pub row_selected: Style,
    pub row_group: Style,
    pub pin_marker: Style,
    pub label: Style,
    pub value: Style,
    pub sparkline: Style,
    pub keybind: Style,
    pub keybind_key: Style,
    pub notification_info: Style,
    pub notification_success: Style,
    pub notification_warning: Style,
    pub notification_error: Style,
}

impl Theme {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "catppuccin" | "catppuccin-mocha" => Self::catppuccin_mocha(),
            "nord" => Self::nord(),
            "gruvbox" => Self::gruvbox(),
            "tokyo-night" | "tokyonight" => Self::tokyo_night(),
            other => {
                tracing::debug!(theme = other, "unknown theme, using tokyo-night");
                Self::tokyo_night()
            }
        }
    }

    pub fn tokyo_night() -> Self {
        Self::from_colors(
            "Tokyo Night",
            ThemeColors {
                bg: Color::Rgb(26, 27, 38),
                surface: Color::Rgb(36, 40, 59),
                overlay: Color::Rgb(41, 46, 66),
                selection: Color::Rgb(52, 59, 88),
                text: Color::Rgb(192, 202, 245),
                subtext: Color::Rgb(169, 177, 214),
                muted: Color::Rgb(86, 95, 137),
                accent: Color::Rgb(122, 162, 247),
                accent_alt: Color::Rgb(187, 154, 247),
                low: Color::Rgb(158, 206, 106),
                medium: Color::Rgb(224, 175, 104),
                high: Color::Rgb(247, 118, 142),
                info: Color::Rgb(125, 207, 255),
                border: Color::Rgb(41, 46, 66),
                border_active: Color::Rgb(122, 162, 247),
            },
        )
    }

    pub fn catppuccin_mocha() -> Self {
        Self::from_colors(
            "Catppuccin Mocha",
            ThemeColors {
                bg: Color::Rgb(30, 30, 46),
                surface: Color::Rgb(49, 50, 68),
                overlay: Color::Rgb(69, 71, 90),
                selection: Color::Rgb(88, 91, 112),
                text: Color::Rgb(205, 214, 244),
                subtext: Color::Rgb(186, 194, 222),
                muted: Color::Rgb(147, 153, 178),
                accent: Color::Rgb(137, 180, 250),
                accent_alt: Color::Rgb(203, 166, 247),
                low: Color::Rgb(166, 227, 161),
                medium: Color::Rgb(249, 226, 175),
                high: Color::Rgb(243, 139, 168),
                info: Color::Rgb(148, 226, 213),
                border: Color::Rgb(69, 71, 90),
                border_active: Color::Rgb(137, 180, 250),
            },
        )
    }

    pub fn nord() -> Self {
        Self::from_colors(
            "Nord",
            ThemeColors {
                bg: Color::Rgb(46, 52, 64),
                surface: Color::Rgb(59, 66, 82),
                overlay: Color::Rgb(67, 76, 94),
                selection: Color::Rgb(76, 86, 106),
                text: Color::Rgb(236, 239, 244),
                subtext: Color::Rgb(229, 233, 240),
                muted: Color::Rgb(143, 153, 171),
                accent: Color::Rgb(136, 192, 208),
                accent_alt: Color::Rgb(129, 161, 193),
                low: Color::Rgb(163, 190, 140),
                medium: Color::Rgb(235, 203, 139),
                high: Color::Rgb(191, 97, 106),
                info: Color::Rgb(136, 192, 208),
                border: Color::Rgb(67, 76, 94),
                border_active: Color::Rgb(136, 192, 208),
            },
        )
    }

    pub fn gruvbox() -> Self {
        Self::from_colors(
            "Gruvbox",
            ThemeColors {
                bg: Color::Rgb(40, 40, 40),
                surface: Color::Rgb(60, 56, 54),
                overlay: Color::Rgb(80, 73, 69),
                selection: Color::Rgb(102, 92, 84),
                text: Color::Rgb(235, 219, 178),
                subtext: Color::Rgb(213, 196, 161),
                muted: Color::Rgb(168, 153, 132),
                accent: Color::Rgb(131, 165, 152),
                accent_alt: Color::Rgb(211, 134, 155),
                low: Color::Rgb(184, 187, 38),
                medium: Color::Rgb(250, 189, 47),
                high: Color::Rgb(251, 73, 52),
                info: Color::Rgb(131, 165, 152),
                border: Color::Rgb(80, 73, 69),
                border_active: Color::Rgb(131, 165, 152),
            },
        )
    }

    fn from_colors(name: &str, colors: ThemeColors) -> Self {
        let styles = ThemeStyles {
            header: Style::default().bg(colors.surface).fg(colors.text),
            footer: Style::default().bg(colors.surface).fg(colors.muted),
            panel_title: Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
            panel_border: Style::default().fg(colors.border),
            panel_border_active: Style::default().fg(colors.border_active),
            row: Style::default().fg(colors.text),
            row_cursor: Style::default()
                .fg(colors.text)
                .bg(colors.selection)
                .add_modifier(Modifier::BOLD),
            row_selected: Style::default().fg(colors.accent_alt),
            row_group: Style::default().fg(colors.info),
            pin_marker: Style::default().fg(colors.medium),
            label: Style::default().fg(colors.subtext),
            value: Style::default().fg(colors.text).add_modifier(Modifier::BOLD),
            sparkline: Style::default().fg(colors.accent),
            keybind: Style::default().fg(colors.muted),
            keybind_key: Style::default()
                .fg(colors.accent_alt)
                .add_modifier(Modifier::BOLD),
            notification_info: Style::default().fg(colors.info),
            notification_success: Style::default().fg(colors.low),
            notification_warning: Style::default().fg(colors.medium),
            notification_error: Style::default().fg(colors.high),
        };

        Self {
            name: name.to_string(),
            colors,
            styles,
        }
    }

    /// Load color for a 0-100 reading.
    pub fn usage_color(&self, percent: f64) -> Color {
        if percent >= USAGE_HIGH {
            self.colors.high
        } else if percent >= USAGE_MEDIUM {
            self.colors.medium
        } else {
            self.colors.low
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::tokyo_night()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_name_falls_back() {
        assert_eq!(Theme::from_name("Nord").name, "Nord");
        assert_eq!(Theme::from_name("catppuccin").name, "Catppuccin Mocha");
        assert_eq!(Theme::from_name("solarized").name, "Tokyo Night");
    }

    #[test]
    fn test_usage_color_thresholds() {
        let theme = Theme::gruvbox();
        assert_eq!(theme.usage_color(10.0), theme.colors.low);
        assert_eq!(theme.usage_color(50.0), theme.colors.medium);
        assert_eq!(theme.usage_color(99.0), theme.colors.high);
    }
}
