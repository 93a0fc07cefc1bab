//! Layout management system

use ratatui::layout::{Constraint, Direction, Layout, Rect};

use crate::core::state::{AppState, Page};
use crate::telemetry::StorageInfo;

/// Computed layout rects for the active page
#[derive(Debug, Clone, Default)]
pub struct ComputedLayout {
    pub header: Rect,
    pub footer: Rect,
    pub overlay_area: Rect,
    pub dashboard: Option<DashboardAreas>,
    pub performance: Option<PerformanceAreas>,
}

#[derive(Debug, Clone, Default)]
pub struct DashboardAreas {
    /// CPU, RAM, GPU, network cards left to right
    pub cards: [Rect; 4],
    pub processes: Rect,
    pub top: Rect,
    pub drives: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceAreas {
    pub history: Rect,
    pub cores: Rect,
    pub network: Rect,
}

pub struct LayoutManager;

impl LayoutManager {
    pub fn compute(area: Rect, state: &AppState) -> ComputedLayout {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Header
                Constraint::Min(10),   // Body
                Constraint::Length(1), // Footer
            ])
            .split(area);

        let mut layout = ComputedLayout {
            header: main_chunks[0],
            footer: main_chunks[2],
            overlay_area: centered_rect(60, 70, area),
            ..Default::default()
        };

        match state.page {
            Page::Dashboard => layout.dashboard = Some(Self::dashboard(main_chunks[1], state)),
            Page::Performance => layout.performance = Some(Self::performance(main_chunks[1])),
        }
        layout
    }

    fn dashboard(body: Rect, state: &AppState) -> DashboardAreas {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(6)])
            .split(body);

        let cards = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 4); 4])
            .split(rows[0]);

        let lower = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
            .split(rows[1]);

        let dash = &state.dashboard;
        let drive_layout =
            DriveLayout::compute(&dash.snapshot.storage, dash.two_column_drives_at_four);
        let top_height = dash.top.len().max(1) as u16 + 2;
        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(top_height),
                Constraint::Min(drive_layout.height()),
            ])
            .split(lower[1]);

        DashboardAreas {
            cards: [cards[0], cards[1], cards[2], cards[3]],
            processes: lower[0],
            top: side[0],
            drives: side[1],
        }
    }

    fn performance(body: Rect) -> PerformanceAreas {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(body);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(6), Constraint::Length(8)])
            .split(columns[1]);

        PerformanceAreas {
            history: columns[0],
            cores: right[0],
            network: right[1],
        }
    }
}

/// Create a centered rect with given percentage width/height
pub fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Where each drive card goes, by index into the storage list.
///
/// With enough drives the panel splits into two columns; past four drives
/// the system drive also gets a full-width row of its own above them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveLayout {
    pub two_column: bool,
    pub system_row: Option<usize>,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

impl DriveLayout {
    const SYSTEM_ROW_AT: usize = 5;

    pub fn compute(drives: &[StorageInfo], two_column_at_four: bool) -> Self {
        let threshold = if two_column_at_four { 4 } else { 5 };
        let two_column = drives.len() >= threshold;
        if !two_column {
            return Self {
                left: (0..drives.len()).collect(),
                ..Default::default()
            };
        }

        let system = drives.iter().position(|d| d.is_system).unwrap_or(0);
        let system_row = (drives.len() >= Self::SYSTEM_ROW_AT).then_some(system);

        let mut layout = Self {
            two_column,
            system_row,
            ..Default::default()
        };
        let others = (0..drives.len()).filter(|&i| Some(i) != system_row);
        for (slot, index) in others.enumerate() {
            if slot % 2 == 0 {
                layout.left.push(index);
            } else {
                layout.right.push(index);
            }
        }
        layout
    }

    /// Rows of drive cards stacked vertically.
    pub fn rows(&self) -> usize {
        self.system_row.iter().count() + self.left.len().max(self.right.len())
    }

    /// Minimum panel height at two lines per card plus borders.
    pub fn height(&self) -> u16 {
        (self.rows().max(1) * 2 + 2) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::AppState;
    use crate::ui::theme::Theme;
    use pretty_assertions::assert_eq;

    fn drives(count: usize, system: Option<usize>) -> Vec<StorageInfo> {
        (0..count)
            .map(|i| StorageInfo {
                name: format!("d{}", i),
                is_system: Some(i) == system,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_few_drives_single_column() {
        let layout = DriveLayout::compute(&drives(3, Some(1)), true);
        assert_eq!(
            layout,
            DriveLayout {
                two_column: false,
                system_row: None,
                left: vec![0, 1, 2],
                right: vec![],
            }
        );
    }

    #[test]
    fn test_four_drives_depends_on_setting() {
        let on = DriveLayout::compute(&drives(4, Some(0)), true);
        assert!(on.two_column);
        assert_eq!(on.system_row, None);
        assert_eq!(on.left, vec![0, 2]);
        assert_eq!(on.right, vec![1, 3]);

        let off = DriveLayout::compute(&drives(4, Some(0)), false);
        assert!(!off.two_column);
    }

    #[test]
    fn test_system_row_separated_at_five() {
        let layout = DriveLayout::compute(&drives(5, Some(2)), false);
        assert!(layout.two_column);
        assert_eq!(layout.system_row, Some(2));
        assert_eq!(layout.left, vec![0, 3]);
        assert_eq!(layout.right, vec![1, 4]);
        assert_eq!(layout.rows(), 3);
    }

    #[test]
    fn test_system_falls_back_to_first() {
        let layout = DriveLayout::compute(&drives(6, None), true);
        assert_eq!(layout.system_row, Some(0));
        assert_eq!(layout.left, vec![1, 3, 5]);
        assert_eq!(layout.right, vec![2, 4]);
    }

    #[test]
    fn test_page_areas() {
        let mut state = AppState::new(Theme::default());
        let area = Rect::new(0, 0, 120, 40);
        let dash = LayoutManager::compute(area, &state);
        assert!(dash.dashboard.is_some());
        assert!(dash.performance.is_none());
        assert_eq!(dash.header.height, 1);

        state.page = Page::Performance;
        let perf = LayoutManager::compute(area, &state);
        assert!(perf.performance.is_some());
    }
}
