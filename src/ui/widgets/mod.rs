//! UI Widgets

pub mod drives_panel;
pub mod footer;
pub mod header;
pub mod help_overlay;
pub mod metrics_panel;
pub mod performance_panel;
pub mod process_panel;

pub use drives_panel::DrivesPanel;
pub use footer::Footer;
pub use header::Header;
pub use help_overlay::HelpOverlay;
pub use metrics_panel::{Card, MetricsPanel};
pub use performance_panel::{CoresPanel, HistoryPanel, NetworkPanel};
pub use process_panel::{ProcessPanel, TopProcesses};
