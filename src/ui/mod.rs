//! Terminal user interface module
//!
//! A results browser for a finished campaign: per-iteration reports,
//! durability gauges and the daily degraded-stripe and bandwidth series.

pub mod terminal;

pub use terminal::TerminalUI;

use crate::simulation::stats::{SeriesSummary, SimulationReport};
use crate::simulation::RunSummary;
use crossterm::event::{KeyCode, KeyEvent};

/// Events that can be triggered by user input
#[derive(Debug, Clone, PartialEq)]
pub enum UIEvent {
    /// User wants to quit the application
    Quit,
    /// Select the next iteration report
    NextIteration,
    /// Select the previous iteration report
    PreviousIteration,
    /// Cycle the plotted series
    NextSeries,
    /// Show or hide the help popup
    ToggleHelp,
    /// Unrecognized key
    Unknown(KeyCode),
}

impl From<KeyEvent> for UIEvent {
    fn from(key: KeyEvent) -> Self {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => UIEvent::Quit,
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Char('n') => UIEvent::NextIteration,
            KeyCode::Up | KeyCode::Char('k') | KeyCode::Char('p') => UIEvent::PreviousIteration,
            KeyCode::Tab | KeyCode::Char('s') | KeyCode::Char('S') => UIEvent::NextSeries,
            KeyCode::Char('h') | KeyCode::Char('H') | KeyCode::F(1) => UIEvent::ToggleHelp,
            other => UIEvent::Unknown(other),
        }
    }
}

/// Color scheme for the UI
#[derive(Debug, Clone, Copy)]
pub struct ColorScheme {
    pub healthy: ratatui::style::Color,
    pub degraded: ratatui::style::Color,
    pub failed: ratatui::style::Color,
    pub text: ratatui::style::Color,
    pub highlight: ratatui::style::Color,
    pub success: ratatui::style::Color,
    pub warning: ratatui::style::Color,
    pub error: ratatui::style::Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            healthy: ratatui::style::Color::Green,
            degraded: ratatui::style::Color::Yellow,
            failed: ratatui::style::Color::Red,
            text: ratatui::style::Color::White,
            highlight: ratatui::style::Color::Cyan,
            success: ratatui::style::Color::Green,
            warning: ratatui::style::Color::Yellow,
            error: ratatui::style::Color::Red,
        }
    }
}

/// Configuration for UI rendering
#[derive(Debug, Clone)]
pub struct UIConfig {
    pub colors: ColorScheme,
    /// Redraw period in milliseconds
    pub update_interval_ms: u64,
    /// Maximum number of log entries to keep
    pub max_log_entries: usize,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            colors: ColorScheme::default(),
            update_interval_ms: 100,
            max_log_entries: 100,
        }
    }
}

/// Mode of the dashboard
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UIState {
    Browsing,
    Help,
    Shutdown,
}

/// Daily series that can be plotted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Series {
    DurableDegraded,
    AvailableDegraded,
    Bandwidth,
}

impl Series {
    pub fn next(self) -> Self {
        match self {
            Series::DurableDegraded => Series::AvailableDegraded,
            Series::AvailableDegraded => Series::Bandwidth,
            Series::Bandwidth => Series::DurableDegraded,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Series::DurableDegraded => "Durability-degraded stripes (daily mean)",
            Series::AvailableDegraded => "Availability-degraded stripes (daily mean)",
            Series::Bandwidth => "Recovery bandwidth GB/day (daily mean)",
        }
    }

    /// The summary this series reads from a report
    pub fn of(self, report: &SimulationReport) -> &SeriesSummary {
        match self {
            Series::DurableDegraded => &report.durable_degraded,
            Series::AvailableDegraded => &report.available_degraded,
            Series::Bandwidth => &report.bandwidth,
        }
    }
}

/// Log entry for displaying messages to the user
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: std::time::Instant,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: std::time::Instant::now(),
            level,
            message,
        }
    }

    pub fn info(message: String) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: String) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: String) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn success(message: String) -> Self {
        Self::new(LogLevel::Success, message)
    }

    /// Format the log entry for display
    pub fn format(&self) -> String {
        let prefix = match self.level {
            LogLevel::Info => "[INFO]",
            LogLevel::Warning => "[WARN]",
            LogLevel::Error => "[ERROR]",
            LogLevel::Success => "[OK]",
        };
        format!("{} {}", prefix, self.message)
    }
}

/// Log levels for UI messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn color(&self, colors: &ColorScheme) -> ratatui::style::Color {
        match self {
            LogLevel::Info => colors.text,
            LogLevel::Warning => colors.warning,
            LogLevel::Error => colors.error,
            LogLevel::Success => colors.success,
        }
    }
}

/// Everything the dashboard shows, independent of the terminal
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub summary: RunSummary,
    pub state: UIState,
    pub selected: usize,
    pub series: Series,
    pub logs: Vec<LogEntry>,
    max_log_entries: usize,
}

impl Dashboard {
    pub fn new(summary: RunSummary, max_log_entries: usize) -> Self {
        let mut dashboard = Self {
            summary,
            state: UIState::Browsing,
            selected: 0,
            series: Series::DurableDegraded,
            logs: Vec::new(),
            max_log_entries,
        };
        let entries: Vec<LogEntry> = dashboard
            .summary
            .reports
            .iter()
            .map(|r| {
                let message = format!(
                    "tier {} iteration {}: {} lost, {} unavailable",
                    r.tier, r.iteration, r.undurable_count, r.unavailable_count
                );
                if r.undurable_count > 0 {
                    LogEntry::error(message)
                } else if r.unavailable_count > 0 {
                    LogEntry::warn(message)
                } else {
                    LogEntry::success(message)
                }
            })
            .collect();
        for entry in entries {
            dashboard.log(entry);
        }
        dashboard
    }

    /// Apply one input event
    pub fn apply(&mut self, event: UIEvent) {
        let count = self.summary.reports.len();
        match event {
            UIEvent::Quit => self.state = UIState::Shutdown,
            UIEvent::ToggleHelp => {
                self.state = match self.state {
                    UIState::Help => UIState::Browsing,
                    _ => UIState::Help,
                };
            }
            UIEvent::NextIteration if count > 0 => {
                self.selected = (self.selected + 1) % count;
            }
            UIEvent::PreviousIteration if count > 0 => {
                self.selected = (self.selected + count - 1) % count;
            }
            UIEvent::NextSeries => self.series = self.series.next(),
            _ => {}
        }
    }

    pub fn selected_report(&self) -> Option<&SimulationReport> {
        self.summary.reports.get(self.selected)
    }

    /// Daily values of the current series scaled for a sparkline
    pub fn sparkline_data(&self) -> Vec<u64> {
        self.selected_report()
            .map(|r| {
                self.series
                    .of(r)
                    .daily
                    .iter()
                    .map(|v| (v.max(0.0) * 100.0).round() as u64)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
        if self.logs.len() > self.max_log_entries {
            self.logs.remove(0);
        }
    }
}

/// Help text for the application
pub const HELP_TEXT: &str = r#"
Durability Simulator - Controls

  Q, Esc        - Quit
  H, F1         - Show/hide this help
  Down, J, N    - Next iteration
  Up, K, P      - Previous iteration
  Tab, S        - Cycle plotted series

The gauges show the share of stripes that stayed
durable and available in the selected iteration.
The sparkline plots the selected daily series.

Press H to return.
"#;

/// Utility functions for UI rendering
pub mod utils {
    use ratatui::layout::{Constraint, Direction, Layout, Rect};

    /// Split a rectangle horizontally with given ratios
    pub fn horizontal_split(area: Rect, ratios: &[u16]) -> Vec<Rect> {
        let total: u32 = ratios.iter().map(|&x| x as u32).sum();
        let constraints: Vec<Constraint> = ratios
            .iter()
            .map(|&ratio| Constraint::Ratio(ratio as u32, total))
            .collect();

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area)
            .to_vec()
    }

    /// Create a centered rectangle with given width and height
    pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length((area.height.saturating_sub(height)) / 2),
                Constraint::Length(height),
                Constraint::Length((area.height.saturating_sub(height)) / 2),
            ])
            .split(area);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length((area.width.saturating_sub(width)) / 2),
                Constraint::Length(width),
                Constraint::Length((area.width.saturating_sub(width)) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn summary(reports: usize) -> RunSummary {
        RunSummary {
            reports: (0..reports)
                .map(|i| SimulationReport {
                    iteration: i,
                    stripes: 10,
                    undurable_count: i,
                    ..SimulationReport::default()
                })
                .collect(),
            aggregates: Vec::new(),
        }
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(UIEvent::from(key(KeyCode::Char('q'))), UIEvent::Quit);
        assert_eq!(UIEvent::from(key(KeyCode::Esc)), UIEvent::Quit);
        assert_eq!(UIEvent::from(key(KeyCode::Down)), UIEvent::NextIteration);
        assert_eq!(UIEvent::from(key(KeyCode::Char('k'))), UIEvent::PreviousIteration);
        assert_eq!(UIEvent::from(key(KeyCode::Tab)), UIEvent::NextSeries);
        assert_eq!(UIEvent::from(key(KeyCode::F(1))), UIEvent::ToggleHelp);
        assert_eq!(
            UIEvent::from(key(KeyCode::Char('z'))),
            UIEvent::Unknown(KeyCode::Char('z'))
        );
    }

    #[test]
    fn test_iteration_selection_wraps() {
        let mut dashboard = Dashboard::new(summary(3), 10);
        dashboard.apply(UIEvent::PreviousIteration);
        assert_eq!(dashboard.selected, 2);
        dashboard.apply(UIEvent::NextIteration);
        assert_eq!(dashboard.selected, 0);
        assert_eq!(dashboard.selected_report().map(|r| r.iteration), Some(0));
    }

    #[test]
    fn test_empty_summary_navigation() {
        let mut dashboard = Dashboard::new(RunSummary::default(), 10);
        dashboard.apply(UIEvent::NextIteration);
        assert_eq!(dashboard.selected, 0);
        assert!(dashboard.selected_report().is_none());
        assert!(dashboard.sparkline_data().is_empty());
    }

    #[test]
    fn test_help_and_quit() {
        let mut dashboard = Dashboard::new(summary(1), 10);
        dashboard.apply(UIEvent::ToggleHelp);
        assert_eq!(dashboard.state, UIState::Help);
        dashboard.apply(UIEvent::ToggleHelp);
        assert_eq!(dashboard.state, UIState::Browsing);
        dashboard.apply(UIEvent::Quit);
        assert_eq!(dashboard.state, UIState::Shutdown);
    }

    #[test]
    fn test_series_cycle() {
        let mut dashboard = Dashboard::new(summary(1), 10);
        for _ in 0..3 {
            dashboard.apply(UIEvent::NextSeries);
        }
        assert_eq!(dashboard.series, Series::DurableDegraded);
    }

    #[test]
    fn test_logs_are_capped_and_colored() {
        let dashboard = Dashboard::new(summary(5), 3);
        assert_eq!(dashboard.logs.len(), 3);
        assert_eq!(dashboard.logs[2].level, LogLevel::Error);
        let clean = Dashboard::new(summary(1), 3);
        assert_eq!(clean.logs[0].level, LogLevel::Success);
    }
}
