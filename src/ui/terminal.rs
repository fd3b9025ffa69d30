//! Terminal UI implementation using ratatui
//!
//! Renders a finished [`RunSummary`] and lets the user page through the
//! iteration reports.

use crate::simulation::stats::SimulationReport;
use crate::simulation::RunSummary;
use crate::ui::{Dashboard, LogEntry, UIConfig, UIEvent, UIState, HELP_TEXT};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Sparkline, Wrap},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Main terminal UI coordinator
pub struct TerminalUI {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    config: UIConfig,
    /// Last redraw
    last_update: Instant,
    /// Whether raw mode and the alternate screen are active
    active: bool,
}

impl TerminalUI {
    pub fn new() -> Result<Self> {
        let stdout = io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            config: UIConfig::default(),
            last_update: Instant::now(),
            active: false,
        })
    }

    /// Browse the reports of a finished run until the user quits
    pub async fn run(&mut self, summary: RunSummary) -> Result<()> {
        enable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            EnterAlternateScreen,
            EnableMouseCapture
        )?;
        self.active = true;

        let mut dashboard = Dashboard::new(summary, self.config.max_log_entries);
        dashboard.log(LogEntry::info(
            "Press 'H' for help, arrows to switch iteration, 'Q' to quit".to_string(),
        ));

        let mut event_receiver = self.setup_event_handling();
        self.draw(&dashboard)?;

        loop {
            while let Ok(event) = event_receiver.try_recv() {
                dashboard.apply(event);
            }
            if dashboard.state == UIState::Shutdown {
                break;
            }

            if self.last_update.elapsed() >= Duration::from_millis(self.config.update_interval_ms) {
                self.draw(&dashboard)?;
                self.last_update = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.cleanup()?;
        Ok(())
    }

    fn setup_event_handling(&self) -> mpsc::UnboundedReceiver<UIEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                if let Ok(true) = event::poll(Duration::from_millis(50)) {
                    if let Ok(Event::Key(key)) = event::read() {
                        if tx.send(UIEvent::from(key)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }

    fn draw(&mut self, dashboard: &Dashboard) -> Result<()> {
        let config = self.config.clone();
        self.terminal.draw(|f| {
            Self::render_main_static(f, dashboard, &config);
            if dashboard.state == UIState::Help {
                Self::render_help_static(f, &config);
            }
        })?;
        Ok(())
    }

    fn render_main_static(f: &mut Frame, dashboard: &Dashboard, config: &UIConfig) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Min(12),   // Main content
                Constraint::Length(7), // Series
                Constraint::Length(6), // Logs
                Constraint::Length(1), // Status bar
            ])
            .split(f.size());

        Self::render_title_static(f, chunks[0], dashboard, config);

        let main_chunks = crate::ui::utils::horizontal_split(chunks[1], &[1, 2]);
        Self::render_iterations_static(f, main_chunks[0], dashboard, config);
        match dashboard.selected_report() {
            Some(report) => Self::render_report_static(f, main_chunks[1], report, config),
            None => {
                let empty = Paragraph::new("No iterations were run")
                    .block(Block::default().title("Report").borders(Borders::ALL))
                    .alignment(Alignment::Center);
                f.render_widget(empty, main_chunks[1]);
            }
        }

        Self::render_series_static(f, chunks[2], dashboard, config);
        Self::render_logs_static(f, chunks[3], dashboard, config);
        Self::render_status_bar_static(f, chunks[4], dashboard, config);
    }

    fn render_title_static(f: &mut Frame, area: Rect, dashboard: &Dashboard, config: &UIConfig) {
        let title = match dashboard.selected_report() {
            Some(r) => format!("Durability Simulator - {} - tier {}", r.scheme, r.tier),
            None => "Durability Simulator".to_string(),
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .style(Style::default().fg(config.colors.highlight));

        let paragraph = Paragraph::new(title)
            .block(block)
            .alignment(Alignment::Center)
            .style(Style::default().add_modifier(Modifier::BOLD));

        f.render_widget(paragraph, area);
    }

    /// Iteration list with per-iteration outcome colors
    fn render_iterations_static(
        f: &mut Frame,
        area: Rect,
        dashboard: &Dashboard,
        config: &UIConfig,
    ) {
        let items: Vec<ListItem> = dashboard
            .summary
            .reports
            .iter()
            .map(|r| {
                let color = if r.undurable_count > 0 {
                    config.colors.failed
                } else if r.unavailable_count > 0 {
                    config.colors.degraded
                } else {
                    config.colors.healthy
                };
                ListItem::new(format!(
                    "t{} #{:<3} lost {:>4} unavail {:>4}",
                    r.tier, r.iteration, r.undurable_count, r.unavailable_count
                ))
                .style(Style::default().fg(color))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().title("Iterations").borders(Borders::ALL))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");

        let mut state = ListState::default();
        if !dashboard.summary.reports.is_empty() {
            state.select(Some(dashboard.selected));
        }
        f.render_stateful_widget(list, area, &mut state);
    }

    fn render_report_static(f: &mut Frame, area: Rect, report: &SimulationReport, config: &UIConfig) {
        let block = Block::default().title("Report").borders(Borders::ALL);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Durability gauge
                Constraint::Length(3), // Availability gauge
                Constraint::Min(4),    // Counters
            ])
            .split(inner);

        let stripes = report.stripes.max(1) as f64;
        let durable = (1.0 - report.undurable_count as f64 / stripes).clamp(0.0, 1.0);
        let available = (1.0 - report.unavailable_count as f64 / stripes).clamp(0.0, 1.0);
        for (ratio, title, slot) in [
            (durable, "Durable stripes", chunks[0]),
            (available, "Never unavailable stripes", chunks[1]),
        ] {
            let color = if ratio >= 1.0 {
                config.colors.healthy
            } else if ratio > 0.99 {
                config.colors.degraded
            } else {
                config.colors.failed
            };
            let gauge = Gauge::default()
                .block(Block::default().title(title).borders(Borders::ALL))
                .gauge_style(Style::default().fg(color))
                .ratio(ratio);
            f.render_widget(gauge, slot);
        }

        let totals = &report.totals;
        let stats_text = format!(
            "Stripes: {}\nLost: {}   Unavailable: {} ({:.1} h)\n\
             Disk failures: {}   repairs: {}\n\
             Machine failures: {} (permanent {}, short {}, long {})\n\
             Latent defects: {}   scrub repairs: {}\n\
             Eager repairs: {} machines, {} slices\n\
             Peak bandwidth: {:.2} GB/day   overruns: {}",
            report.stripes,
            report.undurable_count,
            report.unavailable_count,
            report.unavailable_hours,
            totals.disk_failures,
            totals.disk_repairs,
            totals.machine_failures,
            totals.permanent_machine_failures,
            totals.short_transient_failures,
            totals.long_transient_failures,
            totals.latent_failures,
            totals.scrub_repairs,
            totals.eager_machine_repairs,
            totals.eager_slice_repairs,
            report.max_recovery_bandwidth,
            report.bandwidth_overruns,
        );

        let paragraph = Paragraph::new(stats_text)
            .style(Style::default().fg(config.colors.text))
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, chunks[2]);
    }

    fn render_series_static(f: &mut Frame, area: Rect, dashboard: &Dashboard, config: &UIConfig) {
        let title = match dashboard.selected_report() {
            Some(r) => {
                let summary = dashboard.series.of(r);
                format!(
                    "{} - mean {:.3} stdev {:.3} max {:.3}",
                    dashboard.series.title(),
                    summary.mean,
                    summary.stdev,
                    summary.max
                )
            }
            None => dashboard.series.title().to_string(),
        };
        let data = dashboard.sparkline_data();
        let sparkline = Sparkline::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .data(&data)
            .style(Style::default().fg(config.colors.highlight));
        f.render_widget(sparkline, area);
    }

    fn render_logs_static(f: &mut Frame, area: Rect, dashboard: &Dashboard, config: &UIConfig) {
        let block = Block::default().title("Outcomes").borders(Borders::ALL);

        let items: Vec<ListItem> = dashboard
            .logs
            .iter()
            .rev()
            .take(area.height.saturating_sub(2) as usize)
            .map(|entry| {
                let color = entry.level.color(&config.colors);
                ListItem::new(entry.format()).style(Style::default().fg(color))
            })
            .collect();

        let list = List::new(items).block(block);
        f.render_widget(list, area);
    }

    fn render_status_bar_static(
        f: &mut Frame,
        area: Rect,
        dashboard: &Dashboard,
        config: &UIConfig,
    ) {
        let averages: Vec<String> = dashboard
            .summary
            .aggregates
            .iter()
            .map(|a| format!("tier {}: {:.2} lost avg", a.tier, a.average_undurable))
            .collect();
        let status_text = format!(
            "Iteration {}/{} | {} | Press 'H' for help",
            (dashboard.selected + 1).min(dashboard.summary.reports.len()),
            dashboard.summary.reports.len(),
            averages.join(", ")
        );

        let paragraph = Paragraph::new(status_text)
            .style(Style::default().fg(config.colors.text))
            .alignment(Alignment::Center);

        f.render_widget(paragraph, area);
    }

    fn render_help_static(f: &mut Frame, config: &UIConfig) {
        let popup_area = crate::ui::utils::centered_rect(60, 18, f.size());
        f.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Help")
            .borders(Borders::ALL)
            .style(Style::default().fg(config.colors.highlight));

        let paragraph = Paragraph::new(HELP_TEXT)
            .block(block)
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(config.colors.text));

        f.render_widget(paragraph, popup_area);
    }

    /// Restore the terminal
    fn cleanup(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for TerminalUI {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
