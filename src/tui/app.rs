//! Interactive TUI application.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]

use crate::dns::{ProbeOutcome, ProbeStatus, ProbeSummary, ProviderCatalog};
use crate::error::Result;
use crate::session::{Action, SessionCommand, SessionEvent};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, BorderType, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum View {
    #[default]
    Providers,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Notification {
    text: String,
    is_error: bool,
}

/// Provider picker and probe display.
///
/// The app never touches the network or the resolver file itself: key
/// presses become [`SessionCommand`]s and the screen is redrawn from the
/// [`SessionEvent`]s that come back.
pub struct App {
    catalog: Arc<ProviderCatalog>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    current_view: View,
    selected_index: usize,
    table_state: TableState,
    /// Outcomes for the selected provider, in completion order
    results: Vec<ProbeOutcome>,
    /// Run whose events are shown; `None` until the selection is confirmed
    current_run: Option<u64>,
    expected: usize,
    probing: bool,
    summary: Option<ProbeSummary>,
    /// Provider whose nameservers are in effect
    active: Option<String>,
    pending: Option<Action>,
    notification: Option<Notification>,
}

impl App {
    #[must_use]
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            catalog,
            commands,
            events,
            current_view: View::default(),
            selected_index: 0,
            table_state: TableState::default().with_selected(Some(0)),
            results: Vec::new(),
            current_run: None,
            expected: 0,
            probing: false,
            summary: None,
            active: None,
            pending: None,
            notification: None,
        }
    }

    /// Mark a provider as already in effect, e.g. from an earlier run.
    #[must_use]
    pub fn with_active(mut self, provider: Option<String>) -> Self {
        self.active = provider;
        self
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut terminal = ratatui::init();

        self.select_current();
        let res = self.run_loop(&mut terminal).await;

        ratatui::restore();

        res
    }

    async fn run_loop(&mut self, terminal: &mut ratatui::DefaultTerminal) -> Result<()> {
        loop {
            // 1. Drain session events
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event);
            }

            // 2. Render UI
            terminal.draw(|f| self.draw(f))?;

            // 3. Handle keyboard events (non-blocking with 50ms timeout)
            if crossterm::event::poll(Duration::from_millis(50))? {
                if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                    if !self.handle_key(key) {
                        break;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn selected_name(&self) -> Option<&str> {
        self.catalog
            .by_index(self.selected_index)
            .map(|p| p.name.as_str())
    }

    fn send(&mut self, command: SessionCommand) -> bool {
        if self.commands.send(command).is_err() {
            self.notify("Session stopped unexpectedly", true);
            return false;
        }
        true
    }

    fn notify(&mut self, text: impl Into<String>, is_error: bool) {
        self.notification = Some(Notification {
            text: text.into(),
            is_error,
        });
    }

    fn select_current(&mut self) {
        let Some(name) = self.selected_name().map(str::to_string) else {
            return;
        };
        self.results.clear();
        self.summary = None;
        self.current_run = None;
        self.expected = 0;
        self.probing = true;
        self.send(SessionCommand::Select(name));
    }

    fn request(&mut self, action: Action, command: SessionCommand) {
        if self.send(command) {
            self.pending = Some(action);
            self.notify(format!("Requested: {action}..."), false);
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ProbeStarted {
                provider,
                run,
                addresses,
            } => {
                if self.selected_name() == Some(provider.as_str()) {
                    self.current_run = Some(run);
                    self.results.clear();
                    self.summary = None;
                    self.expected = addresses.len();
                    self.probing = true;
                }
            }
            SessionEvent::Outcome { run, outcome, .. } => {
                // Late results of a superseded selection
                if self.current_run == Some(run) {
                    self.results.push(outcome);
                }
            }
            SessionEvent::ProbeFinished { run, summary, .. } => {
                if self.current_run == Some(run) {
                    self.probing = false;
                    self.summary = Some(summary);
                }
            }
            SessionEvent::Applied { provider } => {
                self.pending = None;
                self.notify(format!("DNS changed to {provider}"), false);
                self.active = Some(provider);
            }
            SessionEvent::Released => {
                self.pending = None;
                self.active = None;
                self.notify("DNS handed back to systemd-resolved", false);
            }
            SessionEvent::Restored => {
                self.pending = None;
                self.active = None;
                self.notify("DNS configuration restored from backup", false);
            }
            SessionEvent::Failed { action, message } => {
                if action != Action::Select {
                    self.pending = None;
                }
                self.notify(format!("Failed to {action}: {message}"), true);
            }
            SessionEvent::Busy { action } => {
                self.notify(
                    format!("Cannot {action} while another change is in progress"),
                    true,
                );
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return false;
            }

            KeyCode::Char('?') | KeyCode::Tab => {
                self.current_view = match self.current_view {
                    View::Providers => View::Help,
                    View::Help => View::Providers,
                };
            }

            KeyCode::Esc | KeyCode::Char('q') if self.current_view == View::Help => {
                self.current_view = View::Providers;
            }

            KeyCode::Char('q') => return false,

            KeyCode::Up | KeyCode::Char('k') => {
                if self.selected_index > 0 {
                    self.selected_index -= 1;
                    self.table_state.select(Some(self.selected_index));
                    self.select_current();
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let max = self.catalog.len().saturating_sub(1);
                if self.selected_index < max {
                    self.selected_index += 1;
                    self.table_state.select(Some(self.selected_index));
                    self.select_current();
                }
            }

            KeyCode::Char('p') => self.select_current(),
            KeyCode::Enter => self.request(Action::Connect, SessionCommand::Connect),
            KeyCode::Char('o') => self.request(Action::TurnOff, SessionCommand::TurnOff),
            KeyCode::Char('r') => self.request(Action::Restore, SessionCommand::Restore),

            _ => {}
        }

        true
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(6),
                Constraint::Length(1),
            ])
            .split(f.area());

        self.draw_title_bar(f, chunks[0]);

        match self.current_view {
            View::Providers => self.draw_providers(f, chunks[1]),
            View::Help => Self::draw_help(f, chunks[1]),
        }

        self.draw_stats_bar(f, chunks[2]);
        self.draw_notification(f, chunks[3]);
    }

    fn draw_title_bar(&self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(20),
                Constraint::Min(10),
                Constraint::Length(30),
            ])
            .split(area);

        let title = Paragraph::new("DNS Changer").style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
        f.render_widget(title, chunks[0]);

        let version = Paragraph::new(concat!("dnschanger v", env!("CARGO_PKG_VERSION")))
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center);
        f.render_widget(version, chunks[1]);

        let (active_text, active_style) = match (&self.pending, &self.active) {
            (Some(action), _) => (
                format!("{action}..."),
                Style::default().fg(Color::Yellow),
            ),
            (None, Some(name)) => (format!("Active: {name}"), Style::default().fg(Color::Green)),
            (None, None) => ("Active: system".to_string(), Style::default().fg(Color::DarkGray)),
        };
        let active = Paragraph::new(active_text)
            .style(active_style)
            .alignment(Alignment::Right);
        f.render_widget(active, chunks[2]);
    }

    fn draw_providers(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);

        let rows: Vec<Row> = self
            .catalog
            .providers()
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let marker = if self.active.as_deref() == Some(p.name.as_str()) {
                    "●"
                } else {
                    " "
                };
                Row::new(vec![
                    Cell::from(format!("{}", idx + 1)),
                    Cell::from(marker).style(Style::default().fg(Color::Green)),
                    Cell::from(p.name.clone()),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [Constraint::Length(4), Constraint::Length(2), Constraint::Min(10)],
        )
        .block(
            Block::default()
                .title(" Providers ")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        )
        .row_highlight_style(Style::default().bg(Color::Blue));

        // Use stateful rendering for scroll support
        f.render_stateful_widget(table, chunks[0], &mut self.table_state);

        self.draw_results(f, chunks[1]);
    }

    fn draw_results(&self, f: &mut Frame, area: Rect) {
        let title = match self.catalog.by_index(self.selected_index) {
            Some(p) => format!(" {} ", p.name),
            None => " Results ".to_string(),
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded);

        if self.results.is_empty() {
            let msg = if self.probing {
                "Probing..."
            } else {
                "Press [p] to probe this provider"
            };
            let empty_msg = Paragraph::new(msg)
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center)
                .block(block);
            f.render_widget(empty_msg, area);
            return;
        }

        let rows: Vec<Row> = self
            .results
            .iter()
            .map(|r| {
                let latency_bar = r.average_latency_ms.map_or_else(String::new, |l| {
                    let bar_len = ((l / 200.0) * 20.0).min(20.0) as usize;
                    "█".repeat(bar_len)
                });

                let style = match r.status {
                    ProbeStatus::Reachable => Style::default().fg(Color::Green),
                    ProbeStatus::Lossy | ProbeStatus::TimedOut => {
                        Style::default().fg(Color::Yellow)
                    }
                    ProbeStatus::Unreachable | ProbeStatus::Failed => {
                        Style::default().fg(Color::Red)
                    }
                };

                Row::new(vec![
                    Cell::from(r.address.clone()),
                    Cell::from(latency_bar).style(style),
                    Cell::from(r.summary_line()).style(style),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(18),
                Constraint::Length(22),
                Constraint::Min(12),
            ],
        )
        .block(block);

        f.render_widget(table, area);
    }

    fn draw_help(f: &mut Frame, area: Rect) {
        f.render_widget(Clear, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2), // Title
                Constraint::Min(1),    // Content
                Constraint::Length(2), // Footer
            ])
            .split(area);

        let title = Paragraph::new("dnschanger - Help")
            .style(
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center);
        f.render_widget(title, chunks[0]);

        let help_items = [
            ("j/k or Up/Down", "Select provider and probe it"),
            ("p", "Probe the selected provider again"),
            ("Enter", "Use the selected provider"),
            ("o", "Turn off: hand DNS back to systemd-resolved"),
            ("r", "Restore the backed up configuration"),
            ("? or Tab", "Toggle this help"),
            ("q", "Quit application"),
        ];

        let rows: Vec<Row> = help_items
            .iter()
            .map(|(key, desc)| {
                Row::new(vec![
                    Cell::from(format!("  {key}  ")).style(Style::default().fg(Color::Yellow)),
                    Cell::from(*desc).style(Style::default().fg(Color::White)),
                ])
            })
            .collect();

        let help_table = Table::new(rows, [Constraint::Length(18), Constraint::Min(30)])
            .block(
                Block::default()
                    .title(" Keyboard Shortcuts ")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .column_spacing(2);

        f.render_widget(help_table, chunks[1]);

        let footer = Paragraph::new("Press [q] or [Esc] to return")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(footer, chunks[2]);
    }

    fn draw_stats_bar(&self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(3)])
            .split(area);

        let stats = self
            .summary
            .clone()
            .unwrap_or_else(|| ProbeSummary::from_outcomes(&self.results));

        let mut stats_parts = vec![
            format!("Total: {}", stats.total),
            format!("Reachable: {}", stats.reachable),
        ];
        if stats.unreachable > 0 {
            stats_parts.push(format!("Unreachable: {}", stats.unreachable));
        }
        if stats.timed_out > 0 {
            stats_parts.push(format!("Timeout: {}", stats.timed_out));
        }
        if stats.failed > 0 {
            stats_parts.push(format!("Failed: {}", stats.failed));
        }
        if let Some(avg) = stats.avg_latency {
            stats_parts.push(format!("Avg: {avg:.1}ms"));
        }
        if let (Some(min), Some(max)) = (stats.min_latency, stats.max_latency) {
            stats_parts.push(format!("Min/Max: {min:.1}/{max:.1}ms"));
        }

        let stats_widget = Paragraph::new(stats_parts.join("  |  "))
            .style(Style::default().fg(Color::White))
            .block(
                Block::default()
                    .title(" Statistics ")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            );
        f.render_widget(stats_widget, chunks[0]);

        let progress = self.progress();
        let gauge = Gauge::default()
            .block(
                Block::default()
                    .title(format!("{}/{} ({progress}%)", self.results.len(), self.expected))
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(progress);

        f.render_widget(gauge, chunks[1]);
    }

    fn draw_notification(&self, f: &mut Frame, area: Rect) {
        let (text, style) = match &self.notification {
            Some(n) if n.is_error => (n.text.as_str(), Style::default().fg(Color::Red)),
            Some(n) => (n.text.as_str(), Style::default().fg(Color::Green)),
            None => (
                "[Enter] connect  [o] turn off  [r] restore  [?] help  [q] quit",
                Style::default().fg(Color::DarkGray),
            ),
        };
        f.render_widget(Paragraph::new(text).style(style), area);
    }

    fn progress(&self) -> u16 {
        if self.expected == 0 {
            return 0;
        }
        ((self.results.len() as f64 / self.expected as f64) * 100.0).min(100.0) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Provider;

    fn app() -> (
        App,
        mpsc::UnboundedReceiver<SessionCommand>,
        mpsc::UnboundedSender<SessionEvent>,
    ) {
        let catalog = ProviderCatalog::new(vec![
            Provider::new("Cloudflare", ["1.1.1.1", "1.0.0.1"]),
            Provider::new("Google DNS", ["8.8.8.8", "8.8.4.4"]),
        ])
        .unwrap();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (App::new(Arc::new(catalog), cmd_tx, event_rx), cmd_rx, event_tx)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_navigation_selects_and_probes() {
        let (mut app, mut commands, _events) = app();

        assert!(app.handle_key(key(KeyCode::Down)));
        assert_eq!(
            commands.try_recv().unwrap(),
            SessionCommand::Select("Google DNS".into())
        );

        // Already at the bottom
        assert!(app.handle_key(key(KeyCode::Char('j'))));
        assert!(commands.try_recv().is_err());

        assert!(app.handle_key(key(KeyCode::Up)));
        assert_eq!(
            commands.try_recv().unwrap(),
            SessionCommand::Select("Cloudflare".into())
        );
        assert!(app.probing);
    }

    #[test]
    fn test_action_keys() {
        let (mut app, mut commands, _events) = app();

        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('o')));
        app.handle_key(key(KeyCode::Char('r')));

        assert_eq!(commands.try_recv().unwrap(), SessionCommand::Connect);
        assert_eq!(commands.try_recv().unwrap(), SessionCommand::TurnOff);
        assert_eq!(commands.try_recv().unwrap(), SessionCommand::Restore);
        assert_eq!(app.pending, Some(Action::Restore));
    }

    #[test]
    fn test_quit_and_help() {
        let (mut app, _commands, _events) = app();

        assert!(app.handle_key(key(KeyCode::Char('?'))));
        assert_eq!(app.current_view, View::Help);
        // q leaves help before it quits
        assert!(app.handle_key(key(KeyCode::Char('q'))));
        assert_eq!(app.current_view, View::Providers);
        assert!(!app.handle_key(key(KeyCode::Char('q'))));
        assert!(!app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
    }

    #[test]
    fn test_outcomes_for_selected_provider_only() {
        let (mut app, _commands, _events) = app();

        app.handle_event(SessionEvent::ProbeStarted {
            provider: "Cloudflare".into(),
            run: 2,
            addresses: vec!["1.1.1.1".into(), "1.0.0.1".into()],
        });
        app.handle_event(SessionEvent::Outcome {
            provider: "Cloudflare".into(),
            run: 2,
            outcome: ProbeOutcome::reachable("1.1.1.1", Some(12.0), ""),
        });
        app.handle_event(SessionEvent::Outcome {
            provider: "Google DNS".into(),
            run: 1,
            outcome: ProbeOutcome::timed_out("8.8.8.8", ""),
        });

        assert_eq!(app.results.len(), 1);
        assert_eq!(app.expected, 2);
        assert_eq!(app.progress(), 50);

        let summary = ProbeSummary::from_outcomes(&app.results);
        app.handle_event(SessionEvent::ProbeFinished {
            provider: "Cloudflare".into(),
            run: 2,
            summary,
        });
        assert!(!app.probing);
        assert_eq!(app.summary.as_ref().map(|s| s.reachable), Some(1));
    }

    #[test]
    fn test_stale_run_of_same_provider_is_ignored() {
        let (mut app, _commands, _events) = app();
        let addresses = vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()];

        app.handle_event(SessionEvent::ProbeStarted {
            provider: "Cloudflare".into(),
            run: 1,
            addresses: addresses.clone(),
        });
        // Away and back: Cloudflare is selected again before run 1 reports
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Up));

        let late = ProbeOutcome::timed_out("1.1.1.1", "");
        app.handle_event(SessionEvent::Outcome {
            provider: "Cloudflare".into(),
            run: 1,
            outcome: late.clone(),
        });
        assert!(app.results.is_empty());

        app.handle_event(SessionEvent::ProbeStarted {
            provider: "Cloudflare".into(),
            run: 3,
            addresses,
        });
        app.handle_event(SessionEvent::Outcome {
            provider: "Cloudflare".into(),
            run: 1,
            outcome: late.clone(),
        });
        app.handle_event(SessionEvent::ProbeFinished {
            provider: "Cloudflare".into(),
            run: 1,
            summary: ProbeSummary::from_outcomes(&[late]),
        });
        assert!(app.results.is_empty());
        assert!(app.probing);
        assert!(app.summary.is_none());

        app.handle_event(SessionEvent::Outcome {
            provider: "Cloudflare".into(),
            run: 3,
            outcome: ProbeOutcome::reachable("1.1.1.1", Some(12.0), ""),
        });
        assert_eq!(app.results.len(), 1);
        assert_eq!(app.results[0].average_latency_ms, Some(12.0));
    }

    #[test]
    fn test_config_events_update_status() {
        let (mut app, _commands, _events) = app();

        app.handle_key(key(KeyCode::Enter));
        app.handle_event(SessionEvent::Applied {
            provider: "Cloudflare".into(),
        });
        assert_eq!(app.active.as_deref(), Some("Cloudflare"));
        assert_eq!(app.pending, None);

        app.handle_event(SessionEvent::Failed {
            action: Action::TurnOff,
            message: "UnlinkFailed: privilege denied: sudo: a password is required".into(),
        });
        let note = app.notification.clone().unwrap();
        assert!(note.is_error);
        assert!(note.text.starts_with("Failed to turn off DNS"));
        assert_eq!(app.active.as_deref(), Some("Cloudflare"));

        app.handle_event(SessionEvent::Released);
        assert_eq!(app.active, None);
        assert!(!app.notification.clone().unwrap().is_error);

        app.handle_event(SessionEvent::Busy {
            action: Action::Restore,
        });
        assert!(app.notification.unwrap().is_error);
    }

    #[test]
    fn test_closed_session_is_reported() {
        let (mut app, commands, _events) = app();
        drop(commands);

        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.pending, None);
        assert!(app.notification.unwrap().is_error);
    }
}
