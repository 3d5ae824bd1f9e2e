//! Terminal call screen for Pitchroom CLI

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pitchroom_core::{
    CallSession, ConnectionStatus, LocalTrack, MeetingStore, SessionPhase, SessionSnapshot,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

/// Everything the call screen shows, taken from one session snapshot
#[derive(Debug, Clone)]
pub struct CallView {
    pub meeting_id: String,
    pub status_line: String,
    pub status: ConnectionStatus,
    pub ended: bool,
    pub role: Option<String>,
    pub diagnostic: Option<String>,
    pub local_tracks: Vec<String>,
    pub remote_tracks: Vec<String>,
    pub candidates_sent: u64,
    pub candidates_applied: u64,
    pub candidates_queued: u64,
    pub candidates_discarded: u64,
}

impl CallView {
    pub fn new(
        requested_id: &str,
        status_line: String,
        snapshot: &SessionSnapshot,
        local: &[LocalTrack],
    ) -> Self {
        Self {
            meeting_id: snapshot
                .meeting_id
                .as_ref()
                .map_or_else(|| requested_id.to_string(), ToString::to_string),
            status_line,
            status: snapshot.status,
            ended: snapshot.phase == SessionPhase::Terminated,
            role: snapshot.role.map(|r| r.to_string()),
            diagnostic: snapshot.diagnostic.clone(),
            local_tracks: local
                .iter()
                .map(|t| {
                    let state = if t.is_live() { "live" } else { "stopped" };
                    format!("{} {} ({state})", t.kind(), t.label())
                })
                .collect(),
            remote_tracks: snapshot
                .remote_tracks
                .iter()
                .map(|t| format!("{} {}", t.kind, t.track_id))
                .collect(),
            candidates_sent: snapshot.candidates_sent,
            candidates_applied: snapshot.candidates_applied,
            candidates_queued: snapshot.candidates_queued,
            candidates_discarded: snapshot.candidates_discarded,
        }
    }

    pub fn from_session<S: MeetingStore>(session: &CallSession<S>) -> Self {
        Self::new(
            session.requested_meeting_id(),
            session.status_line(),
            &session.snapshot(),
            &session.local_tracks(),
        )
    }
}

/// Status line colour
pub fn status_color(view: &CallView) -> Color {
    if view.ended {
        return Color::DarkGray;
    }
    match view.status {
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Connected => Color::Green,
        ConnectionStatus::Disconnected => Color::Magenta,
        ConnectionStatus::Failed => Color::Red,
    }
}

/// Draw the whole call screen
pub fn draw_call_screen(f: &mut Frame, view: &CallView, start_time: Instant) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(6),    // Media
            Constraint::Length(4), // Counters
            Constraint::Length(3), // Controls
        ])
        .split(f.size());

    draw_header(f, chunks[0], view);
    draw_media(f, chunks[1], view);
    draw_counters(f, chunks[2], view, start_time);
    draw_controls(f, chunks[3]);
}

fn draw_header(f: &mut Frame, area: Rect, view: &CallView) {
    let block = Block::default()
        .title(format!("📞 Meeting {}", view.meeting_id))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let mut spans = vec![Span::styled(
        view.status_line.clone(),
        Style::default()
            .fg(status_color(view))
            .add_modifier(Modifier::BOLD),
    )];
    if let Some(role) = &view.role {
        spans.push(Span::raw(format!(" | {role}")));
    }
    if let Some(diagnostic) = &view.diagnostic {
        spans.push(Span::styled(
            format!(" | {diagnostic}"),
            Style::default().fg(Color::Red),
        ));
    }

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    f.render_widget(paragraph, area);
}

fn draw_media(f: &mut Frame, area: Rect, view: &CallView) {
    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    f.render_widget(track_panel("🎥 You", &view.local_tracks, "No local media"), panels[0]);
    f.render_widget(
        track_panel("🎥 Remote", &view.remote_tracks, "Waiting for remote media"),
        panels[1],
    );
}

fn track_panel<'a>(title: &'a str, tracks: &'a [String], empty: &'a str) -> Paragraph<'a> {
    let lines = if tracks.is_empty() {
        vec![Line::from(Span::styled(empty, Style::default().fg(Color::Yellow)))]
    } else {
        tracks.iter().map(|t| Line::from(t.as_str())).collect()
    };
    Paragraph::new(lines)
        .block(Block::default().title(title).borders(Borders::ALL))
        .alignment(Alignment::Center)
}

fn draw_counters(f: &mut Frame, area: Rect, view: &CallView, start_time: Instant) {
    let block = Block::default().title("📊 Signaling").borders(Borders::ALL);
    let text = vec![
        Line::from(format!(
            "Candidates: sent {} | applied {} | queued {} | discarded {}",
            view.candidates_sent,
            view.candidates_applied,
            view.candidates_queued,
            view.candidates_discarded
        )),
        Line::from(format!(
            "Duration: {:.1}s",
            start_time.elapsed().as_secs_f32()
        )),
    ];
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_controls(f: &mut Frame, area: Rect) {
    let block = Block::default().title("🎮 Controls").borders(Borders::ALL);
    let controls = Line::from(vec![
        Span::styled(
            "(e)",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" End call | "),
        Span::styled("(q/Esc)", Style::default().fg(Color::Blue)),
        Span::raw(" Quit"),
    ]);
    f.render_widget(Paragraph::new(controls).block(block), area);
}

/// Whether a key ends the call
pub fn is_end_key(code: KeyCode) -> bool {
    matches!(
        code,
        KeyCode::Char('e') | KeyCode::Char('q') | KeyCode::Esc
    )
}

/// Terminal UI state
pub struct TerminalUI<B: Backend = CrosstermBackend<Stdout>> {
    terminal: Terminal<B>,
    start_time: Instant,
    restore: bool,
}

impl TerminalUI {
    /// Take over the terminal
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        Ok(Self {
            terminal,
            start_time: Instant::now(),
            restore: true,
        })
    }

    /// Show the session until the user ends the call
    pub async fn run<S: MeetingStore>(&mut self, session: &CallSession<S>) -> Result<()> {
        loop {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if is_end_key(key.code) {
                        break;
                    }
                }
            }

            self.render(&CallView::from_session(session))?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }
}

impl<B: Backend> TerminalUI<B> {
    /// Draw on a caller supplied backend without touching the real terminal
    pub fn with_backend(backend: B) -> Result<Self> {
        Ok(Self {
            terminal: Terminal::new(backend)?,
            start_time: Instant::now(),
            restore: false,
        })
    }

    /// Draw one frame
    pub fn render(&mut self, view: &CallView) -> Result<()> {
        let start_time = self.start_time;
        self.terminal
            .draw(|f| draw_call_screen(f, view, start_time))?;
        Ok(())
    }

    /// Backend, for inspection
    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }
}

impl<B: Backend> Drop for TerminalUI<B> {
    fn drop(&mut self) {
        if !self.restore {
            return;
        }
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
