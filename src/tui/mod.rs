// src/tui/mod.rs
use crate::types::{EngineCommand, EngineEvent, LedgerRecord, PairSnapshot, Portfolio};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
    Terminal,
};
use std::{io, time::Duration};
use tokio::sync::mpsc;

const MAX_LOG_LINES: usize = 50;

pub struct App {
    pub portfolio: Portfolio,
    pub pairs: Vec<PairSnapshot>,
    pub history: Vec<LedgerRecord>,
    pub logs: Vec<String>,
    pub running: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            portfolio: Portfolio::default(),
            pairs: Vec::new(),
            history: Vec::new(),
            logs: Vec::new(),
            running: false,
        }
    }

    /// Portfolio and pair rows are latest-wins; logs accumulate.
    pub fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Portfolio(portfolio) => self.portfolio = portfolio,
            EngineEvent::PairsData(pairs) => self.pairs = pairs,
            EngineEvent::TradeHistory(history) => self.history = history,
            EngineEvent::Log(msg) => {
                self.logs.push(msg);
                if self.logs.len() > MAX_LOG_LINES {
                    self.logs.remove(0);
                }
            }
        }
    }
}

pub async fn run(
    mut rx: mpsc::Receiver<EngineEvent>,
    commands: mpsc::Sender<EngineCommand>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('s') => {
                        let _ = commands.send(EngineCommand::Start).await;
                        app.running = true;
                    }
                    KeyCode::Char('x') => {
                        let _ = commands.send(EngineCommand::Stop).await;
                        app.running = false;
                    }
                    KeyCode::Char('p') => {
                        let _ = commands.send(EngineCommand::Panic).await;
                        app.running = false;
                    }
                    _ => {}
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            app.on_event(event);
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(8),
                Constraint::Length(10),
            ]
            .as_ref(),
        )
        .split(f.size());

    let (mode_text, mode_color) = if app.running {
        ("RUNNING", Color::Green)
    } else {
        ("PAUSED", Color::Yellow)
    };
    let pnl_color = if app.portfolio.floating_pnl >= 0.0 {
        Color::Green
    } else {
        Color::Red
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled("The Dipper ", Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(mode_text, Style::default().fg(mode_color)),
        Span::raw(" | Capital: "),
        Span::styled(
            format!("${:.2}", app.portfolio.available_capital),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw(" | Open PnL: "),
        Span::styled(
            format!("${:+.2}", app.portfolio.floating_pnl),
            Style::default().fg(pnl_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  [s]tart [x] stop [p]anic [q]uit"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, chunks[0]);

    let rows: Vec<Row> = app
        .pairs
        .iter()
        .map(|p| {
            let position_info = match &p.position {
                Some(pos) => {
                    let profit = pos.profit_pct(p.price) * 100.0;
                    format!("in @ {:.4} ({profit:+.2}%)", pos.entry_price)
                }
                None => "-".to_string(),
            };
            Row::new(vec![
                Cell::from(p.symbol.clone()),
                Cell::from(format!("{:.4}", p.price)),
                Cell::from(format!("{:.1}", p.rsi)),
                Cell::from(p.status.to_string()),
                Cell::from(position_info),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(7),
            Constraint::Length(14),
            Constraint::Min(20),
        ],
    )
    .header(
        Row::new(vec!["Pair", "Price", "RSI", "Status", "Position"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Pairs"));
    f.render_widget(table, chunks[1]);

    let history: Vec<ListItem> = app
        .history
        .iter()
        .map(|t| {
            let color = if t.pnl >= 0.0 {
                Color::Green
            } else {
                Color::Red
            };
            ListItem::new(Line::from(Span::styled(
                format!("{}  ${:+.2}  {}", t.symbol, t.pnl, t.timestamp),
                Style::default().fg(color),
            )))
        })
        .collect();
    let history_list = List::new(history).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Trade History"),
    );
    f.render_widget(history_list, chunks[2]);

    let logs: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|s| ListItem::new(Line::from(Span::raw(s.clone()))))
        .collect();
    let logs_list =
        List::new(logs).block(Block::default().borders(Borders::ALL).title("Engine Log"));
    f.render_widget(logs_list, chunks[3]);
}
