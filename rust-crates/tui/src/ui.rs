use color_eyre::eyre::Result;
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use rps_client::{
    Move,
    MovePair,
    controller::ClientSnapshot,
    error::Severity,
    model::RecentGameRecord,
};
use std::io::stdout;

pub enum UserEvent {
    Quit,
    Redraw,
    EnterGame,
    LeaveGame,
    Connect,
    Refresh,
    NextAccount,
    Disconnect,
    CycleNetwork,
    SetBet(String),
    BetChar(char),
    BetBackspace,
    CycleFirst,
    CycleSecond,
    StartGame,
    FinishGame(u8),
    Withdraw,
    ToggleRecent,
}

#[derive(Default)]
pub struct UiState {
    mode: Mode,
    on_home: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default)]
enum Mode {
    #[default]
    Normal,
    BetModal(BetState),
    QuitModal,
}

/// Input edits go straight to the controller. `previous` is restored on Esc.
#[derive(Clone, Debug, Default)]
struct BetState {
    previous: String,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &ClientSnapshot) -> Result<()> {
    state.on_home = !snap.started;
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn input_event_stream() -> EventStream {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut EventStream) -> Result<Event> {
    match events.next().await {
        Some(event) => Ok(event?),
        None => Err(color_eyre::eyre::eyre!("terminal input closed")),
    }
}

/// Maps a terminal event to a user intent. Modal editing happens here.
pub fn interpret_event(
    state: &mut UiState,
    event: Event,
    snap: &ClientSnapshot,
) -> Option<UserEvent> {
    let Event::Key(k) = event else {
        return matches!(event, Event::Resize(..)).then_some(UserEvent::Redraw);
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    match &mut state.mode {
        Mode::BetModal(bs) => {
            return match k.code {
                KeyCode::Esc => {
                    let previous = std::mem::take(&mut bs.previous);
                    state.mode = Mode::Normal;
                    Some(UserEvent::SetBet(previous))
                }
                KeyCode::Enter => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Backspace => Some(UserEvent::BetBackspace),
                KeyCode::Char(c) => Some(UserEvent::BetChar(c)),
                _ => None,
            };
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }

    if state.on_home {
        return match k.code {
            KeyCode::Enter => Some(UserEvent::EnterGame),
            KeyCode::Char('q') | KeyCode::Esc => {
                state.mode = Mode::QuitModal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        };
    }

    Some(match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            UserEvent::Redraw
        }
        KeyCode::Char('b') => {
            state.mode = Mode::BetModal(BetState {
                previous: snap.bet_input.clone(),
            });
            UserEvent::Redraw
        }
        KeyCode::Char('f') => UserEvent::CycleFirst,
        KeyCode::Char('s') => UserEvent::CycleSecond,
        KeyCode::Char('g') => UserEvent::StartGame,
        KeyCode::Char('1') => UserEvent::FinishGame(0),
        KeyCode::Char('2') => UserEvent::FinishGame(1),
        KeyCode::Char('w') => UserEvent::Withdraw,
        KeyCode::Char('r') => UserEvent::Refresh,
        KeyCode::Char('h') => UserEvent::ToggleRecent,
        KeyCode::Char('c') => UserEvent::Connect,
        KeyCode::Char('n') => UserEvent::NextAccount,
        KeyCode::Char('d') => UserEvent::Disconnect,
        KeyCode::Char('m') => UserEvent::CycleNetwork,
        KeyCode::Char('x') => UserEvent::LeaveGame,
        _ => return None,
    })
}

fn ui(f: &mut Frame, state: &UiState, snap: &ClientSnapshot) {
    f.render_widget(Clear, f.area());
    if !snap.started {
        draw_home(f, snap);
        draw_modals(f, state, snap);
        return;
    }

    let recent_height = if snap.show_recent { 7 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),             // wallet
            Constraint::Length(3),             // game settings
            Constraint::Length(8),             // play + active game
            Constraint::Length(recent_height), // recent games
            Constraint::Min(3),                // status
            Constraint::Length(3),             // help
        ])
        .split(f.area());

    draw_wallet_panel(f, chunks[0], snap);
    draw_settings_panel(f, chunks[1], snap);
    draw_game_row(f, chunks[2], snap);
    if snap.show_recent {
        draw_recent_games(f, chunks[3], &snap.history);
    }
    draw_status(f, chunks[4], snap);
    draw_help(f, chunks[5]);
    draw_modals(f, state, snap);
}

fn draw_home(f: &mut Frame, snap: &ClientSnapshot) {
    let area = centered_rect(60, 40, f.area());
    let lines = vec![
        Line::from("RPS Minus One").style(Style::default().bold()),
        Line::from(""),
        Line::from("Commit two different moves with your bet. The contract deals two"),
        Line::from("of its own. Drop one of yours to finish and settle the round."),
        Line::from(""),
        Line::from(format!("Network: {}", snap.network)),
        Line::from(""),
        Line::from("Enter play | q quit"),
    ];
    let widget = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Welcome"));
    f.render_widget(widget, area);
}

fn draw_wallet_panel(f: &mut Frame, area: Rect, snap: &ClientSnapshot) {
    let text = match snap.session {
        None if !snap.provider_available => {
            "No wallet available. Restart with --wallet <name>.".to_string()
        }
        None => "Not connected. Press c to connect.".to_string(),
        Some(session) => {
            let (balance, rewards) = snap
                .wallet
                .map(|w| (format!("{} ETH", w.balance), format!("{} ETH", w.rewards)))
                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
            let network = if snap.is_wrong_chain() {
                format!("chain {} (expected {})", session.chain_id, snap.network)
            } else {
                snap.network.clone()
            };
            format!(
                "Account: {:#x}\nNetwork: {} | Balance: {} | Rewards: {}",
                session.account, network, balance, rewards
            )
        }
    };
    let style = if snap.is_wrong_chain() {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    let widget = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_settings_panel(f: &mut Frame, area: Rect, snap: &ClientSnapshot) {
    let mut text = match snap.limits {
        Some(limits) => {
            let fee = limits
                .withdraw_fee_percent
                .map(|fee| format!("{fee}%"))
                .unwrap_or_else(|| "n/a".to_string());
            format!(
                "Minimum bet: {} ETH | Withdraw after: {} ETH | Withdraw fee: {}",
                limits.minimum_bet, limits.withdraw_threshold, fee
            )
        }
        None => "Game settings not loaded".to_string(),
    };
    if snap.loading {
        text.push_str(" | Refreshing game data...");
    }
    let widget =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Game"));
    f.render_widget(widget, area);
}

fn move_label(choice: Option<Move>) -> String {
    choice.map_or_else(|| "-".to_string(), |m| m.to_string())
}

/// The dealt pair is only known from the start event seen on this device.
fn opponent_line(moves: Option<MovePair>) -> String {
    match moves {
        Some(moves) => format!("Opponent moves: {moves}"),
        None => "Opponent moves: not available yet".to_string(),
    }
}

fn draw_game_row(f: &mut Frame, area: Rect, snap: &ClientSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let bet_line = if snap.bet_input.is_empty() {
        Line::from("Bet: -")
    } else if snap.bet_valid {
        Line::from(format!("Bet: {} ETH", snap.bet_input)).style(Style::default().fg(Color::Green))
    } else {
        let hint = snap
            .limits
            .map(|limits| format!(" (minimum {} ETH)", limits.minimum_bet))
            .unwrap_or_default();
        Line::from(format!("Bet: {} ETH{}", snap.bet_input, hint))
            .style(Style::default().fg(Color::Red))
    };
    let mut play = vec![
        bet_line,
        Line::from(format!("First move: {}", move_label(snap.first))),
        Line::from(format!("Second move: {}", move_label(snap.second))),
    ];
    if snap.busy {
        play.push(Line::from("Transaction pending...").style(Style::default().fg(Color::Yellow)));
    } else if snap.active.is_none() && snap.can_withdraw {
        play.push(Line::from("Rewards ready: press w to withdraw"));
    }
    let play = Paragraph::new(play)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Play"));
    f.render_widget(play, cols[0]);

    let active = match snap.active {
        None => vec![Line::from("No active game")],
        Some(view) => {
            let mine = match view.pending_moves {
                Some(moves) => format!("Your moves: {moves}"),
                None => "Your moves: not stored on this device".to_string(),
            };
            let theirs = opponent_line(view.opponent_moves);
            let finish = match view.pending_moves {
                Some(moves) => format!(
                    "Press 1 to keep {} or 2 to keep {}",
                    moves.first, moves.second
                ),
                None => "Press 1 or 2 to keep your first or second move".to_string(),
            };
            vec![
                Line::from(format!("Bet: {} ETH", view.bet_amount)),
                Line::from(mine),
                Line::from(theirs),
                Line::from(finish),
            ]
        }
    };
    let active = Paragraph::new(active)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Active Game"));
    f.render_widget(active, cols[1]);
}

fn draw_recent_games(f: &mut Frame, area: Rect, history: &[RecentGameRecord]) {
    let lines: Vec<Line> = if history.is_empty() {
        vec![Line::from("No games played yet")]
    } else {
        history
            .iter()
            .map(|game| {
                let color = match game.outcome {
                    rps_client::Outcome::Win => Color::Green,
                    rps_client::Outcome::Loss => Color::Red,
                    rps_client::Outcome::Tie => Color::Yellow,
                };
                Line::from(format!(
                    "{:<4} | {} vs {} | {} ETH",
                    game.outcome.to_string(),
                    game.player_move,
                    game.opponent_move,
                    game.bet_amount
                ))
                .style(Style::default().fg(color))
            })
            .collect()
    };
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Recent Games"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &ClientSnapshot) {
    let (text, color, title) = match &snap.status {
        None => ("Ready".to_string(), Color::Green, "Status"),
        Some(status) => match status.severity {
            Severity::Info => (status.text.clone(), Color::Cyan, "Status"),
            Severity::Success => (status.text.clone(), Color::Green, "Status"),
            Severity::Error => (status.text.clone(), Color::Red, "Errors"),
        },
    };
    let widget = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(color));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "b bet | f/s moves | g start | 1/2 finish | w withdraw | r refresh | h history | c connect | n account | d disconnect | m network | x home | q quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState, snap: &ClientSnapshot) {
    match &state.mode {
        Mode::BetModal(_) => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Bet Amount");
            let p = Paragraph::new(format!(
                "Amount: {} ETH\nEnter=confirm Esc=cancel digits or . to edit",
                snap.bet_input
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(30, 15, f.area());
            let block = Block::default().borders(Borders::ALL).title("Quit");
            let p = Paragraph::new("Quit the game? y/n");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crossterm::event::{
        KeyEvent,
        KeyModifiers,
    };

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn with_bet(input: &str) -> ClientSnapshot {
        ClientSnapshot {
            bet_input: input.to_string(),
            ..ClientSnapshot::default()
        }
    }

    #[test]
    fn opponent_line__missing_pair_is_not_available_yet() {
        assert_eq!(opponent_line(None), "Opponent moves: not available yet");
        assert_eq!(
            opponent_line(Some(MovePair::new(Move::Paper, Move::Rock))),
            "Opponent moves: Paper, Rock"
        );
    }

    #[test]
    fn interpret_event__bet_modal_forwards_edits_to_the_controller() {
        // given
        let mut state = UiState::default();
        let snap = with_bet("0.1");
        interpret_event(&mut state, key(KeyCode::Char('b')), &snap);

        // when
        let typed = interpret_event(&mut state, key(KeyCode::Char('5')), &snap);
        let erased = interpret_event(&mut state, key(KeyCode::Backspace), &snap);
        let confirmed = interpret_event(&mut state, key(KeyCode::Enter), &snap);

        // then
        assert!(matches!(typed, Some(UserEvent::BetChar('5'))));
        assert!(matches!(erased, Some(UserEvent::BetBackspace)));
        assert!(matches!(confirmed, Some(UserEvent::Redraw)));
        assert!(matches!(state.mode, Mode::Normal));
    }

    #[test]
    fn interpret_event__cancelling_the_bet_modal_restores_the_previous_input() {
        // given
        let mut state = UiState::default();
        interpret_event(&mut state, key(KeyCode::Char('b')), &with_bet("0.1"));
        interpret_event(&mut state, key(KeyCode::Char('9')), &with_bet("0.1"));

        // when
        let cancelled = interpret_event(&mut state, key(KeyCode::Esc), &with_bet("0.19"));

        // then
        assert!(matches!(cancelled, Some(UserEvent::SetBet(input)) if input == "0.1"));
        assert!(matches!(state.mode, Mode::Normal));
    }
}
