//! Keyboard-driven player for the `play` command
//!
//! Keys: space toggles pause, n/p move between tracks, s stops, a track
//! number followed by enter plays that track, q quits.

use anyhow::Result;
use colored::Colorize;
use console::{Key, Term};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use super::commands::{load_album, print_album, ytdlp};
use crate::acquisition::StreamResolver;
use crate::config::Settings;
use crate::playback::{
    ExternalPlayer, MediaBackend, Notice, PlaybackError, PlaybackSession, PlaybackState,
};
use crate::utils::InteractiveGuard;

/// Things the key loop can ask of the session
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Toggle,
    Next,
    Previous,
    Stop,
    /// 0-based row
    Play(usize),
    Quit,
}

/// Collects digits for "number + enter" track selection
#[derive(Debug, Default)]
struct KeyInput {
    digits: String,
}

impl KeyInput {
    fn feed(&mut self, key: Key) -> Option<Action> {
        match key {
            Key::Char(c) if c.is_ascii_digit() => {
                self.digits.push(c);
                None
            }
            Key::Backspace => {
                self.digits.pop();
                None
            }
            Key::Enter => {
                let number: usize = std::mem::take(&mut self.digits).parse().ok()?;
                number.checked_sub(1).map(Action::Play)
            }
            Key::Char(' ') => Some(Action::Toggle),
            Key::Char('n') | Key::ArrowRight => Some(Action::Next),
            Key::Char('p') | Key::ArrowLeft => Some(Action::Previous),
            Key::Char('s') => Some(Action::Stop),
            Key::Char('q') | Key::Escape => Some(Action::Quit),
            _ => None,
        }
    }
}

/// Handle the `play` command
pub async fn play(playlist: String, start: Option<usize>, album_json: Option<&Path>) -> Result<()> {
    let settings = Settings::load()?;
    println!("{}", "Fetching album...".cyan());
    let album = Arc::new(load_album(&settings, &playlist, album_json).await?);
    print_album(&album);
    println!();
    println!(
        "{}",
        "space: play/pause  n/p: next/prev  s: stop  <number> enter: play track  q: quit".dimmed()
    );

    let (media_tx, mut media_rx) = mpsc::unbounded_channel();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let (lookup_tx, mut lookup_rx) = mpsc::unbounded_channel();
    let backend = ExternalPlayer::new(&settings.player_path, media_tx);
    let mut session = PlaybackSession::new(
        playlist,
        album,
        Arc::new(ytdlp(&settings)),
        backend,
        settings.session_config(),
        notice_tx,
        lookup_tx,
    );

    let term = Term::stdout();
    let mut keys = spawn_key_reader();
    let mut input = KeyInput::default();
    let _interactive = InteractiveGuard::enter();

    if let Some(track) = start {
        let row = track.saturating_sub(1);
        report_error(&term, session.play(row));
        show_notices(&term, &mut notice_rx);
    }

    loop {
        tokio::select! {
            key = keys.recv() => {
                let Some(key) = key else { break };
                let Some(action) = input.feed(key) else { continue };
                debug!("Player action: {:?}", action);
                if action == Action::Quit {
                    break;
                }
                report_error(&term, apply(&mut session, action));
            }
            Some(event) = media_rx.recv() => {
                report_error(&term, session.handle_media_event(event));
            }
            Some(resolution) = lookup_rx.recv() => {
                report_error(&term, session.handle_resolution(resolution));
            }
        }
        show_notices(&term, &mut notice_rx);
        show_status(&term, &session);
    }

    if session.state() != PlaybackState::Stopped {
        session.stop();
    }
    let _ = term.clear_line();
    Ok(())
}

/// Apply one key action; never waits on a stream lookup
fn apply<R: StreamResolver + 'static, B: MediaBackend>(
    session: &mut PlaybackSession<R, B>,
    action: Action,
) -> Result<(), PlaybackError> {
    match action {
        Action::Toggle if session.state() == PlaybackState::Stopped && !session.is_resolving() => {
            session.play(0)
        }
        Action::Toggle => session.toggle(),
        Action::Next => session.next(),
        Action::Previous => session.previous(),
        Action::Stop => {
            session.stop();
            Ok(())
        }
        Action::Play(row) => session.play(row),
        Action::Quit => Ok(()),
    }
}

/// Read keys on a dedicated thread; `read_key` blocks
fn spawn_key_reader() -> UnboundedReceiver<Key> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let term = Term::stdout();
        while let Ok(key) = term.read_key() {
            // Stop reading on quit so the terminal leaves raw mode
            let quit = matches!(key, Key::Char('q') | Key::Escape);
            if tx.send(key).is_err() || quit {
                break;
            }
        }
    });
    rx
}

fn say(term: &Term, line: &str) {
    let _ = term.clear_line();
    // The key reader may hold the terminal in raw mode
    let _ = term.write_str(&format!("\r{}\r\n", line));
}

fn report_error(term: &Term, result: Result<(), PlaybackError>) {
    if let Err(e) = result {
        say(term, &format!("{}", e.to_string().red()));
    }
}

fn show_notices(term: &Term, notices: &mut UnboundedReceiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        let line = match notice {
            Notice::Playing { row, label } => {
                format!("{} {}. {}", "▶".green(), row + 1, label.bold())
            }
            Notice::Paused => "Paused".yellow().to_string(),
            Notice::Resumed => "Resumed".green().to_string(),
            Notice::Retrying { attempt, max } => {
                format!("Playback failed. Retrying... ({}/{})", attempt, max)
                    .yellow()
                    .to_string()
            }
            Notice::Failed { reason } => format!(
                "{} {}",
                "Playback failed. Please try another track.".red().bold(),
                reason.dimmed()
            ),
            Notice::Stopped => "Stopped".dimmed().to_string(),
            Notice::EndOfList => "End of the track list".dimmed().to_string(),
        };
        say(term, &line);
    }
}

fn show_status<R: StreamResolver + 'static, B: MediaBackend>(
    term: &Term,
    session: &PlaybackSession<R, B>,
) {
    if session.is_resolving() {
        if let Some(row) = session.current_row() {
            let _ = term.clear_line();
            let _ = term.write_str(&format!("\r… {}", loading_line(row, session.retries())));
        }
        return;
    }
    let Some(label) = session.label() else {
        return;
    };
    let total = session
        .duration()
        .map(format_time)
        .unwrap_or_else(|| "--:--".to_string());
    let marker = match session.state() {
        PlaybackState::Paused => "⏸",
        _ => "▶",
    };
    let _ = term.clear_line();
    let _ = term.write_str(&format!(
        "\r{} {}  {} / {}",
        marker,
        label,
        format_time(session.position()),
        total
    ));
}

fn loading_line(row: usize, retries: u32) -> String {
    match retries {
        0 => format!("Loading track {}", row + 1),
        n => format!("Loading track {} (retry {})", row + 1, n),
    }
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_then_enter_plays_row() {
        let mut input = KeyInput::default();
        assert_eq!(input.feed(Key::Char('1')), None);
        assert_eq!(input.feed(Key::Char('2')), None);
        assert_eq!(input.feed(Key::Enter), Some(Action::Play(11)));
        // Digits are consumed
        assert_eq!(input.feed(Key::Enter), None);
    }

    #[test]
    fn test_backspace_and_zero() {
        let mut input = KeyInput::default();
        input.feed(Key::Char('3'));
        input.feed(Key::Backspace);
        input.feed(Key::Char('0'));
        assert_eq!(input.feed(Key::Enter), None);
    }

    #[test]
    fn test_control_keys() {
        let mut input = KeyInput::default();
        assert_eq!(input.feed(Key::Char(' ')), Some(Action::Toggle));
        assert_eq!(input.feed(Key::Char('n')), Some(Action::Next));
        assert_eq!(input.feed(Key::Char('p')), Some(Action::Previous));
        assert_eq!(input.feed(Key::Char('s')), Some(Action::Stop));
        assert_eq!(input.feed(Key::Char('q')), Some(Action::Quit));
        assert_eq!(input.feed(Key::Char('x')), None);
    }

    #[test]
    fn test_loading_line() {
        assert_eq!(loading_line(0, 0), "Loading track 1");
        assert_eq!(loading_line(4, 2), "Loading track 5 (retry 2)");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(125)), "02:05");
    }
}
