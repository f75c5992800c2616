//! Hot-seat chess over stdin/stdout.
//!
//! Both sides play from one terminal, one command per line:
//!
//! ```text
//! select 2e | move 4e | promote queen | resign | moves 2e | board | quit
//! ```
//!
//! Every change is printed as a JSON `delta` line, every command is answered
//! with an `ack` or `error` line. The clock runs on wall time between commands.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chess_live::adapter::relay::LocalSink;
use chess_live::adapter::{create_ack, create_error, create_rejection, ErrorCode};
use chess_live::core::{Action, Actor, Audience, Match, Outcome, Piece};
use chess_live::types::{Color, MatchConfig, PieceKind, Tile, BOARD_SIDE, DEFAULT_SCALE};

enum Command {
    Act(Action),
    Moves(Tile),
    Board,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let arg = words.next();
    let tile = |arg: Option<&str>| {
        arg.and_then(Tile::from_name)
            .ok_or_else(|| format!("{verb} needs a tile such as 2e"))
    };
    match verb.as_str() {
        "select" | "s" => tile(arg).map(|t| Command::Act(Action::Select(t))),
        "move" | "m" => tile(arg).map(|t| Command::Act(Action::MoveTo(t))),
        "moves" => tile(arg).map(Command::Moves),
        "promote" | "p" => arg
            .and_then(PieceKind::from_str)
            .map(|k| Command::Act(Action::Promote(k)))
            .ok_or_else(|| "promote needs queen, rook, bishop or knight".to_string()),
        "resign" => Ok(Command::Act(Action::Resign)),
        "board" | "b" => Ok(Command::Board),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command: {other}")),
    }
}

fn write_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn glyph(piece: &Piece) -> char {
    let letter = piece.kind().letter();
    match piece.color() {
        Color::White => letter.to_ascii_uppercase(),
        Color::Black => letter,
    }
}

fn print_board(game: &Match) -> Result<()> {
    let mut out = io::stdout().lock();
    for row in 0..BOARD_SIDE {
        let mut line = format!("{} ", BOARD_SIDE - row);
        for col in 0..BOARD_SIDE {
            let c = Tile::new(row, col)
                .and_then(|t| game.board().piece_at(t))
                .map(glyph)
                .unwrap_or('.');
            line.push(c);
        }
        writeln!(out, "{line}")?;
    }
    writeln!(out, "  abcdefgh")?;
    writeln!(out, "{} to move", game.turn())?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = std::env::var("CHESS_TIME_CONTROL")
        .ok()
        .and_then(|tc| MatchConfig::from_time_control(&tc))
        .unwrap_or_default();
    let scale = std::env::var("CHESS_DEFAULT_SCALE")
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_SCALE);

    let mut game = Match::new(config);
    let mut sink = LocalSink::new(io::stdout(), scale);
    game.resync(Audience::Everyone, &mut sink);

    let mut last = Instant::now();
    let mut pending_ms: u128 = 0;
    for (n, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("read stdin")?;
        let seq = n as u64 + 1;

        pending_ms += last.elapsed().as_millis();
        last = Instant::now();
        let secs = (pending_ms / 1000) as u32;
        pending_ms %= 1000;
        if secs > 0 && game.tick(secs, &mut sink).is_some() {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_command(trimmed) {
            Ok(Command::Quit) => break,
            Ok(Command::Board) => print_board(&game)?,
            Ok(Command::Moves(tile)) => {
                let moves: Vec<&str> = game.legal_moves(tile).tiles().map(Tile::name).collect();
                write_json(&serde_json::json!({ "tile": tile.name(), "moves": moves }))?;
            }
            Ok(Command::Act(action)) => {
                match game.apply(Actor::Local, action, &mut sink) {
                    Outcome::Accepted(_) => write_json(&create_ack(seq))?,
                    Outcome::Rejected(reason) => {
                        write_json(&create_rejection(seq, reason.as_str()))?
                    }
                }
                if game.is_over() {
                    break;
                }
            }
            Err(message) => {
                write_json(&create_error(seq, ErrorCode::InvalidCommand, &message))?
            }
        }
    }

    if let Some(over) = game.game_over() {
        info!(result = over.result.as_str(), reason = over.reason.as_str(), "game over");
    }
    if sink.failures() > 0 {
        anyhow::bail!("{} deltas could not be written", sink.failures());
    }
    Ok(())
}
