//! collab-relay CLI Client
//!
//! Joins a relay session from the terminal: shows who comes and goes,
//! prints content edits from peers and sends every typed line as one.
//!
//! # Usage
//!
//! ```bash
//! # Join a session on a local relay
//! relay --session board-1 --user 0xABCDEF1234567890
//!
//! # Remote relay
//! relay --url ws://relay.example.com:8080 -s board-1 -u alice
//! ```

mod input;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::input::Input;
use crate::session::{Event, LocalSession};
use relay_protocol::UserData;

/// collab-relay Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about = "collab-relay CLI - join a collaboration session")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080", env = "RELAY_URL")]
    url: String,

    /// Session to join
    #[arg(short, long, env = "RELAY_SESSION")]
    session: String,

    /// User identifier (wallet address, e-mail, ...)
    #[arg(short, long, env = "RELAY_USER")]
    user: String,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn endpoint(&self) -> String {
        format!(
            "{}/?session={}&wallet={}",
            self.url.trim_end_matches('/'),
            utf8_percent_encode(&self.session, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.user, NON_ALPHANUMERIC)
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let endpoint = args.endpoint();
    let (ws, _) = connect_async(endpoint.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    let (mut sink, mut stream) = ws.split();

    if !args.quiet {
        println!(
            "{}",
            format!(
                r#"
  ╦═╗╔═╗╦    CLI
  ╠╦╝║╣ ║    Joined session {} on {}
  ╩╚═╚═╝╩═╝  Type '/help' for commands, '/quit' to exit
"#,
                args.session, args.url
            )
            .cyan()
        );
    }

    let (lines_tx, mut lines) = mpsc::unbounded_channel();
    std::thread::spawn(move || read_lines(lines_tx));

    let mut session = LocalSession::new();

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => show(session.apply(&text)),
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{}", "Connection closed by relay.".yellow());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("{} {}", "Error:".red(), e);
                        break;
                    }
                }
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                let Some(input) = Input::parse(&line) else { continue };

                match input {
                    Input::Say(text) => match session.compose(&text) {
                        Some(Ok(frame)) => {
                            sink.send(Message::Text(frame.to_string())).await?;
                        }
                        Some(Err(e)) => eprintln!("{} {}", "Error:".red(), e),
                        None => println!("{}", "Not joined yet, try again in a moment.".yellow()),
                    },
                    Input::Who => print_roster(&session),
                    Input::MoveTo(position) => {
                        session.move_to(position);
                        println!("{}", format!("Now at ({}, {})", position.x, position.y).dimmed());
                    }
                    Input::Help => print_help(),
                    Input::Clear => print!("\x1B[2J\x1B[1;1H"),
                    Input::Quit => break,
                    Input::Unknown(raw) => {
                        eprintln!("{} unknown command {}", "Error:".red(), raw);
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}

/// Prompt loop; runs on its own thread since rustyline blocks
fn read_lines(lines: mpsc::UnboundedSender<String>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            return;
        }
    };
    let history_path = dirs_next::home_dir()
        .map(|p| p.join(".relay_history"))
        .unwrap_or_default();

    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!("{}> ", "relay".green());
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.trim());
                }
                let quit = matches!(Input::parse(&line), Some(Input::Quit));
                if lines.send(line).is_err() || quit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
}

fn show(event: Event) {
    match event {
        Event::Welcome(me) => {
            println!("{} {}", "You are".green(), paint(&me));
        }
        Event::Joined(user) => {
            println!("{} {}", "+".green().bold(), paint(&user));
        }
        Event::Left(user) => {
            println!("{} {}", "-".red().bold(), paint(&user));
        }
        Event::Content(data) => {
            println!(
                "{} {} {}",
                paint(&data.user_data),
                format!("@({}, {})", data.position.x, data.position.y).dimmed(),
                data.content
            );
        }
        Event::Other { kind, raw } => {
            let kind = if kind.is_empty() { "untyped" } else { kind.as_str() };
            println!("{}", format!("[{}] {}", kind, raw).dimmed());
        }
        Event::Unreadable(reason) => {
            println!("{}", format!("Unreadable frame: {}", reason).dimmed());
        }
    }
}

fn print_roster(session: &LocalSession) {
    match session.me() {
        Some(me) => println!("{} {}", paint(me), "(you)".dimmed()),
        None => println!("{}", "Not joined yet.".yellow()),
    }
    if session.peers().is_empty() {
        println!("{}", "Nobody else is here.".dimmed());
    }
    for (i, peer) in session.peers().iter().enumerate() {
        println!("{}) {}", i + 1, paint(peer));
    }
}

/// User name in the user's colour, when the terminal can show it
fn paint(user: &UserData) -> ColoredString {
    match hue_of(&user.user_color) {
        Some(hue) => {
            let (r, g, b) = hue_to_rgb(hue);
            user.user_name.truecolor(r, g, b).bold()
        }
        None => user.user_name.bold(),
    }
}

/// Hue of an `hsl(<hue>, 100%, 50%)` colour
fn hue_of(color: &str) -> Option<u16> {
    color
        .strip_prefix("hsl(")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Fully saturated, half-lightness HSL to RGB
fn hue_to_rgb(hue: u16) -> (u8, u8, u8) {
    let h = f64::from(hue % 360) / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u8 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let scale = |v: f64| (v * 255.0).round() as u8;
    (scale(r), scale(g), scale(b))
}

fn print_help() {
    println!(
        r#"
{}

{}
  <text>                                 Send text as a content edit
  //<text>                               Send text starting with '/'

{}
  /at <x> <y>                            Attach this position to later edits
  /who                                   List participants
  /help                                  Show this help
  /clear                                 Clear screen
  /quit, /exit                           Leave the session
"#,
        "collab-relay Commands".cyan().bold(),
        "Content".yellow().bold(),
        "Local".yellow().bold(),
    );
}

// Minimal dirs_next replacement for home directory
mod dirs_next {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
