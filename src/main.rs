//! sandterm: interactive terminal for disposable sandbox shells.
//!
//! Usage:
//!   sandterm --backend-url http://localhost:8080 --user-id u1
//!
//! The countdown, key handling, and in-flight execution results all feed
//! one reducer (`Shell`); this binary just wires the event sources up and
//! paints the transcript.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use futures_util::StreamExt;
use tracing::warn;

use sandterm::config;
use sandterm::format::format_duration;
use sandterm::{Config, HttpBackend, Identity, Line, LineKind, Shell};

#[derive(Parser, Debug)]
#[command(name = "sandterm")]
#[command(about = "Interactive terminal for disposable time-boxed sandbox shells")]
struct Args {
    /// Base URL of the sandbox backend
    #[arg(long, env = "SANDTERM_BACKEND_URL", default_value = "http://localhost:8080/")]
    backend_url: String,

    /// User identifier sent to the backend on start
    #[arg(long, env = "SANDTERM_USER_ID")]
    user_id: Option<String>,

    /// Display name sent to the backend on start (defaults to the user id)
    #[arg(long, env = "SANDTERM_DISPLAY_NAME")]
    display_name: Option<String>,

    /// Session length requested on start, in hours
    #[arg(long, default_value_t = config::DEFAULT_SESSION_HOURS)]
    hours: u32,

    /// Terminal width used for column-aligned listings
    #[arg(long, default_value_t = config::DEFAULT_TERMINAL_WIDTH)]
    width: usize,

    /// Override the session record location
    #[arg(long)]
    record_path: Option<PathBuf>,
}

/// Restores cooked mode even on early returns and panics.
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let backend_url = match url::Url::parse(&args.backend_url) {
        Ok(u) => u,
        Err(e) => {
            eprintln!("Error: invalid backend url: {}", e);
            std::process::exit(1);
        }
    };
    let identity = args.user_id.map(|user_id| Identity {
        display_name: args.display_name.clone().unwrap_or_else(|| user_id.clone()),
        user_id,
    });
    let config = Config {
        backend_url: backend_url.clone(),
        session_hours: args.hours,
        terminal_width: args.width,
        record_path: args.record_path.unwrap_or_else(Config::default_record_path),
    };

    let backend = Arc::new(HttpBackend::new(backend_url));
    let (mut shell, mut results) = Shell::new(backend, &config, identity);
    shell
        .terminal
        .transcript
        .push(LineKind::Output, "sandterm: disposable sandbox shell");
    shell.terminal.transcript.push(
        LineKind::Output,
        "type 'help' for commands, 'start' to provision a sandbox",
    );
    shell.restore(Utc::now());

    let _raw = match RawMode::enable() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: could not enter raw mode: {}", e);
            std::process::exit(1);
        }
    };

    let mut keys = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut rendered = 0usize;
    let mut quit = false;

    while !quit {
        let _ = render(&shell, &mut rendered);
        tokio::select! {
            _ = ticker.tick() => {
                shell.tick(Utc::now());
            }
            Some(event) = results.recv() => {
                shell.apply(event);
            }
            maybe_key = keys.next() => {
                match maybe_key {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        quit = handle_key(&mut shell, key);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "terminal event error");
                        quit = true;
                    }
                    None => quit = true,
                }
            }
        }
        if shell.should_quit() {
            quit = true;
        }
    }

    let _ = render(&shell, &mut rendered);
    if shell.session.is_active() {
        print!(
            "\r\n{}\r\n",
            "session left running; run sandterm again to re-attach".dimmed()
        );
    } else {
        print!("\r\n");
    }
    let _ = std::io::stdout().flush();
}

/// Returns true when the user asked to leave (Ctrl+C / Ctrl+D). The
/// session is left running so the persisted record can re-attach to it.
fn handle_key(shell: &mut Shell, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('d')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            return true;
        }
        KeyCode::Enter => shell.submit(),
        KeyCode::Tab => shell.complete_input(),
        KeyCode::Up => shell.terminal.history_up(),
        KeyCode::Down => shell.terminal.history_down(),
        KeyCode::Backspace => {
            if !shell.busy() {
                shell.terminal.backspace();
            }
        }
        KeyCode::Char(c) => {
            if !shell.busy() {
                shell.terminal.insert_char(c);
            }
        }
        _ => {}
    }
    false
}

/// Paint transcript lines appended since the last call, then the prompt.
/// While a command is in flight the trailing placeholder line is shown as
/// the prompt instead, so it never ends up in the scrollback.
fn render(shell: &Shell, rendered: &mut usize) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    let lines = shell.terminal.transcript.lines();

    // The transcript only ever shrinks on `clear`; start the screen over.
    if lines.len() < *rendered {
        write!(out, "\x1b[2J\x1b[H")?;
        *rendered = 0;
    }

    let limit = if shell.busy() {
        lines.len().saturating_sub(1)
    } else {
        lines.len()
    };
    write!(out, "\r\x1b[2K")?;
    if *rendered < limit {
        for line in &lines[*rendered..limit] {
            write!(out, "{}\r\n", styled(line))?;
        }
        *rendered = limit;
    }
    write!(out, "{}{}", prompt(shell), shell.terminal.input())?;
    out.flush()
}

fn styled(line: &Line) -> String {
    match line.kind {
        LineKind::Input => format!("$ {}", line.text).cyan().to_string(),
        LineKind::Error => line.text.red().to_string(),
        LineKind::Success => line.text.green().to_string(),
        LineKind::Output => line.text.clone(),
    }
}

fn prompt(shell: &Shell) -> String {
    if shell.busy() {
        return "executing... ".dimmed().to_string();
    }
    if shell.session.is_active() {
        let remaining = shell
            .session
            .remaining(Utc::now())
            .map(format_duration)
            .unwrap_or_default();
        format!("root@sandbox:{} [{}]# ", shell.current_dir(), remaining)
    } else {
        "sandterm> ".to_string()
    }
}
