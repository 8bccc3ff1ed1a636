//! readycheck: accept matchmaking ready checks automatically.
//!
//! Reads the client lockfile, then waits for commands on stdin:
//!
//!   <enter> | t | toggle   start or stop auto-accept
//!   s | status             print the current status
//!   q | quit               stop and exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use readycheck_sdk::lockfile::DEFAULT_LOCKFILE_PATH;
use readycheck_sdk::{AccepterConfig, AutoAccepter, ConnectionState, Event, LockfileSource, Status};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "readycheck", about = "Auto-accept matchmaking ready checks")]
struct Args {
    /// Path to the client lockfile
    #[arg(long, env = "READYCHECK_LOCKFILE", default_value = DEFAULT_LOCKFILE_PATH)]
    lockfile: PathBuf,

    /// Seconds between game-flow polls
    #[arg(long, default_value_t = 3)]
    interval: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 5)]
    request_timeout: u64,

    /// Seconds to wait for a clean stop before cancelling the loop
    #[arg(long, default_value_t = 7)]
    stop_grace: u64,

    /// Turn auto-accept on at launch
    #[arg(long)]
    start: bool,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

enum Input {
    Toggle,
    Status,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Input::Toggle,
        "s" | "status" => Input::Status,
        "q" | "quit" | "exit" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

fn format_status(status: &Status) -> String {
    let connection = match status.connection {
        ConnectionState::Connected => "connected",
        ConnectionState::Disconnected => "disconnected",
    };
    let running = if status.running { "on" } else { "off" };
    let last = status
        .last_accepted_at
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "[{connection}] auto-accept {running} | phase {} | accepted {} (last {last}) | {}",
        status.phase, status.accepted_total, status.message
    )
}

fn format_event(event: &Event) -> String {
    match event {
        Event::Connected => "Connected to the client".to_string(),
        Event::Disconnected { reason } => format!("Disconnected: {reason}"),
        Event::PhaseChanged { phase } => format!("Phase: {phase}"),
        Event::ReadyCheckAccepted => "Ready check accepted".to_string(),
        Event::LoopStarted => "Auto-accept on".to_string(),
        Event::LoopStopped { exit } => exit.to_string(),
    }
}

async fn toggle(accepter: &AutoAccepter) {
    match accepter.toggle().await {
        Ok(state) => tracing::debug!(?state, "Toggled"),
        Err(e) => println!("Can't start: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "readycheck_sdk=info,readycheck_cli=info".into());
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AccepterConfig {
        poll_interval: Duration::from_secs(args.interval.max(1)),
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
        stop_grace: Duration::from_secs(args.stop_grace),
    };
    tracing::info!(lockfile = %args.lockfile.display(), ?config, "Starting readycheck");

    let accepter = Arc::new(AutoAccepter::new(
        Arc::new(LockfileSource::new(&args.lockfile)),
        config,
    ));

    let mut events = accepter.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if args.start {
        toggle(&accepter).await;
    }
    println!("Enter: toggle | s: status | q: quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Toggle => toggle(&accepter).await,
                    Input::Status => println!("{}", format_status(&accepter.status())),
                    Input::Quit => break,
                    Input::Unknown(cmd) => println!("Unknown command: {cmd}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    accepter.shutdown().await;
    printer.abort();
    println!("{}", accepter.status_message());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_commands() {
        assert!(matches!(parse_input(""), Input::Toggle));
        assert!(matches!(parse_input("  T \n"), Input::Toggle));
        assert!(matches!(parse_input("status"), Input::Status));
        assert!(matches!(parse_input("q"), Input::Quit));
        assert!(matches!(parse_input("accept"), Input::Unknown(c) if c == "accept"));
    }

    #[test]
    fn args_defaults() {
        let args = Args::parse_from(["readycheck", "--lockfile", "/tmp/lockfile"]);
        assert_eq!(args.interval, 3);
        assert_eq!(args.request_timeout, 5);
        assert_eq!(args.stop_grace, 7);
        assert!(!args.start);
    }
}
