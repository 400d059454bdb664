//! didrayd - DidRay stream runner
//!
//! Opens one frame source and screens it until the source ends or the
//! operator stops it. Control commands are read from stdin, one per line:
//! `pause`, `resume`, `stop`. Ctrl-C also stops the session.
//!
//! The final session report is printed to stdout as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use std::io::BufRead;
use std::time::Duration;

use didray::{
    detect::backend_from_settings, Detector, EngineConfig, SessionOptions, SqliteDetectionStore,
    StreamSupervisor, SupervisorState,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera index, image path, video path or stub://name.
    #[arg(env = "DIDRAY_SOURCE", default_value = "stub://demo")]
    source: String,

    /// Operator name recorded with every saved detection.
    #[arg(long, env = "DIDRAY_OPERATOR", default_value = "unknown")]
    operator: String,

    /// Operator role recorded with every saved detection.
    #[arg(long, env = "DIDRAY_ROLE", default_value = "operator")]
    role: String,

    /// Override the detection database path.
    #[arg(long)]
    db: Option<String>,

    /// Ignore stdin control commands.
    #[arg(long)]
    no_stdin: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Stop,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Some(Self::Pause),
            "resume" | "r" => Some(Self::Resume),
            "stop" | "q" | "quit" => Some(Self::Stop),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = EngineConfig::load()?;
    if let Some(db) = args.db.clone() {
        config.db_path = db;
    }

    let store = SqliteDetectionStore::open(&config.db_path)?;
    let detector = Detector::new(backend_from_settings(&config.detector)?);
    log::info!(
        "didrayd: detector={}, db={}, results={}",
        detector.backend_name(),
        config.db_path,
        config.results_dir.display()
    );

    let supervisor = StreamSupervisor::new(
        &config,
        SessionOptions::new(args.operator.clone(), args.role.clone()),
        detector,
        Box::new(store),
    );
    let (handle, frames) = supervisor.start(&args.source)?;

    let (tx, commands) = unbounded();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Command::Stop);
    })
    .context("install Ctrl-C handler")?;
    if !args.no_stdin {
        spawn_stdin_reader(tx);
    } else {
        drop(tx);
    }

    loop {
        if let Some(event) = frames.recv_timeout(Duration::from_millis(200)) {
            if !event.detections.is_empty() {
                let labels: Vec<String> =
                    event.detections.iter().map(|d| d.caption()).collect();
                log::info!(
                    "frame #{}: {} (tier {}, alarm {:?})",
                    event.sequence,
                    labels.join(", "),
                    event
                        .highest_tier
                        .map(|t| t.as_str())
                        .unwrap_or("none"),
                    event.alarm
                );
            }
        }

        match next_command(&commands) {
            Some(Command::Pause) => handle.pause(),
            Some(Command::Resume) => handle.resume(),
            Some(Command::Stop) => break,
            None => {}
        }

        if handle.state() == SupervisorState::Stopped {
            break;
        }
    }

    let report = handle.stop();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn next_command(commands: &Receiver<Command>) -> Option<Command> {
    match commands.try_recv() {
        Ok(command) => Some(command),
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
}

fn spawn_stdin_reader(tx: crossbeam_channel::Sender<Command>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("didrayd: unknown command '{}'", line.trim()),
            }
        }
    });
}
