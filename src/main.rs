use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use cuestage::timing::Clock;
use cuestage::{EngineCommand, EngineUpdate, Project, spawn_engine};
use ringbuf::traits::Consumer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Plays a cuestage project and logs the events it schedules.
#[derive(Parser)]
#[command(name = "cuestage")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding project.ron
    project_dir: PathBuf,

    /// How long to play, in seconds
    #[arg(default_value_t = 10.0, value_parser = parse_seconds)]
    seconds: f64,
}

fn parse_seconds(arg: &str) -> Result<f64, String> {
    let seconds: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(format!("expected a positive number of seconds, got {arg}"))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args {
        project_dir,
        seconds,
    } = args;

    let project = match Project::load(&project_dir) {
        Ok(project) => project,
        Err(e) => {
            error!(error = %e, path = %project_dir.display(), "failed to load project");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = spawn_engine(project.config.clone());
    let commands = [
        EngineCommand::ReloadProject(project),
        EngineCommand::Play { beat: None },
    ];
    for command in commands {
        if engine.command_tx.send(command).is_err() {
            error!("engine thread is gone");
            return ExitCode::FAILURE;
        }
    }

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    let mut playing = true;
    while playing && Instant::now() < deadline {
        for update in engine.update_rx.try_iter() {
            match update {
                EngineUpdate::Position { beat, bar } => debug!(beat, bar, "position"),
                EngineUpdate::PlaybackState { playing: false } => playing = false,
                EngineUpdate::Error { message } => error!(%message, "engine error"),
                _ => {}
            }
        }
        while let Some(event) = engine.events.try_pop() {
            info!(
                time = event.time,
                target = event.target.as_deref().unwrap_or("-"),
                kind = event.kind.name(),
                "{:?}",
                event.kind
            );
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let _ = engine.command_tx.send(EngineCommand::Stop);
    info!(elapsed = engine.clock.now(), "done");
    ExitCode::SUCCESS
}
