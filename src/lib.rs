pub mod commands;
pub mod game_loop;
pub mod pipeline;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commands::PipelineState;
use dryfire_calib::CalibrationMode;
use dryfire_config::Settings;
use dryfire_state::StartCommand;
use pipeline::GameEvent;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Dry-fire laser training: detects red flashes on a calibrated target and
/// scores them.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Settings file (JSON); defaults are used if it does not exist
    #[arg(short, long, default_value = "dryfire.json")]
    config: PathBuf,

    /// Directory of frames to replay, in file-name order
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Video file to replay
    #[cfg(feature = "video")]
    #[arg(long)]
    video: Option<PathBuf>,

    /// Shots in the session; overrides the settings file
    #[arg(short, long)]
    shots: Option<u32>,

    /// Corner taps in display pixels, TL TR BR BL: "x,y x,y x,y x,y"
    #[arg(long)]
    taps: Option<String>,

    /// Calibrate continuously from fiducials instead of taps
    #[arg(long)]
    auto: bool,
}

fn parse_taps(s: &str) -> Result<Vec<(f64, f64)>> {
    let taps = s
        .split_whitespace()
        .map(|pair| -> Result<(f64, f64)> {
            let (x, y) = pair
                .split_once(',')
                .with_context(|| format!("Tap {:?} is not x,y", pair))?;
            Ok((
                x.trim().parse::<f64>().with_context(|| format!("Bad x in {:?}", pair))?,
                y.trim().parse::<f64>().with_context(|| format!("Bad y in {:?}", pair))?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    if taps.len() != 4 {
        bail!("Expected 4 taps, got {}", taps.len());
    }
    Ok(taps)
}

fn start_source(state: &PipelineState, args: &Args, settings: Settings) -> Result<()> {
    #[cfg(feature = "video")]
    if let Some(path) = &args.video {
        let source = dryfire_capture::video::VideoFile::open(path)?;
        return commands::start_pipeline(state, settings, source);
    }

    match &args.frames {
        Some(dir) => {
            let source = dryfire_capture::ImageSequence::open(dir)?;
            if source.is_empty() {
                bail!("No frames in {}", dir.display());
            }
            commands::start_pipeline(state, settings, source)
        }
        None => bail!("No frame source given (use --frames)"),
    }
}

async fn run_session(args: Args) -> Result<()> {
    let mut settings = Settings::load(&args.config)?;
    if args.auto {
        settings.calibration.mode = CalibrationMode::Auto;
    }
    let shots = args.shots.unwrap_or(settings.shots_goal);
    let taps = args.taps.as_deref().map(parse_taps).transpose()?;
    let mode = settings.calibration.mode;

    let state = PipelineState::new();
    start_source(&state, &args, settings)?;
    let mut events = commands::subscribe(&state)?;

    match (mode, taps) {
        (CalibrationMode::Manual, Some(taps)) => {
            commands::calibrate(&state)?;
            for (x, y) in taps {
                commands::tap(&state, x, y).await?;
            }
        }
        (CalibrationMode::Manual, None) => {
            warn!("Manual calibration without --taps: flashes will not be scored");
        }
        (CalibrationMode::Auto, Some(_)) => warn!("--taps ignored in automatic calibration"),
        (CalibrationMode::Auto, None) => {}
    }

    commands::start_game(&state, StartCommand { shots })?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if matches!(event, GameEvent::SessionFinished { .. } | GameEvent::SourceEnded) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} event(s)", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    println!("{}", commands::get_status(&state)?);
    commands::stop_pipeline(&state)
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dryfire_lib=debug,dryfire_capture=debug,dryfire_vision=info,dryfire_calib=debug"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(run_session(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_taps() {
        let taps = parse_taps("0,0 640,0 640,480 0,480").unwrap();
        assert_eq!(taps[2], (640.0, 480.0));
        assert!(parse_taps("0,0 640,0").is_err());
        assert!(parse_taps("0,0 640;0 640,480 0,480").is_err());
    }

    #[test]
    fn test_args() {
        let args =
            Args::try_parse_from(["dryfire", "--frames", "shots/", "--shots", "5", "--auto"])
                .unwrap();
        assert_eq!(args.shots, Some(5));
        assert!(args.auto);
        assert_eq!(args.config, PathBuf::from("dryfire.json"));
    }
}
