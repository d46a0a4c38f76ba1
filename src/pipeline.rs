use anyhow::{Context, Result};
use image::RgbaImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use dryfire_calib::{
    CalibrationEngine, CalibrationError, CalibrationMode, CalibrationState, SharedHomography,
    TickOutcome,
};
use dryfire_capture::{CaptureStatus, FrameSlot, FrameSource};
use dryfire_config::Settings;
use dryfire_state::{HitEvent, RemoteStatus, SessionStats, SessionSummary};

use crate::game_loop::{FrameOutcome, GameLoop};

/// Everything the pipeline reports to UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    SessionStarted { goal: u32 },
    SessionStopped,
    Hit { hit: HitEvent, stats: SessionStats },
    SessionFinished { summary: SessionSummary },
    Calibration { state: CalibrationState, status: String },
    SourceEnded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub status: RemoteStatus,
    pub last_hit: Option<HitEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub mode: CalibrationMode,
    pub state: CalibrationState,
    pub status: String,
    pub stale: bool,
}

impl CalibrationReport {
    fn of(engine: &CalibrationEngine) -> Self {
        Self {
            mode: engine.mode(),
            state: engine.state(),
            status: engine.status().to_string(),
            stale: engine.is_stale(),
        }
    }
}

#[derive(Debug)]
pub enum CalibrationCommand {
    BeginManual,
    Tap {
        point: Point2<f64>,
        reply: oneshot::Sender<Result<CalibrationState, CalibrationError>>,
    },
    Recalibrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCommand {
    Start { goal: u32 },
    Stop,
}

/// Frame source → game loop, with calibration on its own schedule.
///
/// Frames travel on a watch channel, so the game task always takes the newest
/// frame and skips any it was too slow for. The calibration task is the only
/// writer of the published homography.
pub struct Pipeline {
    settings: Settings,
    stop: Arc<AtomicBool>,
    frame_rx: watch::Receiver<FrameSlot>,
    status_rx: watch::Receiver<CaptureStatus>,
    snapshot_rx: watch::Receiver<GameSnapshot>,
    calibration_rx: watch::Receiver<CalibrationReport>,
    homography_rx: watch::Receiver<SharedHomography>,
    game_tx: mpsc::UnboundedSender<GameCommand>,
    calibration_tx: mpsc::UnboundedSender<CalibrationCommand>,
    events_tx: broadcast::Sender<GameEvent>,
}

impl Pipeline {
    /// Spawn the source loop, game task, calibration task and event emitter.
    /// Must be called from within a Tokio runtime.
    pub fn start<S>(settings: Settings, source: S) -> Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        let target = settings.target().context("Invalid target configuration")?;
        let stop = Arc::new(AtomicBool::new(false));

        let engine = CalibrationEngine::new(settings.engine_config());
        let homography_rx = engine.subscribe();
        let game = GameLoop::new(
            (settings.processing.width, settings.processing.height),
            settings.blob_selector(),
            engine.projector(),
            target,
            settings.hit_debounce(),
        );

        let (frame_tx, frame_rx) = watch::channel::<FrameSlot>(None);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());
        let (snapshot_tx, snapshot_rx) = watch::channel(GameSnapshot {
            status: game.remote_status(),
            last_hit: None,
        });
        let (calibration_report_tx, calibration_rx) =
            watch::channel(CalibrationReport::of(&engine));
        let (game_tx, game_cmd_rx) = mpsc::unbounded_channel();
        let (calibration_tx, calibration_cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);

        // Frame source
        let stop_source = stop.clone();
        let frame_interval = settings.frame_interval();
        tokio::spawn(async move {
            let result = dryfire_capture::source_loop(
                source,
                frame_tx,
                status_tx,
                frame_interval,
                stop_source,
            )
            .await;
            if let Err(e) = result {
                warn!("Source loop error: {:#}", e);
            }
        });

        tokio::spawn(game_task(
            game,
            frame_rx.clone(),
            game_cmd_rx,
            snapshot_tx,
            event_tx.clone(),
            stop.clone(),
        ));

        tokio::spawn(calibration_task(
            engine,
            frame_rx.clone(),
            calibration_cmd_rx,
            calibration_report_tx,
            event_tx,
            (settings.processing.width, settings.processing.height),
            settings.tick_interval(),
            stop.clone(),
        ));

        tokio::spawn(event_emitter(event_rx, events_tx.clone()));

        info!(
            "Pipeline started ({:?} calibration, processing {}x{})",
            settings.calibration.mode, settings.processing.width, settings.processing.height
        );

        Ok(Self {
            settings,
            stop,
            frame_rx,
            status_rx,
            snapshot_rx,
            calibration_rx,
            homography_rx,
            game_tx,
            calibration_tx,
            events_tx,
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        info!("Pipeline stop requested");
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events_tx.subscribe()
    }

    pub fn start_game(&self, goal: u32) -> Result<()> {
        self.game_tx
            .send(GameCommand::Start { goal })
            .context("Game task has stopped")
    }

    pub fn stop_game(&self) -> Result<()> {
        self.game_tx.send(GameCommand::Stop).context("Game task has stopped")
    }

    pub fn send_calibration(&self, cmd: CalibrationCommand) -> Result<()> {
        self.calibration_tx
            .send(cmd)
            .map_err(|_| anyhow::anyhow!("Calibration task has stopped"))
    }

    /// Sender for commands that wait on a reply, usable without holding the pipeline.
    pub fn calibration_commands(&self) -> mpsc::UnboundedSender<CalibrationCommand> {
        self.calibration_tx.clone()
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.status_rx.borrow().clone()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn calibration(&self) -> CalibrationReport {
        self.calibration_rx.borrow().clone()
    }

    pub fn homography(&self) -> SharedHomography {
        self.homography_rx.borrow().clone()
    }

    /// Get the latest delivered frame
    pub fn latest_frame(&self) -> Option<Arc<RgbaImage>> {
        self.frame_rx.borrow().clone()
    }

    /// Save the latest frame with its red mask and calibration binarization.
    /// Returns the path to the debug directory.
    pub fn save_debug_frame(&self) -> Option<PathBuf> {
        let frame = self.latest_frame()?;

        let debug_dir = std::env::temp_dir().join("dryfire_debug");
        let _ = std::fs::create_dir_all(&debug_dir);

        let (pw, ph) = (self.settings.processing.width, self.settings.processing.height);
        let _ = frame.save(debug_dir.join("frame_full.png"));
        let processed = dryfire_capture::to_processing_frame(&frame, pw, ph);
        let _ = processed.save(debug_dir.join("frame_processing.png"));

        let mask = dryfire_vision::segment_red(processed.as_ref());
        let _ = mask.save(debug_dir.join("red_mask.png"));

        let gray = image::imageops::grayscale(processed.as_ref());
        let binary = dryfire_vision::adaptive_threshold_inv(&gray, 7, 7);
        let _ = binary.save(debug_dir.join("calibration_binary.png"));

        let report = self.calibration();
        let mut info = format!(
            "Frame: {}x{}\nProcessing: {}x{}\nRed pixels: {}\n",
            frame.width(),
            frame.height(),
            pw,
            ph,
            mask.pixels().filter(|p| p[0] > 0).count()
        );
        info.push_str(&format!(
            "Calibration: {} ({}){}\n",
            report.state,
            report.status,
            if report.stale { " [stale]" } else { "" }
        ));
        match self.homography() {
            Some(h) => info.push_str(&format!("Homography: {}\n", h.matrix())),
            None => info.push_str("Homography: none\n"),
        }
        let _ = std::fs::write(debug_dir.join("info.txt"), info);

        info!("Debug frame saved to {}", debug_dir.display());
        Some(debug_dir)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

async fn game_task(
    mut game: GameLoop,
    mut frame_rx: watch::Receiver<FrameSlot>,
    mut cmd_rx: mpsc::UnboundedReceiver<GameCommand>,
    snapshot_tx: watch::Sender<GameSnapshot>,
    events: mpsc::UnboundedSender<GameEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut last_hit = None;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        tokio::select! {
            changed = frame_rx.changed() => {
                if changed.is_err() {
                    let _ = events.send(GameEvent::SourceEnded);
                    break;
                }
                let Some(frame) = frame_rx.borrow_and_update().clone() else {
                    continue;
                };

                let now = Instant::now();
                let joined = tokio::task::spawn_blocking(move || {
                    let outcome = game.process_frame(&frame, now);
                    (game, outcome)
                })
                .await;
                let outcome = match joined {
                    Ok((returned, outcome)) => {
                        game = returned;
                        outcome
                    }
                    Err(e) => {
                        warn!("Game loop task failed: {}", e);
                        break;
                    }
                };

                match outcome {
                    FrameOutcome::Hit(scored) => {
                        last_hit = Some(scored.hit);
                        let _ = events.send(GameEvent::Hit {
                            hit: scored.hit,
                            stats: scored.stats,
                        });
                        if let Some(summary) = scored.summary {
                            let _ = events.send(GameEvent::SessionFinished { summary });
                        }
                    }
                    FrameOutcome::Nothing => continue,
                    other => {
                        debug!("Frame outcome: {:?}", other);
                        continue;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(GameCommand::Start { goal }) => {
                        match game.start_session(goal, Instant::now()) {
                            Ok(()) => {
                                last_hit = None;
                                let _ = events.send(GameEvent::SessionStarted { goal });
                            }
                            Err(e) => warn!("Session not started: {}", e),
                        }
                    }
                    Some(GameCommand::Stop) => {
                        game.stop_session();
                        last_hit = None;
                        let _ = events.send(GameEvent::SessionStopped);
                    }
                    None => break,
                }
            }
        }

        snapshot_tx.send_replace(GameSnapshot {
            status: game.remote_status(),
            last_hit,
        });
    }

    debug!("Game task finished");
}

#[allow(clippy::too_many_arguments)]
async fn calibration_task(
    mut engine: CalibrationEngine,
    frame_rx: watch::Receiver<FrameSlot>,
    mut cmd_rx: mpsc::UnboundedReceiver<CalibrationCommand>,
    report_tx: watch::Sender<CalibrationReport>,
    events: mpsc::UnboundedSender<GameEvent>,
    processing: (u32, u32),
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if engine.mode() != CalibrationMode::Auto {
                    continue;
                }
                let frame = frame_rx.borrow().clone();
                let Some(frame) = frame else {
                    continue;
                };

                let now = Instant::now();
                let (w, h) = processing;
                let joined = tokio::task::spawn_blocking(move || {
                    let processed = dryfire_capture::to_processing_frame(&frame, w, h);
                    let gray = image::imageops::grayscale(processed.as_ref());
                    let outcome = engine.tick(&gray, now);
                    (engine, outcome)
                })
                .await;
                match joined {
                    Ok((returned, outcome)) => {
                        engine = returned;
                        if let TickOutcome::Missed { markers } = outcome {
                            debug!("Calibration tick missed ({} marker(s))", markers);
                        }
                    }
                    Err(e) => {
                        warn!("Calibration tick failed: {}", e);
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(CalibrationCommand::BeginManual) => engine.begin_manual(),
                    Some(CalibrationCommand::Tap { point, reply }) => {
                        let _ = reply.send(engine.tap(point, Instant::now()));
                    }
                    Some(CalibrationCommand::Recalibrate) => engine.recalibrate(),
                    None => break,
                }
            }
        }

        let report = CalibrationReport::of(&engine);
        if *report_tx.borrow() != report {
            if report_tx.borrow().state != report.state || report.stale {
                let _ = events.send(GameEvent::Calibration {
                    state: report.state,
                    status: report.status.clone(),
                });
            }
            report_tx.send_replace(report);
        }
    }

    debug!("Calibration task finished");
}

async fn event_emitter(
    mut rx: mpsc::UnboundedReceiver<GameEvent>,
    tx: broadcast::Sender<GameEvent>,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            GameEvent::Hit { hit, stats } => info!(
                "Hit: score {} at ({:.0}, {:.0}), {} shot(s), avg {:.2}",
                hit.score,
                hit.target_point.x,
                hit.target_point.y,
                stats.shots_fired,
                stats.avg_score
            ),
            GameEvent::SessionFinished { summary } => info!(
                "Session finished: {} shot(s), total {}, avg {:.2}",
                summary.shots, summary.total, summary.avg
            ),
            GameEvent::Calibration { state, status } => info!("Calibration {}: {}", state, status),
            other => debug!("Event: {:?}", other),
        }
        // No subscribers is fine
        let _ = tx.send(event);
    }
}
