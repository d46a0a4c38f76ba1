use crate::pipeline::{CalibrationCommand, GameEvent, Pipeline};
use anyhow::{anyhow, bail, Context, Result};
use dryfire_calib::CalibrationState;
use dryfire_capture::FrameSource;
use dryfire_config::Settings;
use dryfire_state::{RemoteStatus, SessionPhase, StartCommand};
use nalgebra::Point2;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};

pub struct PipelineState(pub Mutex<Option<Pipeline>>);

impl PipelineState {
    pub fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Pipeline>>> {
        self.0.lock().map_err(|e| anyhow!("Pipeline state poisoned: {}", e))
    }

    fn with<T>(&self, f: impl FnOnce(&Pipeline) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        match &*guard {
            Some(p) => f(p),
            None => bail!("Pipeline is not running"),
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the pipeline on `source`. A running pipeline is left alone.
pub fn start_pipeline<S>(state: &PipelineState, settings: Settings, source: S) -> Result<()>
where
    S: FrameSource + Send + 'static,
{
    let mut pipeline = state.lock()?;
    if pipeline.is_some() {
        return Ok(());
    }
    tracing::info!("Frame source: {}", source.describe());
    *pipeline = Some(Pipeline::start(settings, source)?);
    Ok(())
}

pub fn stop_pipeline(state: &PipelineState) -> Result<()> {
    let mut pipeline = state.lock()?;
    if let Some(p) = pipeline.take() {
        p.stop();
    }
    Ok(())
}

pub fn start_game(state: &PipelineState, cmd: StartCommand) -> Result<()> {
    let goal = cmd.validate()?;
    state.with(|p| p.start_game(goal))
}

pub fn stop_game(state: &PipelineState) -> Result<()> {
    state.with(|p| p.stop_game())
}

/// Begin collecting corner taps.
pub fn calibrate(state: &PipelineState) -> Result<()> {
    state.with(|p| p.send_calibration(CalibrationCommand::BeginManual))
}

/// Send one corner tap in display coordinates and wait for the engine's answer.
pub async fn tap(state: &PipelineState, x: f64, y: f64) -> Result<CalibrationState> {
    let tx = state.with(|p| Ok(p.calibration_commands()))?;
    let (reply, rx) = oneshot::channel();
    tx.send(CalibrationCommand::Tap {
        point: Point2::new(x, y),
        reply,
    })
    .map_err(|_| anyhow!("Calibration task has stopped"))?;
    let state = rx.await.context("Calibration task dropped the tap")??;
    Ok(state)
}

pub fn recalibrate(state: &PipelineState) -> Result<()> {
    state.with(|p| p.send_calibration(CalibrationCommand::Recalibrate))
}

pub fn subscribe(state: &PipelineState) -> Result<broadcast::Receiver<GameEvent>> {
    state.with(|p| Ok(p.subscribe()))
}

/// Session status in the remote-control shape. Idle when nothing runs.
pub fn get_status(state: &PipelineState) -> Result<serde_json::Value> {
    let pipeline = state.lock()?;
    let status = match &*pipeline {
        Some(p) => p.snapshot().status,
        None => RemoteStatus {
            running: false,
            status: SessionPhase::Idle,
            shots: 0,
            shots_goal: 0,
            last_score: None,
            total_score: 0,
            avg_score: 0.0,
        },
    };
    Ok(serde_json::to_value(status)?)
}

pub fn get_capture_status(state: &PipelineState) -> Result<serde_json::Value> {
    let pipeline = state.lock()?;
    match &*pipeline {
        Some(p) => Ok(serde_json::to_value(p.capture_status())?),
        None => Ok(serde_json::json!({
            "is_capturing": false,
            "source": null,
            "fps": 0.0,
            "frames_delivered": 0,
            "last_capture_time": null,
            "resolution": null,
        })),
    }
}

pub fn get_calibration(state: &PipelineState) -> Result<serde_json::Value> {
    let pipeline = state.lock()?;
    match &*pipeline {
        Some(p) => Ok(serde_json::to_value(p.calibration())?),
        None => Ok(serde_json::json!(null)),
    }
}

/// Save the current frame and intermediate masks for debugging.
/// Returns the path to the debug directory.
pub fn save_debug_frame(state: &PipelineState) -> Result<Option<String>> {
    let pipeline = state.lock()?;
    Ok(pipeline
        .as_ref()
        .and_then(|p| p.save_debug_frame())
        .map(|p| p.to_string_lossy().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_loop::tests::{blank, H, W};
    use image::RgbaImage;

    struct Blank {
        remaining: usize,
    }

    impl FrameSource for Blank {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(blank()))
        }

        fn describe(&self) -> String {
            "blank".to_string()
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.processing.width = W;
        settings.processing.height = H;
        // Display at twice the processing size
        settings.display.width = W * 2;
        settings.display.height = H * 2;
        settings
    }

    #[test]
    fn test_idle_status_without_pipeline() {
        let state = PipelineState::new();
        let status = get_status(&state).unwrap();
        assert_eq!(status["status"], "idle");
        assert_eq!(status["running"], false);
        assert!(start_game(&state, StartCommand { shots: 3 }).is_err());
        assert_eq!(get_calibration(&state).unwrap(), serde_json::Value::Null);
        assert_eq!(save_debug_frame(&state).unwrap(), None);
    }

    #[tokio::test]
    async fn test_game_commands() {
        let state = PipelineState::new();
        start_pipeline(&state, settings(), Blank { remaining: 200 }).unwrap();

        assert!(start_game(&state, StartCommand { shots: 0 }).is_err());
        start_game(&state, StartCommand { shots: 4 }).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let status = get_status(&state).unwrap();
        assert_eq!(status["running"], true);
        assert_eq!(status["shots_goal"], 4);

        stop_game(&state).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let status = get_status(&state).unwrap();
        assert_eq!(status["status"], "idle");
        assert_eq!(status["shots"], 0);

        stop_pipeline(&state).unwrap();
        assert!(stop_game(&state).is_err());
    }

    #[tokio::test]
    async fn test_taps_use_display_scale() {
        let state = PipelineState::new();
        start_pipeline(&state, settings(), Blank { remaining: 200 }).unwrap();

        assert!(tap(&state, 1.0, 1.0).await.is_err());
        calibrate(&state).unwrap();
        let (dw, dh) = ((W * 2) as f64, (H * 2) as f64);
        assert_eq!(tap(&state, 0.0, 0.0).await.unwrap(), CalibrationState::Calibrating);
        assert_eq!(tap(&state, dw, 0.0).await.unwrap(), CalibrationState::Calibrating);
        assert_eq!(tap(&state, dw, dh).await.unwrap(), CalibrationState::Calibrating);
        assert_eq!(tap(&state, 0.0, dh).await.unwrap(), CalibrationState::Calibrated);

        let h = state.with(|p| Ok(p.homography())).unwrap().unwrap();
        // Processing-frame corner maps to the target corner
        let p = h.apply(Point2::new(W as f64, H as f64)).unwrap();
        assert!((p.x - 900.0).abs() < 1e-6);
        assert!((p.y - 1200.0).abs() < 1e-6);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let report = get_calibration(&state).unwrap();
        assert_eq!(report["state"], "calibrated");

        stop_pipeline(&state).unwrap();
    }
}
