use dryfire_calib::{CalibrationError, Projector};
use dryfire_capture::to_processing_frame;
use dryfire_state::{RemoteStatus, ScoreEngine, ScoreOutcome, SessionError, Target};
use dryfire_vision::{segment_red, BlobDetection, BlobSelector, TemporalDiffer};
use image::RgbaImage;
use nalgebra::Point2;
use std::time::{Duration, Instant};
use tracing::debug;

/// What one processed frame produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// No new flash in this frame.
    Nothing,
    /// A flash that could not be mapped onto the target.
    Unprojected(BlobDetection, CalibrationError),
    /// A flash inside the debounce window of the last accepted hit.
    Debounced(BlobDetection),
    /// A mapped flash while no session is running.
    NotScored {
        detection: BlobDetection,
        target_point: Point2<f64>,
    },
    Hit(ScoreOutcome),
}

/// Per-frame hit detection and scoring: segment, diff, select, project,
/// debounce, score.
pub struct GameLoop {
    processing: (u32, u32),
    selector: BlobSelector,
    differ: TemporalDiffer,
    projector: Projector,
    scorer: ScoreEngine,
    debounce: Duration,
    last_hit: Option<Instant>,
    session_start: Option<Instant>,
}

impl GameLoop {
    pub fn new(
        processing: (u32, u32),
        selector: BlobSelector,
        projector: Projector,
        target: Target,
        debounce: Duration,
    ) -> Self {
        Self {
            processing,
            selector,
            differ: TemporalDiffer::new(),
            projector,
            scorer: ScoreEngine::new(target),
            debounce,
            last_hit: None,
            session_start: None,
        }
    }

    pub fn scorer(&self) -> &ScoreEngine {
        &self.scorer
    }

    pub fn remote_status(&self) -> RemoteStatus {
        RemoteStatus::from(&self.scorer)
    }

    pub fn start_session(&mut self, goal: u32, now: Instant) -> Result<(), SessionError> {
        self.scorer.start(goal)?;
        self.session_start = Some(now);
        self.last_hit = None;
        Ok(())
    }

    pub fn stop_session(&mut self) {
        self.scorer.stop();
        self.session_start = None;
        self.last_hit = None;
    }

    pub fn process_frame(&mut self, frame: &RgbaImage, now: Instant) -> FrameOutcome {
        let (w, h) = self.processing;
        let frame = to_processing_frame(frame, w, h);
        let mask = segment_red(frame.as_ref());

        let diff = self.differ.update(mask);
        let Some(detection) = diff.and_then(|d| self.selector.select(&d)) else {
            return FrameOutcome::Nothing;
        };

        let target_point = match self.projector.project(detection.centroid) {
            Ok(p) => p,
            Err(e) => {
                debug!(
                    "Flash at ({:.1}, {:.1}) not projected: {}",
                    detection.centroid.x, detection.centroid.y, e
                );
                return FrameOutcome::Unprojected(detection, e);
            }
        };

        if let Some(last) = self.last_hit {
            if now.saturating_duration_since(last) < self.debounce {
                debug!("Flash dropped inside debounce window");
                return FrameOutcome::Debounced(detection);
            }
        }

        let timestamp_ms = self
            .session_start
            .map_or(0, |s| now.saturating_duration_since(s).as_millis() as u64);
        match self.scorer.record(target_point, timestamp_ms) {
            Some(outcome) => {
                self.last_hit = Some(now);
                FrameOutcome::Hit(outcome)
            }
            None => FrameOutcome::NotScored {
                detection,
                target_point,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dryfire_calib::{CalibrationEngine, EngineConfig};
    use image::Rgba;

    pub(crate) const W: u32 = 90;
    pub(crate) const H: u32 = 120;

    pub(crate) fn blank() -> RgbaImage {
        RgbaImage::from_pixel(W, H, Rgba([40, 40, 40, 255]))
    }

    /// Blank frame with a 5x5 red dot centred on `(cx, cy)`.
    pub(crate) fn dot(cx: u32, cy: u32) -> RgbaImage {
        let mut img = blank();
        for y in cy - 2..=cy + 2 {
            for x in cx - 2..=cx + 2 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        img
    }

    /// Processing frame corners tapped onto a 900x1200 target: ten target
    /// units per pixel.
    fn calibrated() -> (CalibrationEngine, Projector) {
        let mut engine = CalibrationEngine::new(EngineConfig::default());
        let now = Instant::now();
        engine.begin_manual();
        for (x, y) in [(0.0, 0.0), (90.0, 0.0), (90.0, 120.0), (0.0, 120.0)] {
            engine.tap(Point2::new(x, y), now).unwrap();
        }
        let projector = engine.projector();
        (engine, projector)
    }

    fn game(projector: Projector) -> GameLoop {
        GameLoop::new(
            (W, H),
            BlobSelector::new(12, 8),
            projector,
            Target::default(),
            Duration::from_millis(120),
        )
    }

    fn hits(outcomes: &[FrameOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|o| matches!(o, FrameOutcome::Hit(_)))
            .count()
    }

    fn run_dots(gap: Duration) -> Vec<FrameOutcome> {
        let (_engine, projector) = calibrated();
        let mut game = game(projector);
        let t0 = Instant::now();
        game.start_session(10, t0).unwrap();
        vec![
            game.process_frame(&blank(), t0),
            game.process_frame(&dot(45, 60), t0 + Duration::from_millis(10)),
            game.process_frame(&blank(), t0 + Duration::from_millis(10) + gap / 2),
            game.process_frame(&dot(45, 60), t0 + Duration::from_millis(10) + gap),
        ]
    }

    #[test]
    fn test_debounce_drops_close_flashes() {
        let outcomes = run_dots(Duration::from_millis(50));
        assert_eq!(hits(&outcomes), 1);
        assert!(matches!(outcomes[3], FrameOutcome::Debounced(_)));
    }

    #[test]
    fn test_separate_flashes_both_score() {
        let outcomes = run_dots(Duration::from_millis(150));
        assert_eq!(hits(&outcomes), 2);
    }

    #[test]
    fn test_three_shot_game() {
        let (_engine, projector) = calibrated();
        let mut game = game(projector);
        let t0 = Instant::now();
        game.start_session(3, t0).unwrap();

        let ms = |n: u64| t0 + Duration::from_millis(n);
        let frames = [
            (blank(), ms(0)),
            (dot(50, 60), ms(100)),  // distance 50
            (blank(), ms(200)),
            (dot(60, 60), ms(300)),  // distance 150
            (blank(), ms(400)),
            (dot(45, 110), ms(500)), // distance 500
            (blank(), ms(600)),
            (dot(45, 60), ms(700)),  // after the goal
        ];

        let mut scores = Vec::new();
        let mut summaries = Vec::new();
        for (frame, at) in &frames {
            if let FrameOutcome::Hit(outcome) = game.process_frame(frame, *at) {
                scores.push(outcome.hit.score);
                summaries.extend(outcome.summary);
            }
        }

        assert_eq!(scores, vec![10, 9, 6]);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total, 25);
        assert!((summaries[0].avg - 8.33).abs() < 0.01);

        let stats = game.scorer().stats();
        assert_eq!(stats.shots_fired, 3);
        assert_eq!(stats.total_score, 25);
        assert!(!game.remote_status().running);
    }

    #[test]
    fn test_steady_red_is_not_a_hit() {
        let (_engine, projector) = calibrated();
        let mut game = game(projector);
        let t0 = Instant::now();
        game.start_session(5, t0).unwrap();
        let frame = dot(30, 30);
        let first = game.process_frame(&frame, t0);
        // First frame has no history
        assert_eq!(first, FrameOutcome::Nothing);
        for i in 1..5 {
            let outcome = game.process_frame(&frame, t0 + Duration::from_millis(200 * i));
            assert_eq!(outcome, FrameOutcome::Nothing);
        }
    }

    #[test]
    fn test_uncalibrated_flash_is_not_scored() {
        let (_tx, rx) = tokio::sync::watch::channel(None);
        let mut game = game(Projector::new(rx));
        let t0 = Instant::now();
        game.start_session(3, t0).unwrap();
        game.process_frame(&blank(), t0);
        let outcome = game.process_frame(&dot(45, 60), t0 + Duration::from_millis(30));
        assert!(matches!(
            outcome,
            FrameOutcome::Unprojected(_, CalibrationError::NotCalibrated)
        ));
        assert_eq!(game.scorer().stats().shots_fired, 0);
    }

    #[test]
    fn test_hit_timestamp_and_idle_session() {
        let (_engine, projector) = calibrated();
        let mut game = game(projector);
        let t0 = Instant::now();
        game.process_frame(&blank(), t0);
        let outcome = game.process_frame(&dot(45, 60), t0);
        assert!(matches!(outcome, FrameOutcome::NotScored { .. }));

        game.start_session(3, t0).unwrap();
        game.process_frame(&blank(), t0 + Duration::from_millis(100));
        let at = t0 + Duration::from_millis(250);
        let FrameOutcome::Hit(outcome) = game.process_frame(&dot(45, 60), at) else {
            panic!("expected a hit");
        };
        assert_eq!(outcome.hit.timestamp_ms, 250);
    }

    #[test]
    fn test_processing_resize() {
        let (_engine, projector) = calibrated();
        let mut game = game(projector);
        let big = RgbaImage::from_pixel(W * 2, H * 2, Rgba([40, 40, 40, 255]));
        game.process_frame(&big, Instant::now());
        assert_eq!(game.differ.history_dimensions(), Some((W, H)));
    }
}
