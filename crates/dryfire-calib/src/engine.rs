use crate::fiducial::{detect_markers, MarkerParams};
use crate::homography::{extreme_corners, Homography};
use crate::manual::{ManualCalibration, TapProgress, CORNER_NAMES};
use crate::squares::{find_squares, SquareParams};
use crate::{CalibrationError, Projector, SharedHomography};
use dryfire_vision::{adaptive_threshold_inv, find_quads, QuadParams};
use image::GrayImage;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Uncalibrated,
    Calibrating,
    Calibrated,
    Reacquiring,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uncalibrated => "uncalibrated",
            Self::Calibrating => "calibrating",
            Self::Calibrated => "calibrated",
            Self::Reacquiring => "reacquiring",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    #[default]
    Manual,
    Auto,
}

/// Where the corners of an automatic calibration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CornerSource {
    Markers,
    Squares,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: CalibrationMode,
    pub target_width: f64,
    pub target_height: f64,
    /// Display-to-processing scale for taps.
    pub tap_scale: Vector2<f64>,
    /// Age after which a failed refresh moves to `Reacquiring`.
    pub stale_timeout: Duration,
    /// Consecutive failed ticks before the published homography is flagged stale.
    pub stale_after_ticks: u32,
    pub square_fallback: bool,
    pub min_markers: usize,
    pub threshold_radius: u32,
    pub threshold_c: i32,
    pub quad: QuadParams,
    pub marker: MarkerParams,
    pub square: SquareParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Manual,
            target_width: 900.0,
            target_height: 1200.0,
            tap_scale: Vector2::new(1.0, 1.0),
            stale_timeout: Duration::from_millis(2000),
            stale_after_ticks: 60,
            square_fallback: true,
            min_markers: 2,
            threshold_radius: 7,
            threshold_c: 7,
            quad: QuadParams::default(),
            marker: MarkerParams::default(),
            square: SquareParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not in automatic mode, or manual taps are being collected.
    Skipped,
    Refreshed { source: CornerSource, markers: usize },
    Missed { markers: usize },
}

/// Owns and publishes the camera-to-target homography.
///
/// The engine is the only writer of the watch channel; readers get a
/// [`Projector`]. A replaced homography is dropped once the last reader
/// releases its `Arc`.
pub struct CalibrationEngine {
    config: EngineConfig,
    state: CalibrationState,
    published: watch::Sender<SharedHomography>,
    manual: Option<ManualCalibration>,
    last_refresh: Option<Instant>,
    failed_ticks: u32,
    stale: bool,
    markers: usize,
    marker_px: Option<f64>,
    status: String,
}

impl CalibrationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            config,
            state: CalibrationState::Uncalibrated,
            published,
            manual: None,
            last_refresh: None,
            failed_ticks: 0,
            stale: false,
            markers: 0,
            marker_px: None,
            status: "uncalibrated".to_string(),
        }
    }

    pub fn projector(&self) -> Projector {
        Projector::new(self.published.subscribe())
    }

    pub fn subscribe(&self) -> watch::Receiver<SharedHomography> {
        self.published.subscribe()
    }

    pub fn mode(&self) -> CalibrationMode {
        self.config.mode
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn current(&self) -> SharedHomography {
        self.published.borrow().clone()
    }

    /// Age of the published homography.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_refresh.map(|t| now.saturating_duration_since(t))
    }

    /// Start collecting corner taps, discarding any published homography.
    pub fn begin_manual(&mut self) {
        self.discard();
        self.manual = Some(ManualCalibration::new(
            self.config.tap_scale,
            self.config.target_width,
            self.config.target_height,
        ));
        self.state = CalibrationState::Calibrating;
        self.status = format!("tap the {} corner (1/4)", CORNER_NAMES[0]);
        info!("Manual calibration started");
    }

    /// Feed one tap in display coordinates.
    pub fn tap(
        &mut self,
        display: Point2<f64>,
        now: Instant,
    ) -> Result<CalibrationState, CalibrationError> {
        let manual = self.manual.as_mut().ok_or(CalibrationError::NotCollecting)?;
        match manual.push(display) {
            Ok(TapProgress::Need { next }) => {
                let (tap_x, tap_y) = (display.x, display.y);
                debug!("Tap {}: ({:.1}, {:.1})", next, tap_x, tap_y);
                self.status = format!("tap the {} corner ({}/4)", CORNER_NAMES[next], next + 1);
                Ok(self.state)
            }
            Ok(TapProgress::Complete(h)) => {
                self.manual = None;
                self.publish(h, now);
                self.state = CalibrationState::Calibrated;
                self.status = "calibrated from taps".to_string();
                info!("Manual calibration complete");
                Ok(self.state)
            }
            Err(e) => {
                self.manual = None;
                self.state = CalibrationState::Uncalibrated;
                self.status = format!("calibration failed: {e}");
                warn!("Manual calibration failed: {}", e);
                Err(e)
            }
        }
    }

    /// Discard the published homography. Manual mode goes straight back to
    /// collecting taps; automatic mode reacquires on the next tick.
    pub fn recalibrate(&mut self) {
        info!("Recalibration requested");
        self.discard();
        self.state = CalibrationState::Uncalibrated;
        self.status = "uncalibrated".to_string();
        if self.config.mode == CalibrationMode::Manual {
            self.begin_manual();
        }
    }

    /// One automatic refresh attempt on a grayscale processing frame.
    pub fn tick(&mut self, gray: &GrayImage, now: Instant) -> TickOutcome {
        if self.config.mode != CalibrationMode::Auto
            || self.state == CalibrationState::Calibrating
        {
            return TickOutcome::Skipped;
        }

        let binary =
            adaptive_threshold_inv(gray, self.config.threshold_radius, self.config.threshold_c);
        let quads = find_quads(&binary, &self.config.quad);
        let markers = detect_markers(gray, &quads, &self.config.marker);
        self.markers = markers.len();
        self.marker_px = (!markers.is_empty())
            .then(|| markers.iter().map(|m| m.side_px()).sum::<f64>() / markers.len() as f64);

        let corners = if markers.len() >= self.config.min_markers {
            let pts: Vec<Point2<f64>> = markers.iter().flat_map(|m| m.corners).collect();
            Some((pts, CornerSource::Markers))
        } else if self.config.square_fallback {
            let squares = find_squares(&quads, &self.config.square);
            (!squares.is_empty()).then(|| {
                let pts: Vec<Point2<f64>> = squares.iter().flat_map(|q| q.corners).collect();
                (pts, CornerSource::Squares)
            })
        } else {
            None
        };

        let built = corners.and_then(|(pts, source)| {
            let quad = extreme_corners(&pts)?;
            let (w, h) = (self.config.target_width, self.config.target_height);
            match Homography::from_quad(&quad, w, h) {
                Ok(h) => Some((h, source)),
                Err(e) => {
                    debug!("Corner set from {:?} rejected: {}", source, e);
                    None
                }
            }
        });

        match built {
            Some((h, source)) => {
                self.publish(h, now);
                if self.state != CalibrationState::Calibrated {
                    info!("Calibrated from {:?} ({} marker(s))", source, self.markers);
                }
                self.state = CalibrationState::Calibrated;
                self.status = format!("{}, calibrated", self.marker_summary());
                TickOutcome::Refreshed {
                    source,
                    markers: self.markers,
                }
            }
            None => {
                self.record_miss(now);
                TickOutcome::Missed {
                    markers: self.markers,
                }
            }
        }
    }

    fn record_miss(&mut self, now: Instant) {
        self.failed_ticks = self.failed_ticks.saturating_add(1);

        if self.current().is_some() {
            let expired = self.age(now).map_or(true, |age| age > self.config.stale_timeout);
            if expired && self.state != CalibrationState::Reacquiring {
                info!("Calibration older than {:?}, reacquiring", self.config.stale_timeout);
                self.state = CalibrationState::Reacquiring;
            }
            if self.failed_ticks >= self.config.stale_after_ticks && !self.stale {
                warn!("No refresh for {} ticks, calibration is stale", self.failed_ticks);
                self.stale = true;
            }
        } else {
            self.state = CalibrationState::Uncalibrated;
        }

        let mut status = format!("{}, seeking ({})", self.marker_summary(), self.state);
        if self.stale {
            status.push_str(", stale");
        }
        self.status = status;
    }

    fn marker_summary(&self) -> String {
        match self.marker_px {
            Some(px) => format!("markers {}, ~{:.0}px", self.markers, px),
            None => format!("markers {}", self.markers),
        }
    }

    fn publish(&mut self, h: Homography, now: Instant) {
        self.published.send_replace(Some(Arc::new(h)));
        self.last_refresh = Some(now);
        self.failed_ticks = 0;
        self.stale = false;
    }

    fn discard(&mut self) {
        self.published.send_replace(None);
        self.manual = None;
        self.last_refresh = None;
        self.failed_ticks = 0;
        self.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiducial::tests::{draw_marker, white};
    use crate::homography::target_corners;
    use approx::assert_relative_eq;
    use image::Luma;

    fn auto_config(square_fallback: bool) -> EngineConfig {
        EngineConfig {
            mode: CalibrationMode::Auto,
            square_fallback,
            ..EngineConfig::default()
        }
    }

    /// Four markers, one near each corner of a 400x300 frame.
    fn marker_frame() -> GrayImage {
        let mut img = white(400, 300);
        draw_marker(&mut img, 20, 20, 8, [0b0001, 0b0110, 0b1000, 0b0000]);
        draw_marker(&mut img, 330, 20, 8, [0b1000, 0b0100, 0b0010, 0b0001]);
        draw_marker(&mut img, 330, 230, 8, [0b1111, 0b0000, 0b1010, 0b0101]);
        draw_marker(&mut img, 20, 230, 8, [0b0011, 0b0011, 0b1100, 0b1100]);
        img
    }

    fn square_frame() -> GrayImage {
        let mut img = white(400, 300);
        for (x0, y0) in [(20, 20), (330, 20), (330, 230), (20, 230)] {
            for y in y0..y0 + 40 {
                for x in x0..x0 + 40 {
                    img.put_pixel(x, y, Luma([15]));
                }
            }
        }
        img
    }

    const PAYLOADS: [[u8; 4]; 4] = [
        [0b0001, 0b0110, 0b1000, 0b0000],
        [0b1000, 0b0100, 0b0010, 0b0001],
        [0b1111, 0b0000, 0b1010, 0b0101],
        [0b0011, 0b0011, 0b1100, 0b1100],
    ];

    /// Rotate `img` by `deg` about its centre, nearest neighbour, white fill.
    fn roll(img: &GrayImage, deg: f64) -> GrayImage {
        let (w, h) = img.dimensions();
        let (sin, cos) = deg.to_radians().sin_cos();
        let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
        GrayImage::from_fn(w, h, |x, y| {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            let u = (cx + dx * cos + dy * sin).round();
            let v = (cy - dx * sin + dy * cos).round();
            if u < 0.0 || v < 0.0 || u >= w as f64 || v >= h as f64 {
                Luma([235])
            } else {
                *img.get_pixel(u as u32, v as u32)
            }
        })
    }

    fn rolled_point(p: Point2<f64>, w: u32, h: u32, deg: f64) -> Point2<f64> {
        let (sin, cos) = deg.to_radians().sin_cos();
        let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
        let (dx, dy) = (p.x - cx, p.y - cy);
        Point2::new(cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
    }

    /// 48 px markers with their top-left pixels at `origins` on a 480x360 frame.
    fn layout_frame(origins: &[(u32, u32)]) -> GrayImage {
        let mut img = white(480, 360);
        for (&(x0, y0), payload) in origins.iter().zip(PAYLOADS) {
            draw_marker(&mut img, x0, y0, 8, payload);
        }
        img
    }

    /// Maps the target corners back into the frame and returns the worst
    /// distance to `expected` (TL, TR, BR, BL).
    fn worst_corner_error(engine: &CalibrationEngine, expected: [Point2<f64>; 4]) -> f64 {
        let inv = engine.current().unwrap().inverse().unwrap();
        target_corners(900.0, 1200.0)
            .iter()
            .zip(expected)
            .map(|(t, e)| (inv.apply(*t).unwrap() - e).norm())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_manual_identity() {
        let mut engine = CalibrationEngine::new(EngineConfig::default());
        let projector = engine.projector();
        let now = Instant::now();
        engine.begin_manual();
        assert_eq!(engine.state(), CalibrationState::Calibrating);

        for (x, y) in [(0.0, 0.0), (900.0, 0.0), (900.0, 1200.0)] {
            assert_eq!(engine.tap(Point2::new(x, y), now), Ok(CalibrationState::Calibrating));
        }
        assert_eq!(engine.tap(Point2::new(0.0, 1200.0), now), Ok(CalibrationState::Calibrated));

        let p = projector.project(Point2::new(0.0, 0.0)).unwrap();
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-6);
        let p = projector.project(Point2::new(900.0, 1200.0)).unwrap();
        assert_relative_eq!(p.x, 900.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1200.0, epsilon = 1e-6);
    }

    #[test]
    fn test_manual_bad_geometry_returns_to_uncalibrated() {
        let mut engine = CalibrationEngine::new(EngineConfig::default());
        let now = Instant::now();
        engine.begin_manual();
        for (x, y) in [(0.0, 0.0), (900.0, 0.0), (0.0, 1200.0)] {
            engine.tap(Point2::new(x, y), now).unwrap();
        }
        assert_eq!(
            engine.tap(Point2::new(900.0, 1200.0), now),
            Err(CalibrationError::NotConvex)
        );
        assert_eq!(engine.state(), CalibrationState::Uncalibrated);
        assert!(engine.current().is_none());
        assert!(engine.status().starts_with("calibration failed"));
        assert_eq!(
            engine.tap(Point2::new(1.0, 1.0), now),
            Err(CalibrationError::NotCollecting)
        );
    }

    #[test]
    fn test_begin_manual_discards_previous() {
        let mut engine = CalibrationEngine::new(EngineConfig::default());
        let now = Instant::now();
        engine.begin_manual();
        for (x, y) in [(0.0, 0.0), (900.0, 0.0), (900.0, 1200.0), (0.0, 1200.0)] {
            engine.tap(Point2::new(x, y), now).unwrap();
        }
        assert!(engine.current().is_some());
        engine.recalibrate();
        assert!(engine.current().is_none());
        assert_eq!(engine.state(), CalibrationState::Calibrating);
    }

    #[test]
    fn test_auto_markers() {
        let mut engine = CalibrationEngine::new(auto_config(false));
        let outcome = engine.tick(&marker_frame(), Instant::now());
        assert_eq!(
            outcome,
            TickOutcome::Refreshed {
                source: CornerSource::Markers,
                markers: 4
            }
        );
        assert_eq!(engine.state(), CalibrationState::Calibrated);
        assert!(engine.status().starts_with("markers 4, ~"));

        let projector = engine.projector();
        let tl = projector.project(Point2::new(20.0, 20.0)).unwrap();
        assert_relative_eq!(tl.x, 0.0, epsilon = 0.5);
        assert_relative_eq!(tl.y, 0.0, epsilon = 0.5);
        let br = projector.project(Point2::new(377.0, 277.0)).unwrap();
        assert_relative_eq!(br.x, 900.0, epsilon = 0.5);
        assert_relative_eq!(br.y, 1200.0, epsilon = 0.5);
    }

    #[test]
    fn test_auto_markers_under_roll() {
        let origins = [(50, 50), (382, 50), (382, 262), (50, 262)];
        let flat = layout_frame(&origins);
        let outer = [(50.0, 50.0), (429.0, 50.0), (429.0, 309.0), (50.0, 309.0)]
            .map(|(x, y)| Point2::new(x, y));

        for deg in [-5.0, -3.0, 3.0, 5.0] {
            let mut engine = CalibrationEngine::new(auto_config(false));
            let outcome = engine.tick(&roll(&flat, deg), Instant::now());
            assert_eq!(
                outcome,
                TickOutcome::Refreshed {
                    source: CornerSource::Markers,
                    markers: 4
                },
                "roll {deg}"
            );
            let expected = outer.map(|p| rolled_point(p, 480, 360, deg));
            let worst = worst_corner_error(&engine, expected);
            assert!(worst < 3.0, "roll {deg}: worst corner error {worst:.1}px");
        }
    }

    #[test]
    fn test_two_markers_are_enough() {
        // Diagonal pair: the extremes give the outer corners of both markers
        let frame = layout_frame(&[(50, 50), (382, 262)]);
        let mut engine = CalibrationEngine::new(auto_config(false));
        assert_eq!(
            engine.tick(&frame, Instant::now()),
            TickOutcome::Refreshed {
                source: CornerSource::Markers,
                markers: 2
            }
        );
        let projector = engine.projector();
        let tl = projector.project(Point2::new(50.0, 50.0)).unwrap();
        assert_relative_eq!(tl.x, 0.0, epsilon = 0.5);
        assert_relative_eq!(tl.y, 0.0, epsilon = 0.5);
        let br = projector.project(Point2::new(429.0, 309.0)).unwrap();
        assert_relative_eq!(br.x, 900.0, epsilon = 0.5);
        assert_relative_eq!(br.y, 1200.0, epsilon = 0.5);

        let rolled = roll(&frame, 4.0);
        let mut engine = CalibrationEngine::new(auto_config(false));
        assert!(matches!(
            engine.tick(&rolled, Instant::now()),
            TickOutcome::Refreshed { markers: 2, .. }
        ));
        let inv = engine.current().unwrap().inverse().unwrap();
        let tl = inv.apply(Point2::new(0.0, 0.0)).unwrap();
        let br = inv.apply(Point2::new(900.0, 1200.0)).unwrap();
        assert!((tl - rolled_point(Point2::new(50.0, 50.0), 480, 360, 4.0)).norm() < 3.0);
        assert!((br - rolled_point(Point2::new(429.0, 309.0), 480, 360, 4.0)).norm() < 3.0);
    }

    #[test]
    fn test_one_marker_is_not_enough() {
        let frame = layout_frame(&[(50, 50)]);
        let mut engine = CalibrationEngine::new(auto_config(false));
        assert_eq!(
            engine.tick(&frame, Instant::now()),
            TickOutcome::Missed { markers: 1 }
        );
        assert!(engine.current().is_none());
    }

    #[test]
    fn test_auto_square_fallback() {
        let mut engine = CalibrationEngine::new(auto_config(true));
        let outcome = engine.tick(&square_frame(), Instant::now());
        assert_eq!(
            outcome,
            TickOutcome::Refreshed {
                source: CornerSource::Squares,
                markers: 0
            }
        );
        assert!(engine.current().is_some());

        let mut strict = CalibrationEngine::new(auto_config(false));
        assert_eq!(
            strict.tick(&square_frame(), Instant::now()),
            TickOutcome::Missed { markers: 0 }
        );
        assert!(strict.current().is_none());
        assert_eq!(strict.state(), CalibrationState::Uncalibrated);
    }

    #[test]
    fn test_lost_markers_keep_homography() {
        let mut engine = CalibrationEngine::new(auto_config(false));
        let t0 = Instant::now();
        engine.tick(&marker_frame(), t0);
        let before = engine.current().unwrap();

        let blank = white(400, 300);
        let outcome = engine.tick(&blank, t0 + Duration::from_millis(60));
        assert_eq!(outcome, TickOutcome::Missed { markers: 0 });
        let after = engine.current().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(engine.status().contains("seeking"));
        assert_eq!(engine.state(), CalibrationState::Calibrated);

        engine.tick(&blank, t0 + Duration::from_millis(2100));
        assert_eq!(engine.state(), CalibrationState::Reacquiring);
        assert!(!engine.is_stale());

        for i in 0..60u64 {
            engine.tick(&blank, t0 + Duration::from_millis(2200 + i * 60));
        }
        assert!(engine.is_stale());
        assert!(engine.status().ends_with("stale"));
        assert!(engine.current().is_some());

        // A good frame clears everything
        engine.tick(&marker_frame(), t0 + Duration::from_secs(10));
        assert_eq!(engine.state(), CalibrationState::Calibrated);
        assert!(!engine.is_stale());
    }

    #[test]
    fn test_tick_skipped_in_manual_mode() {
        let mut engine = CalibrationEngine::new(EngineConfig::default());
        assert_eq!(engine.tick(&marker_frame(), Instant::now()), TickOutcome::Skipped);
    }
}
