use crate::{CalibrationError, Homography};
use nalgebra::{Point2, Vector2};

pub const CORNER_NAMES: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];

/// Result of feeding one tap to a [`ManualCalibration`].
#[derive(Debug, Clone, PartialEq)]
pub enum TapProgress {
    /// More taps are needed; `next` is the index of the corner to tap.
    Need { next: usize },
    Complete(Homography),
}

/// Collects exactly four corner taps, in TL, TR, BR, BL order, and builds the
/// camera-to-target homography from them. Taps are never reordered.
#[derive(Debug, Clone)]
pub struct ManualCalibration {
    taps: Vec<Point2<f64>>,
    /// Display-to-processing scale applied to every tap.
    scale: Vector2<f64>,
    target_width: f64,
    target_height: f64,
}

impl ManualCalibration {
    pub fn new(scale: Vector2<f64>, target_width: f64, target_height: f64) -> Self {
        Self {
            taps: Vec::with_capacity(4),
            scale,
            target_width,
            target_height,
        }
    }

    pub fn taps(&self) -> &[Point2<f64>] {
        &self.taps
    }

    /// Record one tap given in display pixels. The fourth tap consumes the
    /// collected set: the homography is returned, or an error when the corners
    /// are degenerate or not convex in tap order.
    pub fn push(&mut self, display: Point2<f64>) -> Result<TapProgress, CalibrationError> {
        let p = Point2::new(display.x * self.scale.x, display.y * self.scale.y);
        self.taps.push(p);
        if self.taps.len() < 4 {
            return Ok(TapProgress::Need {
                next: self.taps.len(),
            });
        }

        let taps = std::mem::take(&mut self.taps);
        let corners: [Point2<f64>; 4] = taps
            .try_into()
            .map_err(|t: Vec<Point2<f64>>| CalibrationError::WrongTapCount(t.len()))?;
        Homography::from_quad(&corners, self.target_width, self.target_height)
            .map(TapProgress::Complete)
    }
}
