use crate::{CalibrationError, Homography, SharedHomography};
use nalgebra::Point2;
use std::sync::Arc;
use tokio::sync::watch;

/// Read side of the published homography.
#[derive(Debug, Clone)]
pub struct Projector {
    rx: watch::Receiver<SharedHomography>,
}

impl Projector {
    pub fn new(rx: watch::Receiver<SharedHomography>) -> Self {
        Self { rx }
    }

    /// Snapshot of the published homography.
    pub fn current(&self) -> Option<Arc<Homography>> {
        self.rx.borrow().clone()
    }

    pub fn is_calibrated(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Map a camera-space point onto the target plane.
    pub fn project(&self, p: Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        let h = self.current().ok_or(CalibrationError::NotCalibrated)?;
        h.apply(p).ok_or(CalibrationError::PointAtInfinity)
    }
}
