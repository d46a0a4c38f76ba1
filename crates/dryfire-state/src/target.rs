use crate::TargetError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Virtual target plane with concentric scoring rings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    width: f64,
    height: f64,
    center: Point2<f64>,
    /// Ascending ring radii in target units.
    rings: Vec<f64>,
    /// One value per ring, then the value for anything outside the last ring.
    points: Vec<i32>,
}

impl Target {
    pub fn new(
        width: f64,
        height: f64,
        center: Point2<f64>,
        rings: Vec<f64>,
        points: Vec<i32>,
    ) -> Result<Self, TargetError> {
        if !(width > 0.0 && height > 0.0) {
            return Err(TargetError::BadSize(width, height));
        }
        if rings.is_empty() {
            return Err(TargetError::NoRings);
        }
        if let Some(&r) = rings.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
            return Err(TargetError::BadRadius(r));
        }
        if rings.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TargetError::Unsorted);
        }
        if points.len() != rings.len() + 1 {
            return Err(TargetError::PointsMismatch {
                expected: rings.len() + 1,
                got: points.len(),
            });
        }
        Ok(Self {
            width,
            height,
            center,
            rings,
            points,
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn center(&self) -> Point2<f64> {
        self.center
    }

    pub fn rings(&self) -> &[f64] {
        &self.rings
    }

    /// Value of the innermost ring whose radius reaches `p`; the miss value
    /// beyond the last ring. A point exactly on a ring scores that ring.
    pub fn score(&self, p: Point2<f64>) -> i32 {
        let d = nalgebra::distance(&self.center, &p);
        self.rings
            .iter()
            .position(|&r| d <= r)
            .map_or(self.points[self.rings.len()], |i| self.points[i])
    }
}

impl Default for Target {
    fn default() -> Self {
        Self {
            width: 900.0,
            height: 1200.0,
            center: Point2::new(450.0, 600.0),
            rings: vec![120.0, 220.0, 320.0, 420.0],
            points: vec![10, 9, 8, 7, 6],
        }
    }
}
