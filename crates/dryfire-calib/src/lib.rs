//! Camera-to-target calibration: homography estimation from user taps or
//! printed fiducials, the calibration state machine, and the projector that
//! maps detected hits onto the target plane.

pub mod engine;
pub mod error;
pub mod fiducial;
pub mod homography;
pub mod manual;
pub mod projector;
pub mod squares;

pub use engine::{
    CalibrationEngine, CalibrationMode, CalibrationState, CornerSource, EngineConfig, TickOutcome,
};
pub use error::CalibrationError;
pub use fiducial::{detect_markers, FiducialMarker, MarkerParams};
pub use homography::{extreme_corners, target_corners, Homography};
pub use manual::{ManualCalibration, TapProgress, CORNER_NAMES};
pub use projector::Projector;
pub use squares::{find_squares, SquareParams};

use std::sync::Arc;

/// Value held in the published-homography watch channel.
pub type SharedHomography = Option<Arc<Homography>>;
