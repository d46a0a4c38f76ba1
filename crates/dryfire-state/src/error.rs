use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TargetError {
    #[error("target needs at least one ring")]
    NoRings,
    #[error("ring radius {0} is not a positive finite number")]
    BadRadius(f64),
    #[error("ring radii must be strictly ascending")]
    Unsorted,
    #[error("expected {expected} point values (one per ring plus the miss value), got {got}")]
    PointsMismatch { expected: usize, got: usize },
    #[error("target size {0}x{1} is not positive")]
    BadSize(f64, f64),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("shot goal must be at least 1")]
    ZeroGoal,
}
