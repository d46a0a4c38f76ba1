use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration published")]
    NotCalibrated,
    #[error("degenerate corner geometry: {0}")]
    Degenerate(&'static str),
    #[error("corners do not form a convex quadrilateral (taps out of TL, TR, BR, BL order?)")]
    NotConvex,
    #[error("homography is singular")]
    Singular,
    #[error("point maps to infinity")]
    PointAtInfinity,
    #[error("expected 4 corner taps, got {0}")]
    WrongTapCount(usize),
    #[error("not collecting calibration taps")]
    NotCollecting,
}
