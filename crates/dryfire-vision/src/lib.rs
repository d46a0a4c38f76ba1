pub mod blob;
pub mod contour;
pub mod diff;
pub mod morphology;
pub mod segment;
pub mod threshold;

pub use blob::{connected_components, BlobDetection, BlobSelector, Component, ComponentLabels};
pub use contour::{find_quads, Quad, QuadParams};
pub use diff::TemporalDiffer;
pub use segment::{is_red_candidate, rgb_to_hsv, segment_red, Hsv};
pub use threshold::{adaptive_threshold_inv, otsu_threshold};

/// Single-channel binary raster: 255 marks a set pixel, 0 a clear one.
pub type Mask = image::GrayImage;
