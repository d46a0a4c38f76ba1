use dryfire_vision::Quad;
use serde::{Deserialize, Serialize};

/// Fallback when too few fiducials are visible: plain dark squares at the
/// target corners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SquareParams {
    pub min_aspect: f64,
    pub max_aspect: f64,
    /// Squares needed for a calibration.
    pub count: usize,
}

impl Default for SquareParams {
    fn default() -> Self {
        Self {
            min_aspect: 0.6,
            max_aspect: 1.4,
            count: 4,
        }
    }
}

/// The `count` largest roughly-square quads, or nothing if fewer qualify.
/// `quads` must be sorted largest first, as `find_quads` returns them.
pub fn find_squares(quads: &[Quad], params: &SquareParams) -> Vec<Quad> {
    let squares: Vec<Quad> = quads
        .iter()
        .filter(|q| {
            let ar = q.aspect_ratio();
            ar >= params.min_aspect && ar <= params.max_aspect
        })
        .take(params.count)
        .copied()
        .collect();
    if squares.len() < params.count {
        return Vec::new();
    }
    squares
}
