//! Printed square fiducials: a dark one-cell border around a small binary
//! payload. Candidates come from the quad extractor; each is rectified
//! through its own homography and sampled on the cell grid.

use crate::Homography;
use dryfire_vision::{otsu_threshold, Quad};
use image::GrayImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarkerParams {
    /// Payload side length in cells.
    pub payload_bits: usize,
    /// Border width in cells.
    pub border_cells: usize,
    /// Required fraction of dark border cells.
    pub min_border_score: f32,
}

impl Default for MarkerParams {
    fn default() -> Self {
        Self {
            payload_bits: 4,
            border_cells: 1,
            min_border_score: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialMarker {
    pub corners: [Point2<f64>; 4],
    /// Payload bits, row-major from the first traced corner, dark = 1.
    pub code: u64,
    pub border_score: f32,
}

impl FiducialMarker {
    pub fn side_px(&self) -> f64 {
        Quad {
            corners: self.corners,
            area: 0.0,
        }
        .mean_side()
    }
}

/// Keep the quads that read as fiducials.
pub fn detect_markers(
    gray: &GrayImage,
    quads: &[Quad],
    params: &MarkerParams,
) -> Vec<FiducialMarker> {
    let markers: Vec<FiducialMarker> = quads
        .iter()
        .filter_map(|q| decode_quad(gray, q, params))
        .collect();
    debug!("{} of {} quad(s) decoded as markers", markers.len(), quads.len());
    markers
}

/// Sample the cell grid of one quad and check border and payload.
pub fn decode_quad(gray: &GrayImage, quad: &Quad, params: &MarkerParams) -> Option<FiducialMarker> {
    let bits = params.payload_bits;
    let border = params.border_cells;
    let cells = bits + 2 * border;
    if bits == 0 || bits * bits > 64 {
        return None;
    }

    let unit = [
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(1.0, 1.0),
        Point2::new(0.0, 1.0),
    ];
    let h = Homography::from_correspondences(&unit, &quad.corners).ok()?;

    let mut samples = Vec::with_capacity(cells * cells);
    for cy in 0..cells {
        for cx in 0..cells {
            let u = (cx as f64 + 0.5) / cells as f64;
            let v = (cy as f64 + 0.5) / cells as f64;
            let p = h.apply(Point2::new(u, v))?;
            samples.push(sample_mean_3x3(gray, p.x, p.y));
        }
    }

    let thr = otsu_threshold(&samples);
    let mut border_dark = 0u32;
    let mut border_total = 0u32;
    let mut light_payload = 0u32;
    let mut code = 0u64;

    for cy in 0..cells {
        for cx in 0..cells {
            let dark = samples[cy * cells + cx] <= thr;
            let on_border =
                cx < border || cy < border || cx >= cells - border || cy >= cells - border;
            if on_border {
                border_total += 1;
                border_dark += dark as u32;
            } else {
                let idx = (cy - border) * bits + (cx - border);
                if dark {
                    code |= 1u64 << idx;
                } else {
                    light_payload += 1;
                }
            }
        }
    }

    let border_score = if border_total == 0 {
        1.0
    } else {
        border_dark as f32 / border_total as f32
    };
    if border_score < params.min_border_score || light_payload == 0 {
        return None;
    }

    Some(FiducialMarker {
        corners: quad.corners,
        code,
        border_score,
    })
}

/// Mean of the 3x3 neighbourhood around the nearest pixel, clamped to the image.
fn sample_mean_3x3(gray: &GrayImage, x: f64, y: f64) -> u8 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0;
    }
    let cx = x.round() as i64;
    let cy = y.round() as i64;
    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let px = (cx + dx).clamp(0, w as i64 - 1) as u32;
            let py = (cy + dy).clamp(0, h as i64 - 1) as u32;
            sum += gray.get_pixel(px, py)[0] as u32;
        }
    }
    (sum / 9) as u8
}
