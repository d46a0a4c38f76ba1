use crate::Mask;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[rustfmt::skip]
const NEIGHBORS_8: [(i32, i32); 8] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0),           (1, 0),
    (-1, 1),  (0, 1),  (1, 1),
];

/// One 8-connected set of foreground pixels with its first moments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub label: u32,
    pub area: usize,
    pub sum_x: u64,
    pub sum_y: u64,
    /// First pixel met in raster order; always on the outer border.
    pub first: (u32, u32),
    pub min: (u32, u32),
    pub max: (u32, u32),
}

impl Component {
    /// First-moment centroid, `None` for a degenerate empty component.
    pub fn centroid(&self) -> Option<Point2<f64>> {
        if self.area == 0 {
            return None;
        }
        let n = self.area as f64;
        Some(Point2::new(self.sum_x as f64 / n, self.sum_y as f64 / n))
    }

    pub fn width(&self) -> u32 {
        self.max.0 - self.min.0 + 1
    }

    pub fn height(&self) -> u32 {
        self.max.1 - self.min.1 + 1
    }
}

/// Per-pixel component labels (0 = background) plus the component table.
/// Components are numbered from 1 in raster order of their first pixel.
#[derive(Debug, Clone)]
pub struct ComponentLabels {
    pub width: u32,
    pub height: u32,
    pub labels: Vec<u32>,
    pub components: Vec<Component>,
}

impl ComponentLabels {
    #[inline]
    pub fn label_at(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.labels[(y as u32 * self.width + x as u32) as usize]
    }
}

/// Label the 8-connected foreground components of a mask.
pub fn connected_components(mask: &Mask) -> ComponentLabels {
    let (w, h) = mask.dimensions();
    let mut labels = vec![0u32; (w * h) as usize];
    let mut components = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if labels[idx] != 0 || mask.get_pixel(x, y)[0] == 0 {
                continue;
            }

            let label = components.len() as u32 + 1;
            let mut comp = Component {
                label,
                area: 0,
                sum_x: 0,
                sum_y: 0,
                first: (x, y),
                min: (x, y),
                max: (x, y),
            };

            labels[idx] = label;
            stack.push((x, y));
            while let Some((px, py)) = stack.pop() {
                comp.area += 1;
                comp.sum_x += px as u64;
                comp.sum_y += py as u64;
                comp.min = (comp.min.0.min(px), comp.min.1.min(py));
                comp.max = (comp.max.0.max(px), comp.max.1.max(py));

                for &(dx, dy) in &NEIGHBORS_8 {
                    let nx = px as i32 + dx;
                    let ny = py as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let nidx = (ny as u32 * w + nx as u32) as usize;
                    if labels[nidx] == 0 && mask.get_pixel(nx as u32, ny as u32)[0] > 0 {
                        labels[nidx] = label;
                        stack.push((nx as u32, ny as u32));
                    }
                }
            }

            components.push(comp);
        }
    }

    ComponentLabels {
        width: w,
        height: h,
        labels,
        components,
    }
}

/// Best flash candidate found in a diff mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlobDetection {
    pub centroid: Point2<f64>,
    pub area: usize,
}

/// Picks the single largest qualifying component of a diff mask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlobSelector {
    /// Components must be strictly larger than this many pixels.
    pub min_area: usize,
    /// Second floor on area; also exclusive.
    pub sensitivity: usize,
}

impl BlobSelector {
    pub fn new(min_area: usize, sensitivity: usize) -> Self {
        Self {
            min_area,
            sensitivity,
        }
    }

    /// Largest component whose area exceeds both thresholds. Ties keep the
    /// component met first in raster order.
    pub fn select(&self, diff: &Mask) -> Option<BlobDetection> {
        let labeled = connected_components(diff);
        let mut best: Option<BlobDetection> = None;

        for comp in &labeled.components {
            if comp.area <= self.min_area || comp.area <= self.sensitivity {
                continue;
            }
            let Some(centroid) = comp.centroid() else {
                continue;
            };
            if best.map_or(true, |b| comp.area > b.area) {
                best = Some(BlobDetection {
                    centroid,
                    area: comp.area,
                });
            }
        }

        if let Some(b) = &best {
            debug!(
                "Blob at ({:.1}, {:.1}), area {} of {} component(s)",
                b.centroid.x,
                b.centroid.y,
                b.area,
                labeled.components.len()
            );
        }
        best
    }
}
