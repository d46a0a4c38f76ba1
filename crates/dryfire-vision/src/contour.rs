//! Outer-border tracing and quadrilateral extraction from binary masks.
//!
//! Borders are followed with Moore-neighbour tracing starting at each
//! component's first raster pixel, simplified with Douglas-Peucker and kept
//! only when they reduce to a convex four-sided polygon. Quads nested inside
//! a larger quad are dropped so only external outlines survive.

use crate::blob::{connected_components, ComponentLabels};
use crate::Mask;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Clockwise (image coordinates, y down) starting from west.
const MOORE: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

fn moore_index(dx: i32, dy: i32) -> usize {
    MOORE
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(0)
}

/// Trace the outer border of one labeled component.
fn trace_outer(
    labels: &ComponentLabels,
    label: u32,
    start: (u32, u32),
    max_steps: usize,
) -> Vec<(i32, i32)> {
    let start = (start.0 as i32, start.1 as i32);
    let mut contour = vec![start];
    let mut cur = start;
    // The west neighbour of the first raster pixel is never in the component
    let mut back = 0usize;
    let mut first_move: Option<(i32, i32)> = None;

    for _ in 0..max_steps {
        let found = (1..=8).map(|i| (back + i) % 8).find_map(|d| {
            let n = (cur.0 + MOORE[d].0, cur.1 + MOORE[d].1);
            (labels.label_at(n.0, n.1) == label).then_some((n, d))
        });
        let Some((next, d)) = found else {
            // Isolated pixel
            break;
        };

        if cur == start {
            match first_move {
                Some(m) if m == next => break,
                Some(_) => {}
                None => first_move = Some(next),
            }
        }

        // Last background cell examined before `next`, re-expressed from `next`
        let bd = MOORE[(d + 7) % 8];
        let b = (cur.0 + bd.0, cur.1 + bd.1);
        back = moore_index(b.0 - next.0, b.1 - next.1);

        cur = next;
        contour.push(cur);
    }

    if contour.len() > 1 && contour.last() == Some(&start) {
        contour.pop();
    }
    contour
}

fn perp_distance(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len = ab.norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    (ab.x * (p.y - a.y) - ab.y * (p.x - a.x)).abs() / len
}

fn simplify_chain(chain: &[Point2<f64>], epsilon: f64, out: &mut Vec<Point2<f64>>) {
    if chain.len() < 3 {
        out.push(chain[0]);
        return;
    }
    let last = chain.len() - 1;
    let (idx, dist) = chain[1..last]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, perp_distance(p, &chain[0], &chain[last])))
        .fold((0, -1.0), |best, cand| if cand.1 > best.1 { cand } else { best });

    if dist > epsilon {
        simplify_chain(&chain[..=idx], epsilon, out);
        simplify_chain(&chain[idx..], epsilon, out);
    } else {
        out.push(chain[0]);
    }
}

fn farthest_from(points: &[Point2<f64>], from: usize) -> usize {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, (p - points[from]).norm_squared()))
        .fold((0, -1.0), |best, cand| if cand.1 > best.1 { cand } else { best })
        .0
}

/// Douglas-Peucker simplification of a closed polyline.
///
/// The ring is split at a farthest-point pair rather than at its first
/// point, so an arbitrary start pixel on an edge never survives as a vertex.
pub fn approx_polygon(points: &[Point2<f64>], epsilon: f64) -> Vec<Point2<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let a = farthest_from(points, 0);
    let b = farthest_from(points, a);
    if a == b {
        return vec![points[a]];
    }
    let (a, b) = (a.min(b), a.max(b));

    let mut out = Vec::new();
    simplify_chain(&points[a..=b], epsilon, &mut out);
    let back_half: Vec<Point2<f64>> = points[b..].iter().chain(&points[..=a]).copied().collect();
    simplify_chain(&back_half, epsilon, &mut out);
    out
}

pub fn closed_perimeter(points: &[Point2<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| (b - a).norm())
        .sum()
}

/// Shoelace area (always non-negative).
pub fn polygon_area(points: &[Point2<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

/// Strictly convex: every turn has the same, non-zero orientation.
pub fn is_convex(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < 1e-9 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

fn inside_convex(p: &Point2<f64>, poly: &[Point2<f64>]) -> bool {
    let n = poly.len();
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() < 1e-12 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// A convex four-sided outline in image coordinates, corners in border order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point2<f64>; 4],
    pub area: f64,
}

impl Quad {
    pub fn center(&self) -> Point2<f64> {
        let sum = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, c| acc + c.coords);
        Point2::from(sum / 4.0)
    }

    pub fn mean_side(&self) -> f64 {
        closed_perimeter(&self.corners) / 4.0
    }

    /// Axis-aligned bounding box width over height.
    pub fn aspect_ratio(&self) -> f64 {
        let (min_x, max_x, min_y, max_y) = self.corners.iter().fold(
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
            |(a, b, c, d), p| (a.min(p.x), b.max(p.x), c.min(p.y), d.max(p.y)),
        );
        let h = max_y - min_y;
        if h <= 0.0 {
            return f64::INFINITY;
        }
        (max_x - min_x) / h
    }

    pub fn contains(&self, p: &Point2<f64>) -> bool {
        inside_convex(p, &self.corners)
    }
}

/// Limits applied while extracting quads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuadParams {
    /// Components narrower or shorter than this are not traced.
    pub min_side_px: u32,
    /// Minimum polygon area in square pixels.
    pub min_area: f64,
    /// Douglas-Peucker tolerance as a fraction of the traced perimeter.
    pub epsilon_frac: f64,
}

impl Default for QuadParams {
    fn default() -> Self {
        Self {
            min_side_px: 10,
            min_area: 100.0,
            epsilon_frac: 0.04,
        }
    }
}

/// Find external convex quadrilateral outlines in a binary mask, largest first.
pub fn find_quads(binary: &Mask, params: &QuadParams) -> Vec<Quad> {
    let labeled = connected_components(binary);
    let mut quads = Vec::new();

    for comp in &labeled.components {
        if comp.width() < params.min_side_px || comp.height() < params.min_side_px {
            continue;
        }
        let border = trace_outer(&labeled, comp.label, comp.first, 4 * comp.area + 8);
        let points: Vec<Point2<f64>> = border
            .iter()
            .map(|&(x, y)| Point2::new(x as f64, y as f64))
            .collect();
        let epsilon = params.epsilon_frac * closed_perimeter(&points);
        let poly = approx_polygon(&points, epsilon);
        if poly.len() != 4 || !is_convex(&poly) {
            continue;
        }
        let area = polygon_area(&poly);
        if area < params.min_area {
            continue;
        }
        quads.push(Quad {
            corners: [poly[0], poly[1], poly[2], poly[3]],
            area,
        });
    }

    quads.sort_by(|a, b| b.area.total_cmp(&a.area));
    let mut external: Vec<Quad> = Vec::with_capacity(quads.len());
    for q in quads {
        let c = q.center();
        if external.iter().all(|outer| !outer.contains(&c)) {
            external.push(q);
        }
    }

    debug!(
        "{} external quad(s) from {} component(s)",
        external.len(),
        labeled.components.len()
    );
    external
}
