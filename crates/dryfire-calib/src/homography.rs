use crate::CalibrationError;
use dryfire_vision::contour::is_convex;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Relative tolerance for collinearity of three corners, scaled by the
/// squared extent of the corner set.
const COLLINEAR_EPS: f64 = 1e-6;

/// Projective map from camera (processing-frame) pixels to target-plane units.
///
/// Only ever constructed through the checked constructors below, so a value
/// of this type is always invertible.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    h: Matrix3<f64>,
}

impl Homography {
    /// Exact map sending `src[i]` to `dst[i]` for the four correspondences.
    ///
    /// Both point sets must form a non-degenerate quadrilateral (no three
    /// corners collinear). Convexity is not checked here; see [`Homography::from_quad`].
    pub fn from_correspondences(
        src: &[Point2<f64>; 4],
        dst: &[Point2<f64>; 4],
    ) -> Result<Self, CalibrationError> {
        check_not_collinear(src)?;
        check_not_collinear(dst)?;

        let coincident = CalibrationError::Degenerate("coincident corners");
        let (src_n, t_src) = normalize_points4(src).ok_or(coincident.clone())?;
        let (dst_n, t_dst) = normalize_points4(dst).ok_or(coincident)?;

        // Unknowns [h11 h12 h13 h21 h22 h23 h31 h32], h33 = 1.
        // u (h31 x + h32 y + 1) = h11 x + h12 y + h13, same for v.
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for k in 0..4 {
            let (x, y) = (src_n[k].x, src_n[k].y);
            let (u, v) = (dst_n[k].x, dst_n[k].y);

            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = r0 + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let x = a.lu().solve(&b).ok_or(CalibrationError::Singular)?;
        let hn = Matrix3::new(
            x[0], x[1], x[2], //
            x[3], x[4], x[5], //
            x[6], x[7], 1.0,
        );

        let t_dst_inv = t_dst.try_inverse().ok_or(CalibrationError::Singular)?;
        let h = t_dst_inv * hn * t_src;
        let s = h[(2, 2)];
        if s.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
            return Err(CalibrationError::Singular);
        }
        let h = h / s;
        if h.determinant().abs() < 1e-12 {
            return Err(CalibrationError::Singular);
        }
        Ok(Self { h })
    }

    /// Map a camera-space quad, corners in TL, TR, BR, BL order, onto the
    /// `width` x `height` target rectangle. The quad must be strictly convex,
    /// which also rejects self-intersecting corner orders.
    pub fn from_quad(
        corners: &[Point2<f64>; 4],
        width: f64,
        height: f64,
    ) -> Result<Self, CalibrationError> {
        check_not_collinear(corners)?;
        if !is_convex(corners) {
            return Err(CalibrationError::NotConvex);
        }
        Self::from_correspondences(corners, &target_corners(width, height))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.h
    }

    /// Map one point; `None` if it lands on the line at infinity.
    pub fn apply(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        if v[2].abs() < 1e-12 {
            return None;
        }
        Some(Point2::new(v[0] / v[2], v[1] / v[2]))
    }

    pub fn inverse(&self) -> Option<Homography> {
        let inv = self.h.try_inverse()?;
        let s = inv[(2, 2)];
        if s.abs() < 1e-12 {
            return None;
        }
        Some(Homography { h: inv / s })
    }
}

/// Target rectangle corners in TL, TR, BR, BL order.
pub fn target_corners(width: f64, height: f64) -> [Point2<f64>; 4] {
    [
        Point2::new(0.0, 0.0),
        Point2::new(width, 0.0),
        Point2::new(width, height),
        Point2::new(0.0, height),
    ]
}

/// Outer corners of a point cloud by the rotated-diagonal extremes: TL has
/// the smallest `x + y`, BR the largest, TR the smallest `y - x` and BL the
/// largest. Ties keep the first point. Approximate under strong roll.
pub fn extreme_corners(points: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    let first = *points.first()?;
    let mut tl = first;
    let mut br = first;
    let mut tr = first;
    let mut bl = first;
    for p in &points[1..] {
        let s = p.x + p.y;
        let d = p.y - p.x;
        if s < tl.x + tl.y {
            tl = *p;
        }
        if s > br.x + br.y {
            br = *p;
        }
        if d < tr.y - tr.x {
            tr = *p;
        }
        if d > bl.y - bl.x {
            bl = *p;
        }
    }
    Some([tl, tr, br, bl])
}

fn check_not_collinear(pts: &[Point2<f64>; 4]) -> Result<(), CalibrationError> {
    let (min, max) = pts.iter().fold(
        (Point2::new(f64::MAX, f64::MAX), Point2::new(f64::MIN, f64::MIN)),
        |(lo, hi), p| {
            (
                Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        },
    );
    let extent = (max - min).norm();
    if !extent.is_finite() || extent < 1e-9 {
        return Err(CalibrationError::Degenerate("corners coincide"));
    }
    let tol = COLLINEAR_EPS * extent * extent;
    for i in 0..4 {
        for j in i + 1..4 {
            for k in j + 1..4 {
                let (a, b, c) = (pts[i], pts[j], pts[k]);
                let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
                if cross.abs() <= tol {
                    return Err(CalibrationError::Degenerate("three corners are collinear"));
                }
            }
        }
    }
    Ok(())
}

/// Hartley normalization: centroid to the origin, mean distance sqrt(2).
fn normalize_points4(pts: &[Point2<f64>; 4]) -> Option<([Point2<f64>; 4], Matrix3<f64>)> {
    let centroid = pts
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0))
        / 4.0;
    let (cx, cy) = (centroid.x, centroid.y);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(
        s, 0.0, -s * cx, //
        0.0, s, -s * cy, //
        0.0, 0.0, 1.0,
    );

    let mut out = [Point2::origin(); 4];
    for (o, p) in out.iter_mut().zip(pts) {
        let v = t * Vector3::new(p.x, p.y, 1.0);
        *o = Point2::new(v[0], v[1]);
    }
    Some((out, t))
}
