//! Binarization helpers for calibration-target detection.

use crate::Mask;
use image::{GrayImage, Luma};

/// Inverted adaptive mean threshold: a pixel is set when it is at least `c`
/// darker than the mean of the `(2r+1)²` window around it (window clipped at
/// the image border). Dark print on a light target becomes foreground.
pub fn adaptive_threshold_inv(gray: &GrayImage, radius: u32, c: i32) -> Mask {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Mask::new(w, h);
    }

    // Integral image with a zero row and column in front
    let iw = (w + 1) as usize;
    let mut integral = vec![0u64; iw * (h + 1) as usize];
    for y in 0..h as usize {
        let mut row_sum = 0u64;
        for x in 0..w as usize {
            row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * iw + x + 1] = integral[y * iw + x + 1] + row_sum;
        }
    }

    Mask::from_fn(w, h, |x, y| {
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x + radius + 1).min(w) as usize;
        let y1 = (y + radius + 1).min(h) as usize;
        let sum = integral[y1 * iw + x1] + integral[y0 * iw + x0]
            - integral[y0 * iw + x1]
            - integral[y1 * iw + x0];
        let count = ((x1 - x0) * (y1 - y0)) as f64;
        let mean = sum as f64 / count;
        if (gray.get_pixel(x, y)[0] as f64) <= mean - c as f64 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Otsu split of a sample set: the level maximizing between-class variance.
/// Values `<=` the returned level form the dark class.
pub fn otsu_threshold(samples: &[u8]) -> u8 {
    let Some(&first) = samples.first() else {
        return 127;
    };
    let (lo, hi) = samples
        .iter()
        .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo == hi {
        return lo;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }

    let total = samples.len() as f64;
    let weighted_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &n)| i as f64 * n as f64)
        .sum();

    let mut dark_weight = 0.0;
    let mut dark_sum = 0.0;
    let mut best = (f64::MIN, lo);

    for level in lo..hi {
        let n = hist[level as usize] as f64;
        dark_weight += n;
        dark_sum += level as f64 * n;
        let light_weight = total - dark_weight;
        if dark_weight < 1.0 || light_weight < 1.0 {
            continue;
        }
        let dark_mean = dark_sum / dark_weight;
        let light_mean = (weighted_total - dark_sum) / light_weight;
        let between = dark_weight * light_weight * (dark_mean - light_mean).powi(2);
        if between > best.0 {
            best = (between, level);
        }
    }

    best.1
}
