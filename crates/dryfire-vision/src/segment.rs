use crate::{morphology, Mask};
use image::{ImageBuffer, Luma, Pixel};
use serde::{Deserialize, Serialize};

/// Red wraps around the hue origin, so two inclusive bands are tested.
/// Hue is on the 8-bit 0..180 scale.
const LOW_HUE_BAND: (u8, u8) = (0, 12);
const HIGH_HUE_BAND: (u8, u8) = (160, 179);
const MIN_SATURATION: u8 = 110;
const MIN_VALUE: u8 = 170;

/// Rejects pink/orange/skin tones whose red barely leads green.
const MIN_RED_GREEN_GAP: i16 = 36;

/// Hue-saturation-value triple on the 8-bit scale (h in 0..180, s and v in 0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / delta
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    Hsv {
        h: ((h / 2.0).round() as u16 % 180) as u8,
        s: s.round() as u8,
        v: v as u8,
    }
}

fn in_band(h: u8, band: (u8, u8)) -> bool {
    h >= band.0 && h <= band.1
}

/// Whether one pixel is "bright red": passes either hue band with enough
/// saturation and value, AND red leads green by more than the gap.
pub fn is_red_candidate(r: u8, g: u8, b: u8) -> bool {
    let hsv = rgb_to_hsv(r, g, b);
    let hsv_red = (in_band(hsv.h, LOW_HUE_BAND) || in_band(hsv.h, HIGH_HUE_BAND))
        && hsv.s >= MIN_SATURATION
        && hsv.v >= MIN_VALUE;
    let gap_red = r as i16 - g as i16 > MIN_RED_GREEN_GAP;
    hsv_red && gap_red
}

/// Segment a 3- or 4-channel 8-bit frame into a red-candidate mask, cleaned
/// with a 3x3 morphological opening.
pub fn segment_red<P>(frame: &ImageBuffer<P, Vec<u8>>) -> Mask
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = frame.dimensions();
    let raw = Mask::from_fn(w, h, |x, y| {
        let c = frame.get_pixel(x, y).channels();
        if c.len() >= 3 && is_red_candidate(c[0], c[1], c[2]) {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    morphology::open_3x3(&raw)
}
