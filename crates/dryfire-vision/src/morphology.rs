//! 3x3 binary morphology. Out-of-bounds neighbours are ignored, so the
//! image border neither erodes nor grows shapes.

use crate::Mask;
use image::Luma;

fn filter_3x3(mask: &Mask, pick: fn(u8, u8) -> u8, init: u8) -> Mask {
    let (w, h) = mask.dimensions();
    Mask::from_fn(w, h, |x, y| {
        let mut acc = init;
        for ny in y.saturating_sub(1)..=(y + 1).min(h.saturating_sub(1)) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w.saturating_sub(1)) {
                acc = pick(acc, mask.get_pixel(nx, ny)[0]);
            }
        }
        Luma([acc])
    })
}

pub fn erode_3x3(mask: &Mask) -> Mask {
    filter_3x3(mask, u8::min, u8::MAX)
}

pub fn dilate_3x3(mask: &Mask) -> Mask {
    filter_3x3(mask, u8::max, u8::MIN)
}

/// Erosion followed by dilation: drops features thinner than 3 pixels and
/// leaves larger blobs at their original extent.
pub fn open_3x3(mask: &Mask) -> Mask {
    dilate_3x3(&erode_3x3(mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(w: u32, h: u32, x0: u32, y0: u32, size: u32) -> Mask {
        Mask::from_fn(w, h, |x, y| {
            if x >= x0 && x < x0 + size && y >= y0 && y < y0 + size {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_erode_shrinks_block() {
        let eroded = erode_3x3(&block(12, 12, 3, 3, 5));
        assert_eq!(eroded.pixels().filter(|p| p[0] > 0).count(), 9);
    }

    #[test]
    fn test_open_keeps_block_and_drops_lines() {
        let mut mask = block(20, 20, 2, 2, 4);
        for x in 0..20 {
            mask.put_pixel(x, 15, Luma([255]));
        }
        let opened = open_3x3(&mask);
        assert_eq!(opened.pixels().filter(|p| p[0] > 0).count(), 16);
        assert_eq!(opened.get_pixel(10, 15)[0], 0);
    }

    #[test]
    fn test_border_does_not_erode() {
        let opened = open_3x3(&block(6, 6, 0, 0, 3));
        assert_eq!(opened.get_pixel(0, 0)[0], 255);
        assert_eq!(opened.pixels().filter(|p| p[0] > 0).count(), 9);
    }
}
