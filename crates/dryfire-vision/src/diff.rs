use crate::Mask;
use image::Luma;
use tracing::debug;

/// Frame-to-frame differencing of red-candidate masks.
///
/// Holds exactly one previous mask. A flash counts as new only on the first
/// frame it appears in, which suppresses steady red features on the target.
#[derive(Debug, Default)]
pub struct TemporalDiffer {
    previous: Option<Mask>,
}

impl TemporalDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the stored history, then keep `current` as the
    /// new history. Returns `None` when there is no comparable history (first
    /// call, or the processing size changed).
    pub fn update(&mut self, current: Mask) -> Option<Mask> {
        let diff = match self.previous.as_ref() {
            Some(prev) if prev.dimensions() == current.dimensions() => {
                let (w, h) = current.dimensions();
                Some(Mask::from_fn(w, h, |x, y| {
                    Luma([current.get_pixel(x, y)[0].saturating_sub(prev.get_pixel(x, y)[0])])
                }))
            }
            Some(prev) => {
                debug!(
                    "Mask size changed {:?} -> {:?}, restarting history",
                    prev.dimensions(),
                    current.dimensions()
                );
                None
            }
            None => None,
        };

        // The old history is dropped here
        self.previous = Some(current);
        diff
    }

    pub fn has_history(&self) -> bool {
        self.previous.is_some()
    }

    /// Size of the retained mask.
    pub fn history_dimensions(&self) -> Option<(u32, u32)> {
        self.previous.as_ref().map(|m| m.dimensions())
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(points: &[(u32, u32)]) -> Mask {
        let mut m = Mask::new(10, 10);
        for &(x, y) in points {
            m.put_pixel(x, y, Luma([255]));
        }
        m
    }

    #[test]
    fn test_first_call_has_no_diff() {
        let mut differ = TemporalDiffer::new();
        assert!(differ.update(mask_with(&[(1, 1)])).is_none());
        assert!(differ.has_history());
    }

    #[test]
    fn test_only_new_pixels_survive() {
        let mut differ = TemporalDiffer::new();
        differ.update(mask_with(&[(1, 1), (2, 2)]));
        let diff = differ.update(mask_with(&[(2, 2), (5, 5)])).unwrap();
        assert_eq!(diff.get_pixel(5, 5)[0], 255);
        assert_eq!(diff.get_pixel(2, 2)[0], 0);
        // Vanished pixels never go negative
        assert_eq!(diff.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_steady_state_is_suppressed() {
        let mut differ = TemporalDiffer::new();
        let steady = mask_with(&[(3, 3), (3, 4), (4, 3)]);
        differ.update(steady.clone());
        for _ in 0..3 {
            let diff = differ.update(steady.clone()).unwrap();
            assert!(diff.pixels().all(|p| p[0] == 0));
        }
    }

    #[test]
    fn test_size_change_restarts_history() {
        let mut differ = TemporalDiffer::new();
        differ.update(Mask::new(10, 10));
        assert!(differ.update(Mask::new(20, 10)).is_none());
        assert!(differ.update(Mask::new(20, 10)).is_some());
        assert_eq!(differ.history_dimensions(), Some((20, 10)));
        differ.reset();
        assert!(!differ.has_history());
    }
}
