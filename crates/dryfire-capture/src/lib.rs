use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(feature = "video")]
pub mod video;

/// Latest-frame slot shared between the source loop and its consumers.
pub type FrameSlot = Option<Arc<RgbaImage>>;

/// Anything that can hand out camera frames one at a time.
///
/// `next_frame` is called from a blocking thread, so implementations may
/// do file or decoder I/O directly. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// Short human-readable label used in status reports.
    fn describe(&self) -> String;
}

/// Status of the frame source feeding the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub is_capturing: bool,
    pub source: Option<String>,
    pub fps: f64,
    pub frames_delivered: u64,
    pub last_capture_time: Option<u64>,
    pub resolution: Option<(u32, u32)>,
}

const SEQUENCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Replays a directory of still images in lexicographic file-name order.
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| SEQUENCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!("Image sequence {}: {} frame(s)", dir.display(), files.len());
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let img = image::open(path)
            .with_context(|| format!("Failed to open frame {}", path.display()))?;
        debug!("Loaded frame {}", path.display());
        Ok(Some(img.to_rgba8()))
    }

    fn describe(&self) -> String {
        format!("[Frames] {}", self.dir.display())
    }
}

/// Scale a camera frame to the processing resolution.
/// Frames already at that size are borrowed untouched.
pub fn to_processing_frame(frame: &RgbaImage, width: u32, height: u32) -> Cow<'_, RgbaImage> {
    if frame.dimensions() == (width, height) {
        return Cow::Borrowed(frame);
    }
    Cow::Owned(image::imageops::resize(
        frame,
        width,
        height,
        image::imageops::FilterType::Triangle,
    ))
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Pull frames from `source` and publish them on the watch channel, one per
/// `frame_interval`. The watch channel keeps only the newest frame, so a slow
/// consumer skips frames instead of queueing them.
pub async fn source_loop<S>(
    mut source: S,
    frame_tx: watch::Sender<FrameSlot>,
    status_tx: watch::Sender<CaptureStatus>,
    frame_interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<()>
where
    S: FrameSource + Send + 'static,
{
    let label = source.describe();
    info!("Source loop started: {}, interval: {:?}", label, frame_interval);

    let mut window_frames = 0u64;
    let mut delivered = 0u64;
    let mut fps_timer = Instant::now();
    let mut outcome = Ok(());

    loop {
        if stop.load(Ordering::Relaxed) {
            info!("Source loop stopping (stop signal received)");
            break;
        }
        if frame_tx.is_closed() {
            debug!("No frame consumers left");
            break;
        }

        let tick_start = Instant::now();

        // Decoding and file reads are blocking
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = source.next_frame();
            (source, result)
        })
        .await
        .context("Frame source task panicked")?;
        source = returned;

        match result {
            Ok(Some(frame)) => {
                let resolution = frame.dimensions();
                window_frames += 1;
                delivered += 1;

                let elapsed = fps_timer.elapsed().as_secs_f64();
                let fps = if elapsed > 0.0 {
                    window_frames as f64 / elapsed
                } else {
                    0.0
                };
                if elapsed > 5.0 {
                    window_frames = 0;
                    fps_timer = Instant::now();
                }

                let _ = status_tx.send(CaptureStatus {
                    is_capturing: true,
                    source: Some(label.clone()),
                    fps,
                    frames_delivered: delivered,
                    last_capture_time: Some(unix_millis()),
                    resolution: Some(resolution),
                });
                let _ = frame_tx.send(Some(Arc::new(frame)));
            }
            Ok(None) => {
                info!("Source exhausted after {} frame(s)", delivered);
                break;
            }
            Err(e) => {
                warn!("Frame source failed: {:#}", e);
                outcome = Err(e);
                break;
            }
        }

        let spent = tick_start.elapsed();
        if spent < frame_interval {
            tokio::time::sleep(frame_interval - spent).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    let _ = status_tx.send(CaptureStatus {
        frames_delivered: delivered,
        ..CaptureStatus::default()
    });
    info!("Source loop stopped");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counted {
        remaining: u32,
    }

    impl FrameSource for Counted {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbaImage::new(8, 6)))
        }

        fn describe(&self) -> String {
            "counted".to_string()
        }
    }

    #[test]
    fn test_to_processing_frame_resizes() {
        let img = RgbaImage::new(1280, 960);
        let scaled = to_processing_frame(&img, 640, 480);
        assert_eq!(scaled.dimensions(), (640, 480));
        assert!(matches!(scaled, Cow::Owned(_)));
    }

    #[test]
    fn test_to_processing_frame_borrows_when_sized() {
        let img = RgbaImage::new(640, 480);
        assert!(matches!(to_processing_frame(&img, 640, 480), Cow::Borrowed(_)));
    }

    #[test]
    fn test_image_sequence_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10u8), ("c.png", 30u8)] {
            RgbaImage::from_pixel(4, 4, image::Rgba([shade, 0, 0, 255]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 3);
        let shades: Vec<u8> = std::iter::from_fn(|| seq.next_frame().unwrap())
            .map(|f| f.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 30]);
    }

    #[test]
    fn test_image_sequence_missing_dir() {
        assert!(ImageSequence::open(Path::new("/nonexistent/frames")).is_err());
    }

    #[tokio::test]
    async fn test_source_loop_delivers_until_exhausted() {
        let (frame_tx, frame_rx) = watch::channel::<FrameSlot>(None);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());
        let stop = Arc::new(AtomicBool::new(false));

        source_loop(
            Counted { remaining: 3 },
            frame_tx,
            status_tx,
            Duration::from_millis(1),
            stop,
        )
        .await
        .unwrap();

        assert!(frame_rx.borrow().is_some());
        let status = status_rx.borrow().clone();
        assert!(!status.is_capturing);
        assert_eq!(status.frames_delivered, 3);
    }
}
