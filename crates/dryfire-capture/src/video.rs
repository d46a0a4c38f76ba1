use crate::FrameSource;
use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Recorded session played back through ffmpeg.
///
/// All ffmpeg state lives on a dedicated decode thread; frames cross over a
/// two-slot channel so decoding stays at most two frames ahead of the loop.
pub struct VideoFile {
    path: PathBuf,
    rx: Receiver<Result<RgbaImage>>,
    decoder: Option<JoinHandle<()>>,
}

impl VideoFile {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("Video file not found: {}", path.display()));
        }
        let (tx, rx) = sync_channel(2);
        let path_owned = path.to_path_buf();
        let decoder = std::thread::Builder::new()
            .name("dryfire-video-decode".into())
            .spawn(move || {
                if let Err(e) = decode_video(&path_owned, &tx) {
                    let _ = tx.send(Err(e));
                }
            })?;

        info!("Video source opened: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            rx,
            decoder: Some(decoder),
        })
    }
}

impl FrameSource for VideoFile {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        match self.rx.recv() {
            Ok(frame) => frame.map(Some),
            // Decode thread finished and dropped its sender
            Err(_) => Ok(None),
        }
    }

    fn describe(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!("[Video] {}", name)
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        // Unblock a decoder parked on a full channel before joining it
        let (_, dummy) = sync_channel(0);
        drop(std::mem::replace(&mut self.rx, dummy));
        if let Some(handle) = self.decoder.take() {
            if handle.join().is_err() {
                warn!("Video decode thread panicked");
            }
        }
    }
}

/// Copy one scaled RGBA frame out of ffmpeg, dropping row padding.
fn frame_to_image(rgba: &ffmpeg_next::frame::Video, width: u32, height: u32) -> Option<RgbaImage> {
    let data = rgba.data(0);
    let stride = rgba.stride(0);
    let row_bytes = width as usize * 4;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    RgbaImage::from_raw(width, height, pixels)
}

fn decode_video(path: &Path, tx: &SyncSender<Result<RgbaImage>>) -> Result<()> {
    ffmpeg_next::init()?;

    let mut ictx = ffmpeg_next::format::input(path)?;
    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| anyhow!("No video stream found"))?;
    let stream_index = stream.index();

    let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    let mut decoder = ctx.decoder().video()?;
    let (width, height) = (decoder.width(), decoder.height());

    let mut scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGBA,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    info!("Video decoding {}x{}, format {:?}", width, height, decoder.format());

    // Returns false once the consumer has gone away
    let mut drain = |decoder: &mut ffmpeg_next::decoder::Video| -> Result<bool> {
        let mut decoded = ffmpeg_next::frame::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgba = ffmpeg_next::frame::Video::empty();
            scaler.run(&decoded, &mut rgba)?;
            if let Some(img) = frame_to_image(&rgba, width, height) {
                if tx.send(Ok(img)).is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    };

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        if !drain(&mut decoder)? {
            return Ok(());
        }
    }

    decoder.send_eof()?;
    drain(&mut decoder)?;
    Ok(())
}
