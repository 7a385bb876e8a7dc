//! Encoded frames and the consumers they are handed to.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(frame)
        .context("Failed to encode frame as JPEG")?;
    Ok(buf)
}

/// One annotated frame, JPEG encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    /// The frame as one part of a `multipart/x-mixed-replace` stream.
    pub fn multipart_chunk(&self) -> Vec<u8> {
        let head = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MULTIPART_BOUNDARY);
        let mut chunk = Vec::with_capacity(head.len() + self.jpeg.len() + 2);
        chunk.extend_from_slice(head.as_bytes());
        chunk.extend_from_slice(&self.jpeg);
        chunk.extend_from_slice(b"\r\n");
        chunk
    }

    pub fn decode(&self) -> Result<RgbImage> {
        let img = image::load_from_memory_with_format(&self.jpeg, ImageFormat::Jpeg)
            .context("Failed to decode JPEG frame")?;
        Ok(img.to_rgb8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The consumer was still busy with the previous frame.
    Dropped,
}

/// Receives every frame the pipeline produces. An error means the consumer
/// is gone and the pipeline should stop.
pub trait FrameSink: Send {
    fn deliver(&mut self, frame: EncodedFrame) -> Result<Delivery>;
}

/// Bounded (one frame) hand-off to another thread. Never blocks.
pub struct ChannelSink {
    tx: SyncSender<EncodedFrame>,
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: EncodedFrame) -> Result<Delivery> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(Delivery::Sent),
            Err(TrySendError::Full(_)) => Ok(Delivery::Dropped),
            Err(TrySendError::Disconnected(_)) => bail!("Frame consumer disconnected"),
        }
    }
}

pub struct FrameStream {
    rx: Receiver<EncodedFrame>,
}

impl FrameStream {
    /// Wait up to `timeout` for a frame. `Ok(None)` on timeout, an error once
    /// the pipeline side has hung up.
    pub fn next_frame(&self, timeout: Duration) -> Result<Option<EncodedFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("Frame pipeline stopped")),
        }
    }
}

pub fn frame_channel() -> (ChannelSink, FrameStream) {
    let (tx, rx) = mpsc::sync_channel(1);
    (ChannelSink { tx }, FrameStream { rx })
}

/// Appends frames as multipart chunks, the same bytes an MJPEG HTTP response carries.
pub struct MjpegWriter<W: Write> {
    out: W,
    frames: u64,
}

impl MjpegWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> MjpegWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: 0 }
    }

    pub fn write_frame(&mut self, frame: &EncodedFrame) -> Result<()> {
        self.out.write_all(&frame.multipart_chunk())?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

pub struct WindowOutput {
    window: minifb::Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowOutput {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = minifb::Window::new(
            title,
            width,
            height,
            minifb::WindowOptions {
                resize: true,
                ..minifb::WindowOptions::default()
            },
        )
        .map_err(|e| anyhow!("Failed to create window: {}", e))?;

        window.limit_update_rate(Some(Duration::from_micros(16600)));

        Ok(Self {
            window,
            buffer: vec![0; width * height],
            width,
            height,
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn is_key_down(&self, key: minifb::Key) -> bool {
        self.window.is_key_down(key)
    }

    /// Keep the window responsive while no new frame is available.
    pub fn pump(&mut self) {
        self.window.update();
    }

    pub fn show(&mut self, frame: &EncodedFrame) -> Result<()> {
        let image = frame.decode()?;
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w != self.width || h != self.height {
            self.width = w;
            self.height = h;
        }
        self.buffer.clear();
        self.buffer
            .extend(image.pixels().map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32));

        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| anyhow!("Window update failed: {}", e))
    }
}
