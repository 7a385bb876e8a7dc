use anyhow::{anyhow, Context, Result};
use colored::*;
use image::RgbImage;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use tracing::info;

/// Anything that yields RGB frames. An error means the device is gone.
pub trait FrameSource {
    fn name(&self) -> String;
    fn next_frame(&mut self) -> Result<RgbImage>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        (**self).next_frame()
    }
}

pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    /// Open camera `index`, asking for `width` x `height` when both are non-zero.
    pub fn new(index: u32, width: u32, height: u32) -> Result<Self> {
        let format = if width > 0 && height > 0 {
            RequestedFormatType::HighestResolution(Resolution::new(width, height))
        } else {
            RequestedFormatType::AbsoluteHighestFrameRate
        };
        let requested = RequestedFormat::new::<RgbFormat>(format);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| anyhow!(e))
            .context("Failed to create camera instance")?;

        camera
            .open_stream()
            .map_err(|e| anyhow!(e))
            .context("Failed to open camera stream")?;

        println!("{}", format!("Opened camera: {}", camera.info().human_name()).green());
        info!(format = %camera.camera_format(), "camera stream open");

        Ok(Self { camera })
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> String {
        self.camera.info().human_name()
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| anyhow!(e))
            .context("Failed to get frame")?;
        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| anyhow!(e))
            .context("Failed to decode frame")
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}

/// Print the cameras the platform backend can see.
pub fn list_cameras() -> Result<()> {
    let cameras = nokhwa::query(ApiBackend::Auto)?;
    println!("Available Cameras:");
    println!("{:<5} | {:<30} | {:<10}", "Index", "Name", "Misc");
    println!("{}", "-".repeat(60));
    for cam in cameras {
        println!("{:<5} | {:<30} | {:?}", cam.index(), cam.human_name(), cam.misc());
    }
    Ok(())
}
