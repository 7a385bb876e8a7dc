use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::{info, warn};

use crate::detector::FaceDetector;
use crate::landmarks::LandmarkDetector;
use crate::types::{Landmarks, Point3D, Rect, MESH_POINTS};

const MESH_INPUT: u32 = 192;
/// Extra context around the detector box, as a share of its size.
const ROI_PADDING: f32 = 0.25;

/// MediaPipe-style 468 point face mesh, cropped to the UltraFace box.
pub struct FaceMeshModel {
    session: Session,
    detector: FaceDetector,
}

/// Both models must be present: the mesh has no face-presence signal of its
/// own, so the detector alone decides whether a frame holds a face.
fn require_models(mesh_path: &str, detector_path: &str) -> Result<()> {
    if !Path::new(mesh_path).exists() {
        bail!("Face mesh model not found at {}", mesh_path);
    }
    if !Path::new(detector_path).exists() {
        bail!("Face detection model not found at {}", detector_path);
    }
    Ok(())
}

impl FaceMeshModel {
    pub fn new(mesh_path: &str, detector_path: &str, detection_threshold: f32) -> Result<Self> {
        require_models(mesh_path, detector_path)?;

        info!("Loading face detector from {}", detector_path);
        let detector = FaceDetector::new(detector_path, detection_threshold)?;

        info!("Loading face mesh from {}", mesh_path);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_execution_providers([
                ort::execution_providers::CoreMLExecutionProvider::default().build(),
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])?
            .commit_from_file(mesh_path)
            .with_context(|| format!("Failed to load face mesh from {}", mesh_path))?;

        Ok(Self { session, detector })
    }

    fn region_of_interest(&mut self, frame: &RgbImage) -> Result<Option<Rect>> {
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        Ok(self.detector.detect(frame)?.map(|rect| pad_and_clip(rect, fw, fh)))
    }
}

impl LandmarkDetector for FaceMeshModel {
    fn name(&self) -> String {
        format!("Face Mesh ({} pts)", MESH_POINTS)
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Landmarks>> {
        let Some(roi) = self.region_of_interest(frame)? else {
            return Ok(Vec::new());
        };
        if roi.width < 1.0 || roi.height < 1.0 {
            return Ok(Vec::new());
        }

        let crop = image::imageops::crop_imm(
            frame,
            roi.x as u32,
            roi.y as u32,
            roi.width as u32,
            roi.height as u32,
        )
        .to_image();
        let resized = image::imageops::resize(&crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);

        // NHWC in [-1, 1]
        let input: Vec<f32> = resized
            .pixels()
            .flat_map(|p| p.0)
            .map(|v| v as f32 / 127.5 - 1.0)
            .collect();
        let side = MESH_INPUT as usize;
        let tensor = Tensor::from_array(([1usize, side, side, 3], input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;

        if raw.len() < MESH_POINTS * 3 {
            warn!(values = raw.len(), "face mesh output is too short");
            return Ok(Vec::new());
        }

        let scale_x = roi.width / MESH_INPUT as f32;
        let scale_y = roi.height / MESH_INPUT as f32;
        let points = raw[..MESH_POINTS * 3]
            .chunks_exact(3)
            .map(|m| Point3D {
                x: roi.x + m[0] * scale_x,
                y: roi.y + m[1] * scale_y,
                z: m[2] * scale_x,
            })
            .collect();
        Ok(vec![Landmarks::new(points)])
    }
}

/// Grow the box by [`ROI_PADDING`] around its center and clip it to the frame.
fn pad_and_clip(rect: Rect, frame_w: f32, frame_h: f32) -> Rect {
    let pad_w = rect.width * ROI_PADDING;
    let pad_h = rect.height * ROI_PADDING;
    let x = (rect.x - pad_w / 2.0).max(0.0);
    let y = (rect.y - pad_h / 2.0).max(0.0);
    let w = (rect.width + pad_w).min(frame_w - x).max(0.0);
    let h = (rect.height + pad_h).min(frame_h - y).max(0.0);
    Rect::new(x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_is_padded_inside_the_frame() {
        let r = pad_and_clip(Rect::new(100.0, 100.0, 80.0, 80.0), 640.0, 480.0);
        assert_eq!(r, Rect::new(90.0, 90.0, 100.0, 100.0));
    }

    #[test]
    fn roi_is_clipped_at_edges() {
        let r = pad_and_clip(Rect::new(-5.0, 400.0, 100.0, 100.0), 640.0, 480.0);
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 387.5);
        assert_eq!(r.height, 480.0 - 387.5);
    }

    #[test]
    fn both_models_are_required() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("face_mesh.onnx");
        let detector = dir.path().join("face_detection.onnx");
        std::fs::write(&mesh, b"onnx").unwrap();
        let (mesh, detector) = (mesh.to_str().unwrap(), detector.to_str().unwrap());

        let err = require_models(mesh, detector).unwrap_err();
        assert!(err.to_string().contains("Face detection model not found"));
        assert!(require_models("missing.onnx", detector).is_err());

        std::fs::write(detector, b"onnx").unwrap();
        require_models(mesh, detector).unwrap();
    }
}
