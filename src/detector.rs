//! UltraFace (RFB-320) face box detector used to crop the mesh input.

use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::types::Rect;

const INPUT_W: u32 = 320;
const INPUT_H: u32 = 240;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;

/// Prior box in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

pub struct FaceDetector {
    session: Session,
    anchors: Vec<Anchor>,
    score_threshold: f32,
}

impl FaceDetector {
    pub fn new(model_path: &str, score_threshold: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_execution_providers([
                ort::execution_providers::CoreMLExecutionProvider::default().build(),
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load face detector from {}", model_path))?;

        Ok(Self {
            session,
            anchors: ultraface_anchors(INPUT_W as usize, INPUT_H as usize),
            score_threshold,
        })
    }

    /// Highest scoring face box in frame pixels, if any clears the threshold.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Option<Rect>> {
        let resized = image::imageops::resize(frame, INPUT_W, INPUT_H, FilterType::Triangle);

        // NCHW, (p - 127) / 128
        let plane = (INPUT_W * INPUT_H) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                input[c * plane + i] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let tensor = Tensor::from_array(([1usize, 3, INPUT_H as usize, INPUT_W as usize], input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let best = best_box(&self.anchors, scores, boxes, self.score_threshold);
        let sx = frame.width() as f32;
        let sy = frame.height() as f32;
        Ok(best.map(|r| Rect::new(r.x * sx, r.y * sy, r.width * sx, r.height * sy)))
    }
}

/// Decode the best anchor above `threshold` into a normalized rect.
fn best_box(anchors: &[Anchor], scores: &[f32], boxes: &[f32], threshold: f32) -> Option<Rect> {
    anchors
        .iter()
        .enumerate()
        .filter_map(|(i, anchor)| {
            let score = *scores.get(i * 2 + 1)?;
            let enc = boxes.get(i * 4..i * 4 + 4)?;
            (score > threshold).then_some((score, anchor, enc))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, a, enc)| {
            let cx = enc[0] * CENTER_VARIANCE * a.w + a.cx;
            let cy = enc[1] * CENTER_VARIANCE * a.h + a.cy;
            let w = (enc[2] * SIZE_VARIANCE).exp() * a.w;
            let h = (enc[3] * SIZE_VARIANCE).exp() * a.h;
            Rect::new(cx - w / 2.0, cy - h / 2.0, w, h)
        })
}

fn ultraface_anchors(width: usize, height: usize) -> Vec<Anchor> {
    const STRIDES: [usize; 4] = [8, 16, 32, 64];
    const MIN_BOXES: [&[f32]; 4] = [&[10.0, 16.0, 24.0], &[32.0, 48.0], &[64.0, 96.0], &[128.0, 192.0, 256.0]];

    let (w, h) = (width as f32, height as f32);
    let mut anchors = Vec::new();
    for (stride, sizes) in STRIDES.iter().zip(MIN_BOXES) {
        let rows = height.div_ceil(*stride);
        let cols = width.div_ceil(*stride);
        for row in 0..rows {
            for col in 0..cols {
                let cx = (col * stride) as f32 + *stride as f32 / 2.0;
                let cy = (row * stride) as f32 + *stride as f32 / 2.0;
                anchors.extend(sizes.iter().map(|size| Anchor {
                    cx: cx / w,
                    cy: cy / h,
                    w: size / w,
                    h: size / h,
                }));
            }
        }
    }
    anchors
}
