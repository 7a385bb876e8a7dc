//! Turns a camera frame into a fixed-length landmark feature vector.

use image::RgbImage;
use tracing::{debug, warn};

use crate::types::{LandmarkVector, Landmarks, MESH_POINTS};

/// Face-mesh detector contract: zero or more faces, each with the model's
/// fixed number of points in pixel space.
pub trait LandmarkDetector {
    fn name(&self) -> String;
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Landmarks>>;
}

impl<T: LandmarkDetector + ?Sized> LandmarkDetector for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Landmarks>> {
        (**self).detect(frame)
    }
}

/// Result of one successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Pixel-space points, only used for drawing.
    pub landmarks: Landmarks,
    pub features: LandmarkVector,
}

pub struct LandmarkExtractor<D> {
    detector: D,
    points: usize,
}

impl<D: LandmarkDetector> LandmarkExtractor<D> {
    pub fn new(detector: D) -> Self {
        Self::with_points(detector, MESH_POINTS)
    }

    pub fn with_points(detector: D, points: usize) -> Self {
        Self { detector, points }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn feature_len(&self) -> usize {
        self.points * 3
    }

    pub fn detector_name(&self) -> String {
        self.detector.name()
    }

    /// Extract the first detected face. Empty frames, detector failures and
    /// meshes with an unexpected point count all count as "no face".
    pub fn extract(&mut self, frame: &RgbImage) -> Option<Extraction> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("landmark detection failed: {:#}", e);
                return None;
            }
        };
        let landmarks = faces.into_iter().next()?;
        if landmarks.len() != self.points {
            debug!(
                got = landmarks.len(),
                expected = self.points,
                "ignoring mesh with unexpected point count"
            );
            return None;
        }

        let features = normalize(&landmarks, width as f32, height as f32);
        Some(Extraction {
            landmarks,
            features,
        })
    }
}

/// Flatten pixel-space points into (x / width, y / height, z / width).
pub fn normalize(landmarks: &Landmarks, width: f32, height: f32) -> LandmarkVector {
    let mut values = Vec::with_capacity(landmarks.len() * 3);
    for p in &landmarks.points {
        values.push(p.x / width);
        values.push(p.y / height);
        values.push(p.z / width);
    }
    LandmarkVector::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point3D;
    use anyhow::anyhow;

    struct Scripted(Vec<anyhow::Result<Vec<Landmarks>>>);

    impl LandmarkDetector for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Landmarks>> {
            self.0.remove(0)
        }
    }

    fn mesh(points: usize, offset: f32) -> Landmarks {
        Landmarks::new(
            (0..points)
                .map(|i| Point3D {
                    x: offset + i as f32,
                    y: offset * 2.0,
                    z: -1.0,
                })
                .collect(),
        )
    }

    #[test]
    fn vector_length_is_constant_for_every_detection() {
        let mut extractor = LandmarkExtractor::with_points(
            Scripted(vec![
                Ok(vec![mesh(4, 10.0)]),
                Ok(vec![]),
                Ok(vec![mesh(4, 20.0), mesh(4, 99.0)]),
                Err(anyhow!("runtime hiccup")),
                Ok(vec![mesh(3, 0.0)]),
            ]),
            4,
        );
        let frame = RgbImage::new(100, 50);

        let lens: Vec<Option<usize>> = (0..5)
            .map(|_| extractor.extract(&frame).map(|e| e.features.len()))
            .collect();
        assert_eq!(lens, vec![Some(12), None, Some(12), None, None]);
    }

    #[test]
    fn first_face_wins_and_coordinates_are_normalized() {
        let mut extractor = LandmarkExtractor::with_points(
            Scripted(vec![Ok(vec![mesh(2, 20.0), mesh(2, 70.0)])]),
            2,
        );
        let found = extractor.extract(&RgbImage::new(100, 50)).unwrap();
        assert_eq!(found.features.as_slice(), &[0.2, 0.8, -0.01, 0.21, 0.8, -0.01]);
        assert_eq!(found.landmarks.points[0].x, 20.0);
    }

    #[test]
    fn empty_frame_is_no_detection() {
        let mut extractor = LandmarkExtractor::with_points(Scripted(vec![]), 2);
        assert!(extractor.extract(&RgbImage::new(0, 0)).is_none());
    }
}
