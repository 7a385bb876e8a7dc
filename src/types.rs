use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of points produced by the face mesh model.
pub const MESH_POINTS: usize = 468;

/// Length of a flattened (x, y, z) feature vector for the face mesh.
pub const FEATURE_LEN: usize = MESH_POINTS * 3;

/// A single 3D point in frame pixel space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One face's mesh points, in the model's fixed point order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Landmarks {
    pub points: Vec<Point3D>,
}

impl Landmarks {
    pub fn new(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Flattened landmark coordinates used as classifier input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkVector(Vec<f32>);

impl LandmarkVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Build a vector and check it has exactly `expected` values.
    pub fn with_len(values: Vec<f32>, expected: usize) -> Result<Self> {
        if values.len() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// One labeled training row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: String,
    pub features: LandmarkVector,
}

impl Sample {
    pub fn new(label: impl Into<String>, features: LandmarkVector) -> Self {
        Self {
            label: label.into(),
            features,
        }
    }
}
