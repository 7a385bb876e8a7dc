use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::model::Classifier;
use crate::types::LandmarkVector;

/// Holds the active classifier. Replacing it is a single reference swap, so
/// a frame that already cloned the old model finishes with it untouched.
#[derive(Default)]
pub struct InferenceOverlay {
    active: RwLock<Option<Arc<dyn Classifier>>>,
}

impl InferenceOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new model, returning the one it replaced.
    pub fn install(&self, model: Arc<dyn Classifier>) -> Option<Arc<dyn Classifier>> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        active.replace(model)
    }

    pub fn active(&self) -> Option<Arc<dyn Classifier>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.active().is_some()
    }

    /// Predict with the active model. The lock is only held to clone the
    /// reference; the prediction itself runs outside it.
    pub fn predict(&self, features: &LandmarkVector) -> Result<String> {
        let model = self
            .active()
            .ok_or_else(|| Error::InvalidArgument("no classifier loaded".into()))?;
        if features.len() != model.feature_len() {
            return Err(Error::ShapeMismatch {
                expected: model.feature_len(),
                actual: features.len(),
            });
        }
        model.predict(features)
    }
}
