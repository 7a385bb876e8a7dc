//! Classifier seam and the default decision-tree implementation.

use linfa::traits::Fit;
use linfa::DatasetBase;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{LandmarkVector, Sample};

/// A trained model mapping one feature vector to a class label.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &LandmarkVector) -> Result<String>;

    /// Class labels the model can emit.
    fn classes(&self) -> &[String];

    /// Length of the feature vectors the model was fitted on.
    fn feature_len(&self) -> usize;

    /// Serialized form written to the model artifact.
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// Supervised learning capability: fit a [`Classifier`] and restore one
/// from its serialized form.
pub trait Trainer: Send + Sync {
    fn fit(&self, samples: &[Sample]) -> Result<Box<dyn Classifier>>;

    fn load(&self, bytes: &[u8]) -> Result<Box<dyn Classifier>>;
}

/// Decision-tree hyperparameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionTreeTrainer {
    params: TreeParams,
}

impl DecisionTreeTrainer {
    pub fn new(params: TreeParams) -> Self {
        Self { params }
    }
}

impl Trainer for DecisionTreeTrainer {
    fn fit(&self, samples: &[Sample]) -> Result<Box<dyn Classifier>> {
        let first = samples.first().ok_or(Error::EmptyDataset)?;
        let feature_len = first.features.len();

        let mut classes: Vec<String> = samples.iter().map(|s| s.label.clone()).collect();
        classes.sort();
        classes.dedup();

        let records = to_records(samples.iter().map(|s| &s.features), feature_len)?;
        let targets: Array1<usize> = samples
            .iter()
            .map(|s| classes.binary_search(&s.label).unwrap_or_default())
            .collect();

        let dataset = DatasetBase::new(records, targets);
        let tree = DecisionTree::<f64, usize>::params()
            .max_depth(self.params.max_depth)
            .fit(&dataset)
            .map_err(|e| Error::Fit(e.to_string()))?;

        Ok(Box::new(ExpressionTree {
            classes,
            feature_len,
            tree,
        }))
    }

    fn load(&self, bytes: &[u8]) -> Result<Box<dyn Classifier>> {
        let model: ExpressionTree = bincode::deserialize(bytes)?;
        Ok(Box::new(model))
    }
}

/// Decision tree over class indices plus the label table to decode them.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExpressionTree {
    classes: Vec<String>,
    feature_len: usize,
    tree: DecisionTree<f64, usize>,
}

impl Classifier for ExpressionTree {
    fn predict(&self, features: &LandmarkVector) -> Result<String> {
        use linfa::traits::Predict;

        let records = to_records(std::iter::once(features), self.feature_len)?;
        let predicted: Array1<usize> = self.tree.predict(&records);
        predicted
            .get(0)
            .and_then(|&idx| self.classes.get(idx))
            .cloned()
            .ok_or_else(|| Error::Fit("tree produced an unknown class index".into()))
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn feature_len(&self) -> usize {
        self.feature_len
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

fn to_records<'a>(
    rows: impl Iterator<Item = &'a LandmarkVector>,
    feature_len: usize,
) -> Result<Array2<f64>> {
    let mut flat = Vec::new();
    let mut n_rows = 0;
    for row in rows {
        if row.len() != feature_len {
            return Err(Error::ShapeMismatch {
                expected: feature_len,
                actual: row.len(),
            });
        }
        flat.extend(row.as_slice().iter().map(|&v| f64::from(v)));
        n_rows += 1;
    }
    Array2::from_shape_vec((n_rows, feature_len), flat)
        .map_err(|e| Error::Fit(format!("bad feature matrix: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: &str, level: f32) -> Sample {
        Sample::new(label, LandmarkVector::new(vec![level, 1.0 - level, 0.5, level * 2.0]))
    }

    fn two_class_set() -> Vec<Sample> {
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push(sample("smile", 0.8 + i as f32 * 0.01));
            samples.push(sample("frown", 0.1 + i as f32 * 0.01));
        }
        samples
    }

    #[test]
    fn tree_separates_two_classes() {
        let model = DecisionTreeTrainer::default().fit(&two_class_set()).unwrap();
        assert_eq!(model.classes(), ["frown", "smile"]);
        assert_eq!(model.feature_len(), 4);
        assert_eq!(model.predict(&sample("?", 0.85).features).unwrap(), "smile");
        assert_eq!(model.predict(&sample("?", 0.12).features).unwrap(), "frown");
    }

    #[test]
    fn predict_checks_vector_length() {
        let model = DecisionTreeTrainer::default().fit(&two_class_set()).unwrap();
        let err = model.predict(&LandmarkVector::new(vec![0.1; 3])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn model_bytes_restore_the_same_predictions() {
        let trainer = DecisionTreeTrainer::new(TreeParams { max_depth: Some(4) });
        let model = trainer.fit(&two_class_set()).unwrap();
        let restored = trainer.load(&model.to_bytes().unwrap()).unwrap();

        for level in [0.05, 0.3, 0.6, 0.95] {
            let query = sample("?", level).features;
            assert_eq!(model.predict(&query).unwrap(), restored.predict(&query).unwrap());
        }
    }

    #[test]
    fn garbage_bytes_fail_to_load() {
        assert!(DecisionTreeTrainer::default().load(b"not a model").is_err());
    }
}
