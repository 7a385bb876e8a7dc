//! Hold-out training run over a persisted dataset snapshot.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::dataset::DatasetTable;
use crate::error::{Error, Result};
use crate::model::{Classifier, Trainer};
use crate::types::Sample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConfig {
    /// Share of rows held out for evaluation, in (0, 1).
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainReport {
    pub accuracy: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub classes: Vec<String>,
}

/// Shuffle row indices with a seeded RNG and cut off the held-out share.
/// Returns `(train, test)` index lists.
pub fn split_indices(rows: usize, config: SplitConfig) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    indices.shuffle(&mut rng);

    let test_rows = ((rows as f64) * config.test_ratio).ceil() as usize;
    let test = indices.split_off(rows - test_rows.min(rows));
    (indices, test)
}

pub fn accuracy(model: &dyn Classifier, samples: &[&Sample]) -> Result<f64> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0usize;
    for sample in samples {
        if model.predict(&sample.features)? == sample.label {
            correct += 1;
        }
    }
    Ok(correct as f64 / samples.len() as f64)
}

/// Fit `trainer` on the training split of `table` and score it on the rest.
pub fn train(
    table: &DatasetTable,
    trainer: &dyn Trainer,
    config: SplitConfig,
) -> Result<(TrainReport, Box<dyn Classifier>)> {
    let samples = table.samples();
    let classes: BTreeSet<&str> = samples.iter().map(|s| s.label.as_str()).collect();
    match classes.len() {
        0 => return Err(Error::EmptyDataset),
        1 => {
            let only = classes.into_iter().next().unwrap_or_default();
            return Err(Error::SingleClass(only.to_string()));
        }
        _ => {}
    }

    let (train_idx, test_idx) = split_indices(samples.len(), config);
    if train_idx.is_empty() {
        return Err(Error::EmptyDataset);
    }

    let train_rows: Vec<Sample> = train_idx.iter().map(|&i| samples[i].clone()).collect();
    let test_rows: Vec<&Sample> = test_idx.iter().map(|&i| &samples[i]).collect();

    let model = trainer.fit(&train_rows)?;
    let accuracy = accuracy(model.as_ref(), &test_rows)?;
    let report = TrainReport {
        accuracy,
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        classes: model.classes().to_vec(),
    };
    info!(
        accuracy = report.accuracy,
        train = report.train_rows,
        test = report.test_rows,
        "model trained"
    );
    Ok((report, model))
}
