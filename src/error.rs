use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mode::PipelineMode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Pipeline is busy ({mode})")]
    ModeBusy { mode: PipelineMode },

    #[error("No dataset found at {}. Capture and export the data first.", .0.display())]
    DataMissing(PathBuf),

    #[error("Dataset has too few rows to train on")]
    EmptyDataset,

    #[error("Dataset only contains the class '{0}'; at least two classes are needed")]
    SingleClass(String),

    #[error("No trained model found at {}. Train the model first.", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Feature vector has {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("No face seen for {waited:?} while capturing '{class}' ({captured}/{target})")]
    CaptureStalled {
        class: String,
        captured: usize,
        target: usize,
        waited: Duration,
    },

    #[error("Capture of '{class}' was aborted at {captured}/{target}")]
    CaptureAborted {
        class: String,
        captured: usize,
        target: usize,
    },

    #[error("Frame pipeline is down: {0}")]
    PipelineDown(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Model serialization error: {0}")]
    ModelCodec(#[from] bincode::Error),

    #[error("Training failed: {0}")]
    Fit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
