//! Shared application state and every operation an operator can request.
//!
//! The frame pipeline and the operator console each hold an `Arc<Studio>`.
//! Operator calls may block (a capture batch waits for its samples); the
//! pipeline-facing callbacks never do.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::capture::{self, CaptureProgress, CaptureRequest};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::inference::InferenceOverlay;
use crate::mode::{ModeController, PipelineMode};
use crate::model::Trainer;
use crate::store::ArtifactStore;
use crate::trainer::{self, SplitConfig, TrainReport};
use crate::types::MESH_POINTS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum PipelineHealth {
    Starting,
    Running,
    Stopped,
    Down(String),
}

impl fmt::Display for PipelineHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineHealth::Starting => f.write_str("starting"),
            PipelineHealth::Running => f.write_str("running"),
            PipelineHealth::Stopped => f.write_str("stopped"),
            PipelineHealth::Down(reason) => write!(f, "down ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames: u64,
    pub faces: u64,
    /// Frames the consumer was too slow to take.
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudioStatus {
    pub mode: PipelineMode,
    pub health: PipelineHealth,
    pub capture: Option<CaptureProgress>,
    pub dataset_rows: usize,
    pub samples_per_class: BTreeMap<String, usize>,
    pub model_loaded: bool,
    pub dataset_file: Option<PathBuf>,
    pub model_file: Option<PathBuf>,
    pub frames: FrameStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudioSettings {
    /// Mesh points per face; feature vectors hold three values per point.
    pub points: usize,
    pub split: SplitConfig,
    /// `None` waits for a face indefinitely.
    pub stall_timeout: Option<Duration>,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            points: MESH_POINTS,
            split: SplitConfig::default(),
            stall_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
struct Monitor {
    health: PipelineHealth,
    stats: FrameStats,
}

pub struct Studio {
    dataset: Arc<Dataset>,
    modes: ModeController,
    inference: InferenceOverlay,
    store: ArtifactStore,
    trainer: Box<dyn Trainer>,
    settings: StudioSettings,
    monitor: Mutex<Monitor>,
}

impl Studio {
    pub fn new(store: ArtifactStore, trainer: Box<dyn Trainer>, settings: StudioSettings) -> Self {
        let dataset = Arc::new(Dataset::new());
        Self {
            modes: ModeController::new(Arc::clone(&dataset)),
            dataset,
            inference: InferenceOverlay::new(),
            store,
            trainer,
            settings,
            monitor: Mutex::new(Monitor {
                health: PipelineHealth::Starting,
                stats: FrameStats::default(),
            }),
        }
    }

    fn monitor(&self) -> MutexGuard<'_, Monitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    pub fn inference(&self) -> &InferenceOverlay {
        &self.inference
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn settings(&self) -> &StudioSettings {
        &self.settings
    }

    pub fn feature_len(&self) -> usize {
        self.settings.points * 3
    }

    pub fn health(&self) -> PipelineHealth {
        self.monitor().health.clone()
    }

    /// Capture every requested class in order, blocking until the batch ends.
    pub fn capture_classes(&self, request: &CaptureRequest) -> Result<Vec<CaptureProgress>> {
        capture::capture_classes(&self.modes, request, self.settings.stall_timeout)
    }

    pub fn abort_capture(&self) -> Option<CaptureProgress> {
        self.modes.abort_capture()
    }

    /// Train on the persisted dataset, persist the model and make it active.
    /// Nothing is written when training fails.
    pub fn train_model(&self) -> Result<TrainReport> {
        let table = self.store.load_dataset(self.settings.points)?;
        let (report, model) = trainer::train(&table, self.trainer.as_ref(), self.settings.split)?;
        let bytes = model.to_bytes()?;
        self.store.save_model(&bytes)?;
        self.inference.install(Arc::from(model));
        Ok(report)
    }

    /// Load the persisted model and switch to Predicting. On any failure the
    /// mode is left unchanged.
    pub fn start_prediction(&self) -> Result<()> {
        let bytes = self.store.load_model_bytes()?;
        let model = self.trainer.load(&bytes)?;
        if model.feature_len() != self.feature_len() {
            return Err(Error::ShapeMismatch {
                expected: self.feature_len(),
                actual: model.feature_len(),
            });
        }
        self.inference.install(Arc::from(model));
        self.modes.enable_prediction()?;
        info!("prediction started");
        Ok(())
    }

    /// Leave Predicting if active. The loaded model stays in place.
    pub fn stop_prediction(&self) -> bool {
        let changed = self.modes.disable_prediction();
        if changed {
            info!("prediction stopped");
        }
        changed
    }

    /// Write the in-memory dataset to the dataset file.
    pub fn export_dataset(&self) -> Result<PathBuf> {
        let table = self.dataset.export_table(self.settings.points)?;
        Ok(self.store.save_dataset(&table)?.to_path_buf())
    }

    /// Bytes of the persisted model artifact.
    pub fn export_model(&self) -> Result<Vec<u8>> {
        self.store.load_model_bytes()
    }

    /// Replace the in-memory dataset with the persisted one.
    pub fn reload_dataset(&self) -> Result<usize> {
        let table = self.store.load_dataset(self.settings.points)?;
        let rows = self.modes.with_idle_dataset(|ds| ds.replace_all(table))?;
        info!(rows, "dataset reloaded from {}", self.store.dataset_path().display());
        Ok(rows)
    }

    pub fn clear_dataset(&self) -> Result<usize> {
        let dropped = self.modes.with_idle_dataset(Dataset::clear)?;
        info!(dropped, "dataset cleared");
        Ok(dropped)
    }

    pub fn status(&self) -> StudioStatus {
        let snapshot = self.modes.snapshot();
        let (health, frames) = {
            let monitor = self.monitor();
            (monitor.health.clone(), monitor.stats)
        };
        StudioStatus {
            mode: snapshot.mode,
            health,
            capture: snapshot.capture,
            dataset_rows: self.dataset.len(),
            samples_per_class: self.dataset.counts_by_label(),
            model_loaded: self.inference.is_loaded(),
            dataset_file: self
                .store
                .has_dataset()
                .then(|| self.store.dataset_path().to_path_buf()),
            model_file: self.store.has_model().then(|| self.store.model_path().to_path_buf()),
            frames,
        }
    }

    pub fn pipeline_started(&self) {
        self.monitor().health = PipelineHealth::Running;
    }

    pub fn record_frame(&self, face: bool, dropped: bool) {
        let mut monitor = self.monitor();
        monitor.stats.frames += 1;
        if face {
            monitor.stats.faces += 1;
        }
        if dropped {
            monitor.stats.dropped += 1;
        }
    }

    /// The pipeline was asked to stop and has exited.
    pub fn pipeline_stopped(&self) {
        {
            let mut monitor = self.monitor();
            if !matches!(monitor.health, PipelineHealth::Down(_)) {
                monitor.health = PipelineHealth::Stopped;
            }
        }
        self.modes.halt("frame pipeline stopped");
        info!("frame pipeline stopped");
    }

    /// The pipeline died (camera lost, consumer gone). Pending captures are
    /// aborted and later requests fail with [`Error::PipelineDown`].
    pub fn pipeline_down(&self, reason: &str) {
        self.monitor().health = PipelineHealth::Down(reason.to_string());
        self.modes.halt(reason);
        error!("frame pipeline down: {}", reason);
    }
}
