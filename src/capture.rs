use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::mode::ModeController;

/// Live state of one class's capture session.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: u64,
    pub class_name: String,
    pub target: usize,
    pub captured: usize,
    pub last_progress: Instant,
}

impl CaptureSession {
    pub fn new(id: u64, class_name: &str, target: usize) -> Self {
        Self {
            id,
            class_name: class_name.to_string(),
            target,
            captured: 0,
            last_progress: Instant::now(),
        }
    }

    pub fn advance(&mut self) {
        self.captured += 1;
        self.last_progress = Instant::now();
    }

    pub fn progress(&self) -> CaptureProgress {
        CaptureProgress {
            class_name: self.class_name.clone(),
            captured: self.captured,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureProgress {
    pub class_name: String,
    pub captured: usize,
    pub target: usize,
}

impl CaptureProgress {
    pub fn is_complete(&self) -> bool {
        self.captured >= self.target
    }

    pub fn label(&self) -> String {
        format!("Capturing: {} ({}/{})", self.class_name, self.captured, self.target)
    }
}

/// A validated request to fill `samples_per_class` samples for each class in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    classes: Vec<String>,
    samples_per_class: usize,
}

impl CaptureRequest {
    pub fn new<I, S>(classes: I, samples_per_class: i64) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: Vec<String> = classes
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .collect();
        if classes.is_empty() {
            return Err(Error::InvalidArgument("no class names given".into()));
        }
        if classes.iter().any(String::is_empty) {
            return Err(Error::InvalidArgument("class names must not be empty".into()));
        }
        if samples_per_class <= 0 {
            return Err(Error::InvalidArgument(format!(
                "number of samples must be positive, got {samples_per_class}"
            )));
        }
        Ok(Self {
            classes,
            samples_per_class: samples_per_class as usize,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn samples_per_class(&self) -> usize {
        self.samples_per_class
    }
}

/// Run each class of `request` to completion, one after another.
///
/// Blocks the caller (never the frame pipeline). Concurrent callers queue on
/// the controller's batch lock, so samples of two classes never interleave.
pub fn capture_classes(
    modes: &ModeController,
    request: &CaptureRequest,
    stall_timeout: Option<Duration>,
) -> Result<Vec<CaptureProgress>> {
    let _batch = modes.batch_guard();
    let mut done = Vec::with_capacity(request.classes.len());
    for class_name in &request.classes {
        let id = modes.begin_capture(class_name, request.samples_per_class)?;
        done.push(modes.wait_for_session(id, stall_timeout)?);
    }
    info!(classes = done.len(), "capture batch finished");
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::mode::PipelineMode;
    use crate::types::LandmarkVector;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn request_validation() {
        assert!(CaptureRequest::new(Vec::<String>::new(), 10).is_err());
        assert!(CaptureRequest::new(["happy", " "], 10).is_err());
        assert!(CaptureRequest::new(["happy"], 0).is_err());
        assert!(CaptureRequest::new(["happy"], -3).is_err());

        let req = CaptureRequest::new([" happy ", "sad"], 5).unwrap();
        assert_eq!(req.classes(), ["happy", "sad"]);
        assert_eq!(req.samples_per_class(), 5);
    }

    #[test]
    fn progress_label() {
        let mut session = CaptureSession::new(1, "happy", 20);
        session.advance();
        assert_eq!(session.progress().label(), "Capturing: happy (1/20)");
    }

    #[test]
    fn classes_are_captured_in_contiguous_blocks() {
        let modes = Arc::new(ModeController::new(Arc::new(Dataset::new())));
        let stop = Arc::new(AtomicBool::new(false));
        let feeder = {
            let modes = Arc::clone(&modes);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let face = LandmarkVector::new(vec![0.1; 6]);
                while !stop.load(Ordering::Relaxed) {
                    modes.record(&face);
                    thread::yield_now();
                }
            })
        };

        let request = CaptureRequest::new(["a", "b"], 10).unwrap();
        let done = capture_classes(&modes, &request, Some(Duration::from_secs(5))).unwrap();
        stop.store(true, Ordering::Relaxed);
        feeder.join().unwrap();

        assert_eq!(done.len(), 2);
        let labels: Vec<String> = modes
            .dataset()
            .snapshot()
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels.len(), 20);
        assert!(labels[..10].iter().all(|l| l == "a"));
        assert!(labels[10..].iter().all(|l| l == "b"));
        assert_eq!(modes.mode(), PipelineMode::Idle);
    }
}
