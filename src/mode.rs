//! The single owner of pipeline mode state.
//!
//! Idle, Capturing and Predicting are mutually exclusive. Operator requests
//! mutate the state through the methods here; the frame pipeline only reads a
//! [`ModeSnapshot`] and offers feature vectors through [`ModeController::record`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{CaptureProgress, CaptureSession};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::types::{LandmarkVector, Sample};

/// Finished sessions remembered for late waiters.
const FINISHED_HISTORY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineMode {
    Idle,
    Capturing,
    Predicting,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineMode::Idle => "idle",
            PipelineMode::Capturing => "capturing",
            PipelineMode::Predicting => "predicting",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Mode {
    Idle,
    Capturing(CaptureSession),
    Predicting,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionEnd {
    Completed(CaptureProgress),
    Aborted(CaptureProgress),
    Stalled(CaptureProgress, Duration),
    Halted(String),
}

#[derive(Debug)]
struct ModeState {
    mode: Mode,
    next_session: u64,
    finished: VecDeque<(u64, SessionEnd)>,
    halted: Option<String>,
}

impl ModeState {
    fn finish(&mut self, id: u64, end: SessionEnd) {
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((id, end));
    }

    fn take_finished(&mut self, id: u64) -> Option<SessionEnd> {
        let pos = self.finished.iter().position(|(sid, _)| *sid == id)?;
        self.finished.remove(pos).map(|(_, end)| end)
    }
}

/// Read-only view handed to the frame pipeline each iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSnapshot {
    pub mode: PipelineMode,
    pub capture: Option<CaptureProgress>,
}

pub struct ModeController {
    state: Mutex<ModeState>,
    changed: Condvar,
    batch: Mutex<()>,
    dataset: Arc<Dataset>,
}

impl ModeController {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self {
            state: Mutex::new(ModeState {
                mode: Mode::Idle,
                next_session: 1,
                finished: VecDeque::new(),
                halted: None,
            }),
            changed: Condvar::new(),
            batch: Mutex::new(()),
            dataset,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes multi-class capture batches so they run one after another.
    pub(crate) fn batch_guard(&self) -> MutexGuard<'_, ()> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn mode(&self) -> PipelineMode {
        match self.lock().mode {
            Mode::Idle => PipelineMode::Idle,
            Mode::Capturing(_) => PipelineMode::Capturing,
            Mode::Predicting => PipelineMode::Predicting,
        }
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        let state = self.lock();
        match &state.mode {
            Mode::Idle => ModeSnapshot {
                mode: PipelineMode::Idle,
                capture: None,
            },
            Mode::Capturing(session) => ModeSnapshot {
                mode: PipelineMode::Capturing,
                capture: Some(session.progress()),
            },
            Mode::Predicting => ModeSnapshot {
                mode: PipelineMode::Predicting,
                capture: None,
            },
        }
    }

    fn ensure_running(state: &ModeState) -> Result<()> {
        match &state.halted {
            Some(reason) => Err(Error::PipelineDown(reason.clone())),
            None => Ok(()),
        }
    }

    /// Start a capture session for one class. Returns the session id to wait on.
    pub fn begin_capture(&self, class_name: &str, target: usize) -> Result<u64> {
        if class_name.trim().is_empty() {
            return Err(Error::InvalidArgument("class name must not be empty".into()));
        }
        if target == 0 {
            return Err(Error::InvalidArgument(
                "number of samples must be positive".into(),
            ));
        }

        let mut state = self.lock();
        Self::ensure_running(&state)?;
        match state.mode {
            Mode::Idle => {}
            Mode::Capturing(_) => {
                return Err(Error::ModeBusy {
                    mode: PipelineMode::Capturing,
                })
            }
            Mode::Predicting => {
                return Err(Error::ModeBusy {
                    mode: PipelineMode::Predicting,
                })
            }
        }

        let id = state.next_session;
        state.next_session += 1;
        state.mode = Mode::Capturing(CaptureSession::new(id, class_name, target));
        info!(class = class_name, target, session = id, "capture started");
        self.changed.notify_all();
        Ok(id)
    }

    /// Offer one frame's feature vector. Appends a sample when capturing and
    /// returns the updated progress; does nothing otherwise.
    pub fn record(&self, features: &LandmarkVector) -> Option<CaptureProgress> {
        let mut state = self.lock();
        let Mode::Capturing(session) = &mut state.mode else {
            return None;
        };

        let sample = Sample::new(session.class_name.clone(), features.clone());
        if let Err(e) = self.dataset.append(sample) {
            warn!("dropping capture frame: {}", e);
            return Some(session.progress());
        }
        session.advance();
        let progress = session.progress();
        debug!(class = %progress.class_name, captured = progress.captured, "sample captured");

        if progress.is_complete() {
            let id = session.id;
            state.mode = Mode::Idle;
            state.finish(id, SessionEnd::Completed(progress.clone()));
            info!(class = %progress.class_name, captured = progress.captured, "capture complete");
            self.changed.notify_all();
        }
        Some(progress)
    }

    /// Block until session `id` ends. A session that receives no sample for
    /// `stall_timeout` is aborted and reported as [`Error::CaptureStalled`].
    pub fn wait_for_session(
        &self,
        id: u64,
        stall_timeout: Option<Duration>,
    ) -> Result<CaptureProgress> {
        let mut state = self.lock();
        loop {
            if let Some(end) = state.take_finished(id) {
                return match end {
                    SessionEnd::Completed(progress) => Ok(progress),
                    SessionEnd::Aborted(p) => Err(Error::CaptureAborted {
                        class: p.class_name,
                        captured: p.captured,
                        target: p.target,
                    }),
                    SessionEnd::Stalled(p, waited) => Err(Error::CaptureStalled {
                        class: p.class_name,
                        captured: p.captured,
                        target: p.target,
                        waited,
                    }),
                    SessionEnd::Halted(reason) => Err(Error::PipelineDown(reason)),
                };
            }

            let idle_for = match &state.mode {
                Mode::Capturing(session) if session.id == id => session.last_progress.elapsed(),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "no capture session {id} to wait for"
                    )))
                }
            };

            state = match stall_timeout {
                Some(limit) if idle_for >= limit => {
                    self.end_session(&mut state, |p| SessionEnd::Stalled(p, limit));
                    warn!(session = id, "capture stalled after {:?} without a face", limit);
                    continue;
                }
                Some(limit) => {
                    self.changed
                        .wait_timeout(state, limit - idle_for)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn end_session(&self, state: &mut ModeState, end: impl FnOnce(CaptureProgress) -> SessionEnd) {
        if let Mode::Capturing(session) = &state.mode {
            let id = session.id;
            let progress = session.progress();
            state.mode = Mode::Idle;
            state.finish(id, end(progress));
            self.changed.notify_all();
        }
    }

    /// Cancel the active capture session, if any.
    pub fn abort_capture(&self) -> Option<CaptureProgress> {
        let mut state = self.lock();
        let progress = match &state.mode {
            Mode::Capturing(session) => session.progress(),
            _ => return None,
        };
        self.end_session(&mut state, SessionEnd::Aborted);
        info!(class = %progress.class_name, captured = progress.captured, "capture aborted");
        Some(progress)
    }

    pub fn enable_prediction(&self) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_running(&state)?;
        match state.mode {
            Mode::Capturing(_) => Err(Error::ModeBusy {
                mode: PipelineMode::Capturing,
            }),
            Mode::Predicting => Ok(()),
            Mode::Idle => {
                state.mode = Mode::Predicting;
                self.changed.notify_all();
                Ok(())
            }
        }
    }

    /// Leave Predicting. Returns whether the mode changed.
    pub fn disable_prediction(&self) -> bool {
        let mut state = self.lock();
        if matches!(state.mode, Mode::Predicting) {
            state.mode = Mode::Idle;
            self.changed.notify_all();
            true
        } else {
            false
        }
    }

    /// Run `f` on the dataset while holding the mode lock, refusing while a
    /// capture is active. No session can start until `f` returns.
    pub fn with_idle_dataset<T>(&self, f: impl FnOnce(&Dataset) -> T) -> Result<T> {
        let state = self.lock();
        if let Mode::Capturing(_) = state.mode {
            return Err(Error::ModeBusy {
                mode: PipelineMode::Capturing,
            });
        }
        Ok(f(&self.dataset))
    }

    /// Mark the pipeline as gone: end any capture with the halt reason, drop
    /// Predicting, and refuse new sessions.
    pub fn halt(&self, reason: &str) {
        let mut state = self.lock();
        let reason = state.halted.get_or_insert_with(|| reason.to_string()).clone();
        match state.mode {
            Mode::Capturing(_) => self.end_session(&mut state, |_| SessionEnd::Halted(reason)),
            Mode::Predicting => state.mode = Mode::Idle,
            Mode::Idle => {}
        }
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn controller() -> Arc<ModeController> {
        Arc::new(ModeController::new(Arc::new(Dataset::new())))
    }

    fn face() -> LandmarkVector {
        LandmarkVector::new(vec![0.5; 6])
    }

    #[test]
    fn capture_stops_exactly_at_target() {
        let modes = controller();
        let id = modes.begin_capture("happy", 3).unwrap();
        for _ in 0..5 {
            modes.record(&face());
        }
        assert_eq!(modes.mode(), PipelineMode::Idle);
        assert_eq!(modes.dataset().len(), 3);

        let done = modes.wait_for_session(id, None).unwrap();
        assert_eq!(done.captured, 3);
        assert!(done.is_complete());
    }

    #[test]
    fn begin_rejects_bad_arguments_without_state_change() {
        let modes = controller();
        assert!(matches!(
            modes.begin_capture("", 3),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            modes.begin_capture("happy", 0),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(modes.mode(), PipelineMode::Idle);
    }

    #[test]
    fn modes_are_exclusive() {
        let modes = controller();
        modes.begin_capture("happy", 2).unwrap();
        assert!(matches!(
            modes.begin_capture("sad", 2),
            Err(Error::ModeBusy {
                mode: PipelineMode::Capturing
            })
        ));
        assert!(modes.enable_prediction().is_err());

        modes.abort_capture();
        modes.enable_prediction().unwrap();
        assert!(matches!(
            modes.begin_capture("sad", 2),
            Err(Error::ModeBusy {
                mode: PipelineMode::Predicting
            })
        ));
        assert!(modes.record(&face()).is_none());
        assert!(modes.dataset().is_empty());
    }

    #[test]
    fn disable_prediction_is_idempotent() {
        let modes = controller();
        modes.enable_prediction().unwrap();
        assert!(modes.disable_prediction());
        let once = modes.snapshot();
        assert!(!modes.disable_prediction());
        assert_eq!(modes.snapshot(), once);
        assert_eq!(once.mode, PipelineMode::Idle);
    }

    #[test]
    fn waiter_wakes_when_pipeline_fills_session() {
        let modes = controller();
        let id = modes.begin_capture("happy", 4).unwrap();

        let feeder = {
            let modes = Arc::clone(&modes);
            thread::spawn(move || {
                while modes.mode() == PipelineMode::Capturing {
                    modes.record(&face());
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let done = modes
            .wait_for_session(id, Some(Duration::from_secs(5)))
            .unwrap();
        feeder.join().unwrap();
        assert_eq!(done.captured, 4);
        assert_eq!(modes.dataset().len(), 4);
    }

    #[test]
    fn stalled_session_is_aborted() {
        let modes = controller();
        let id = modes.begin_capture("happy", 4).unwrap();
        modes.record(&face());

        let err = modes
            .wait_for_session(id, Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(matches!(err, Error::CaptureStalled { captured: 1, target: 4, .. }));
        assert_eq!(modes.mode(), PipelineMode::Idle);
        assert_eq!(modes.dataset().len(), 1);
    }

    #[test]
    fn halt_reports_pipeline_down_to_waiters_and_blocks_new_sessions() {
        let modes = controller();
        let id = modes.begin_capture("happy", 4).unwrap();

        let waiter = {
            let modes = Arc::clone(&modes);
            thread::spawn(move || modes.wait_for_session(id, None))
        };
        thread::sleep(Duration::from_millis(20));
        modes.halt("camera unplugged");

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::PipelineDown(ref reason) if reason == "camera unplugged"));
        assert_eq!(modes.mode(), PipelineMode::Idle);
        assert!(matches!(
            modes.begin_capture("sad", 1),
            Err(Error::PipelineDown(_))
        ));
        assert!(matches!(modes.enable_prediction(), Err(Error::PipelineDown(_))));
    }

    #[test]
    fn idle_dataset_access_excludes_capture() {
        let modes = controller();
        modes.dataset().append(Sample::new("old", face())).unwrap();

        modes.begin_capture("happy", 2).unwrap();
        assert!(matches!(
            modes.with_idle_dataset(|ds| ds.clear()),
            Err(Error::ModeBusy {
                mode: PipelineMode::Capturing
            })
        ));
        assert_eq!(modes.dataset().len(), 1);
        modes.abort_capture();

        let starter = Arc::clone(&modes);
        let (dropped, racer) = modes
            .with_idle_dataset(|ds| {
                let racer = thread::spawn(move || {
                    starter.begin_capture("sad", 1).unwrap();
                    starter.record(&face())
                });
                thread::sleep(Duration::from_millis(20));
                let dropped = ds.clear();
                (dropped, racer)
            })
            .unwrap();
        let progress = racer.join().unwrap().unwrap();

        assert_eq!(dropped, 1);
        assert!(progress.is_complete());
        let labels: Vec<String> = modes.dataset().snapshot().into_iter().map(|s| s.label).collect();
        assert_eq!(labels, ["sad"]);
    }
}
