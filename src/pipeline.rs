//! The continuously running frame loop.
//!
//! Per frame: read, mirror, extract landmarks, feed the capture session or
//! the classifier, paint, encode, hand to the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::imageops;
use tracing::{debug, error, info, warn};

use crate::camera::FrameSource;
use crate::capture::CaptureProgress;
use crate::error::{Error, Result};
use crate::landmarks::{LandmarkDetector, LandmarkExtractor};
use crate::mode::PipelineMode;
use crate::output::{encode_jpeg, Delivery, EncodedFrame, FrameSink};
use crate::overlay::{Annotations, FramePainter};
use crate::studio::Studio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub mirror: bool,
    pub jpeg_quality: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mirror: true,
            jpeg_quality: 80,
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub seq: u64,
    pub face: bool,
    /// Capture progress after this frame, while a session is running.
    pub captured: Option<CaptureProgress>,
    pub prediction: Option<String>,
    /// `None` when the frame could not be encoded.
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExit {
    Stopped,
    Failed(String),
}

pub struct FramePipeline<S, D, K> {
    studio: Arc<Studio>,
    source: S,
    extractor: LandmarkExtractor<D>,
    painter: FramePainter,
    sink: K,
    options: PipelineOptions,
    seq: u64,
}

impl<S, D, K> FramePipeline<S, D, K>
where
    S: FrameSource,
    D: LandmarkDetector,
    K: FrameSink,
{
    pub fn new(
        studio: Arc<Studio>,
        source: S,
        detector: D,
        painter: FramePainter,
        sink: K,
        options: PipelineOptions,
    ) -> Self {
        let extractor = LandmarkExtractor::with_points(detector, studio.settings().points);
        Self {
            studio,
            source,
            extractor,
            painter,
            sink,
            options,
            seq: 0,
        }
    }

    /// Process one frame. Fails with [`Error::CameraUnavailable`] when the
    /// source is gone and [`Error::PipelineDown`] when the consumer is.
    pub fn step(&mut self) -> Result<FrameReport> {
        let mut frame = self
            .source
            .next_frame()
            .map_err(|e| Error::CameraUnavailable(format!("{:#}", e)))?;
        if self.options.mirror {
            imageops::flip_horizontal_in_place(&mut frame);
        }
        self.seq += 1;

        let extraction = self.extractor.extract(&frame);
        let modes = self.studio.modes();
        let snapshot = modes.snapshot();

        let mut captured = snapshot.capture;
        let mut prediction = None;
        if let Some(found) = &extraction {
            match snapshot.mode {
                PipelineMode::Capturing => {
                    if let Some(progress) = modes.record(&found.features) {
                        captured = Some(progress);
                    }
                }
                PipelineMode::Predicting => match self.studio.inference().predict(&found.features) {
                    Ok(label) => prediction = Some(label),
                    Err(e) => debug!(seq = self.seq, "no prediction: {}", e),
                },
                PipelineMode::Idle => {}
            }
        }

        let capture_text = captured.as_ref().map(|p| p.label());
        self.painter.paint(
            &mut frame,
            &Annotations {
                mesh: extraction.as_ref().map(|e| &e.landmarks),
                capture: capture_text.as_deref(),
                prediction: prediction.as_deref(),
            },
        );

        let delivery = match encode_jpeg(&frame, self.options.jpeg_quality) {
            Ok(jpeg) => {
                let encoded = EncodedFrame {
                    seq: self.seq,
                    width: frame.width(),
                    height: frame.height(),
                    jpeg,
                };
                let delivery = self
                    .sink
                    .deliver(encoded)
                    .map_err(|e| Error::PipelineDown(format!("{:#}", e)))?;
                Some(delivery)
            }
            Err(e) => {
                warn!(seq = self.seq, "skipping frame: {:#}", e);
                None
            }
        };

        let face = extraction.is_some();
        self.studio
            .record_frame(face, delivery == Some(Delivery::Dropped));
        Ok(FrameReport {
            seq: self.seq,
            face,
            captured,
            prediction,
            delivery,
        })
    }

    /// Step until `stop` is set or a step fails, then tell the studio why.
    pub fn run(&mut self, stop: &AtomicBool) -> PipelineExit {
        info!(
            source = %self.source.name(),
            detector = %self.extractor.detector_name(),
            "frame pipeline running"
        );
        self.studio.pipeline_started();
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                let reason = e.to_string();
                self.studio.pipeline_down(&reason);
                return PipelineExit::Failed(reason);
            }
        }
        self.studio.pipeline_stopped();
        PipelineExit::Stopped
    }
}

pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<PipelineExit>>,
}

impl PipelineHandle {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(mut self) -> PipelineExit {
        self.request_stop();
        self.wait()
    }

    fn wait(&mut self) -> PipelineExit {
        match self.join.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => PipelineExit::Failed("frame pipeline panicked".to_string()),
            None => PipelineExit::Stopped,
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.request_stop();
        let _ = self.wait();
    }
}

/// Run a pipeline on its own thread. `build` runs on that thread, so the
/// camera and model sessions it opens never cross threads.
pub fn spawn<F, S, D, K>(studio: Arc<Studio>, build: F) -> std::io::Result<PipelineHandle>
where
    F: FnOnce(Arc<Studio>) -> anyhow::Result<FramePipeline<S, D, K>> + Send + 'static,
    S: FrameSource + 'static,
    D: LandmarkDetector + 'static,
    K: FrameSink + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let join = thread::Builder::new()
        .name("frame-pipeline".to_string())
        .spawn(move || match build(Arc::clone(&studio)) {
            Ok(mut pipeline) => pipeline.run(&flag),
            Err(e) => {
                let reason = Error::CameraUnavailable(format!("{:#}", e)).to_string();
                error!("failed to start frame pipeline: {:#}", e);
                studio.pipeline_down(&reason);
                PipelineExit::Failed(reason)
            }
        })?;
    Ok(PipelineHandle {
        stop,
        join: Some(join),
    })
}
