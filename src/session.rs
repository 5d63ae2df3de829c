//! Capture session: device lifecycle, the capture loop, and the control
//! surface handed to outer layers.

use crate::capture::{DeviceGuard, DeviceOpener, StreamFormat, MAX_CONSECUTIVE_READ_FAILURES};
use crate::classify::{ClassificationResult, Classifier, Preprocessor};
use crate::config::SessionConfig;
use crate::error::{CaptureError, SnapshotError};
use crate::frame::Frame;
use crate::inference::{lock, CachedResult, InferenceScheduler, ResultCache, SchedulerStats};
use crate::knowledge::{BuiltinKnowledgeBase, KnowledgeBase};
use crate::output::{NullOutput, OutputSink};
use crate::overlay;
use crate::snapshot::{
    DeviceSettings, SnapshotRecord, SnapshotReply, SnapshotWorker, SnapshotWriter,
};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Frames between throughput reports.
const STATS_INTERVAL: u64 = 30;

/// Commands accepted by a running capture loop.
pub enum Control {
    /// Finish the current iteration and tear down
    Stop,
    /// Save the current frame with the latest result
    Save(SnapshotReply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Disconnected,
    Error,
}

/// Device status as reported to outer layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub status: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceStatus {
    pub fn disconnected() -> Self {
        Self {
            status: DeviceState::Disconnected,
            width: None,
            height: None,
            fps: None,
            error: None,
        }
    }

    pub fn connected(format: StreamFormat) -> Self {
        Self {
            status: DeviceState::Connected,
            width: Some(format.width),
            height: Some(format.height),
            fps: Some(format.fps),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            status: DeviceState::Error,
            ..Self::disconnected()
        }
    }
}

/// Totals for one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub frames: u64,
    pub inference: SchedulerStats,
}

struct SessionShared {
    status: Mutex<DeviceStatus>,
    /// Controls are only sent while this is held and true, so the drain
    /// after a run ends sees every control sent during it
    running: Mutex<bool>,
}

/// Cloneable control surface for a [`CaptureSession`].
#[derive(Clone)]
pub struct SessionHandle {
    controls: Sender<Control>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Ask the running loop to stop. Does nothing when not running, so
    /// repeated calls are harmless.
    pub fn stop(&self) {
        let running = lock(&self.shared.running);
        if *running {
            let _ = self.controls.send(Control::Stop);
        }
    }

    /// Ask for a snapshot of the current frame. The outcome arrives on the
    /// returned receiver.
    pub fn request_snapshot(&self) -> Receiver<Result<SnapshotRecord, SnapshotError>> {
        let (tx, rx) = mpsc::channel();
        let running = lock(&self.shared.running);
        if !*running {
            let _ = tx.send(Err(SnapshotError::NotRunning));
        } else if let Err(mpsc::SendError(Control::Save(tx))) =
            self.controls.send(Control::Save(tx))
        {
            let _ = tx.send(Err(SnapshotError::NotRunning));
        }
        drop(running);
        rx
    }

    pub fn status(&self) -> DeviceStatus {
        lock(&self.shared.status).clone()
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.shared.running)
    }
}

/// Owns everything one capture pipeline needs and drives it.
///
/// The camera is opened at the start of [`CaptureSession::run`] and
/// released before it returns, on every path. A session can be run again
/// after it stops; the classifier is carried over between runs.
pub struct CaptureSession {
    config: SessionConfig,
    opener: Box<dyn DeviceOpener>,
    classifier: Option<Box<dyn Classifier>>,
    output: Box<dyn OutputSink>,
    knowledge: Arc<dyn KnowledgeBase>,
    cache: Arc<ResultCache>,
    controls_tx: Sender<Control>,
    controls: Receiver<Control>,
    shared: Arc<SessionShared>,
}

impl CaptureSession {
    /// Create a session in passthrough mode with a headless output.
    pub fn new(config: SessionConfig, opener: impl DeviceOpener + 'static) -> Self {
        let (controls_tx, controls) = mpsc::channel();
        Self {
            config,
            opener: Box::new(opener),
            classifier: None,
            output: Box::new(NullOutput::new()),
            knowledge: Arc::new(BuiltinKnowledgeBase),
            cache: Arc::new(ResultCache::new()),
            controls_tx,
            controls,
            shared: Arc::new(SessionShared {
                status: Mutex::new(DeviceStatus::disconnected()),
                running: Mutex::new(false),
            }),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_output(mut self, output: Box<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            controls: self.controls_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// The cache the overlay reads from.
    pub fn result_cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn status(&self) -> DeviceStatus {
        lock(&self.shared.status).clone()
    }

    /// Run the capture loop until stopped or the device is lost.
    ///
    /// Teardown waits for any in-flight classification and pending
    /// snapshots before the device is released.
    pub fn run(&mut self) -> Result<RunSummary, CaptureError> {
        self.reject_pending_controls();
        *lock(&self.shared.running) = true;

        let outcome = self.run_inner();

        *lock(&self.shared.running) = false;
        self.reject_pending_controls();
        self.finish(outcome)
    }

    fn run_inner(&mut self) -> Result<RunSummary, CaptureError> {
        let mut device = self.open_device()?;
        let format = device.format();
        self.cache.clear();

        tracing::info!("Capture: {}x{} @ {} fps", format.width, format.height, format.fps);
        tracing::info!("Output: {}", self.output.describe());

        let writer = SnapshotWriter::new(
            self.config.snapshot_dir.clone(),
            DeviceSettings::new(self.config.capture.device_index, format),
        )
        .with_knowledge(Arc::clone(&self.knowledge), self.config.overlay.clone());
        let mut snapshots = SnapshotWorker::spawn(writer).map_err(CaptureError::Worker)?;

        let mut scheduler = match self.classifier.take() {
            Some(classifier) => Some(
                InferenceScheduler::spawn(
                    classifier,
                    Arc::clone(&self.cache),
                    self.config.inference_interval,
                )
                .map_err(CaptureError::Worker)?,
            ),
            None => {
                tracing::info!("Running in passthrough mode (no inference)");
                None
            }
        };

        let outcome = self.capture_loop(&mut device, scheduler.as_ref(), &snapshots);

        // Inference must reach Idle before the device goes away
        let inference = match scheduler.as_mut() {
            Some(scheduler) => {
                let stats = scheduler.stats();
                self.classifier = scheduler.shutdown();
                stats
            }
            None => SchedulerStats::default(),
        };
        snapshots.shutdown();
        device.close();

        outcome.map(|frames| RunSummary { frames, inference })
    }

    /// Capture and classify a single frame, then save it.
    ///
    /// Inference failures are logged and the snapshot is saved without a
    /// classification.
    pub fn capture_once(&mut self) -> Result<SnapshotRecord, CaptureError> {
        let outcome = self.capture_once_inner();
        self.finish(outcome)
    }

    fn capture_once_inner(&mut self) -> Result<SnapshotRecord, CaptureError> {
        let mut device = self.open_device()?;
        let format = device.format();
        let frame = device.read_frame_tolerant()?;
        tracing::info!("Image captured, analyzing");

        let classification = self.classify_now(&frame);
        let writer = SnapshotWriter::new(
            self.config.snapshot_dir.clone(),
            DeviceSettings::new(self.config.capture.device_index, format),
        )
        .with_knowledge(Arc::clone(&self.knowledge), self.config.overlay.clone());
        let record = writer.save(&frame, classification.as_ref())?;

        device.close();
        Ok(record)
    }

    /// Open the device, report its status, and release it.
    pub fn probe(&mut self) -> Result<DeviceStatus, CaptureError> {
        let outcome = self.open_device().map(|mut device| {
            let status = DeviceStatus::connected(device.format());
            device.close();
            status
        });
        self.finish(outcome)
    }

    fn open_device(&mut self) -> Result<DeviceGuard, CaptureError> {
        let source = self.opener.open(&self.config.capture)?;
        let device = DeviceGuard::new(source);
        self.set_status(DeviceStatus::connected(device.format()));
        Ok(device)
    }

    fn classify_now(&mut self, frame: &Frame) -> Option<ClassificationResult> {
        let classifier = self.classifier.as_mut()?;
        let (width, height) = classifier.input_size();
        let input = Preprocessor::new(width, height).resize(&frame.image);
        match classifier.classify(&input) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!("Inference failed: {}", e);
                None
            }
        }
    }

    fn finish<T>(&self, outcome: Result<T, CaptureError>) -> Result<T, CaptureError> {
        let status = match &outcome {
            Ok(_) => DeviceStatus::disconnected(),
            Err(e) => DeviceStatus::error(e.to_string()),
        };
        self.set_status(status);
        outcome
    }

    fn set_status(&self, status: DeviceStatus) {
        *lock(&self.shared.status) = status;
    }

    /// Drop stop requests and refuse saves that arrived while no loop was
    /// running to serve them.
    fn reject_pending_controls(&self) {
        for control in self.controls.try_iter() {
            if let Control::Save(reply) = control {
                let _ = reply.send(Err(SnapshotError::NotRunning));
            }
        }
    }

    fn capture_loop(
        &mut self,
        device: &mut DeviceGuard,
        scheduler: Option<&InferenceScheduler>,
        snapshots: &SnapshotWorker,
    ) -> Result<u64, CaptureError> {
        let mut consecutive_failures = 0u32;
        let mut current: Option<Frame> = None;
        let mut announced: Option<u64> = None;
        let mut output_failing = false;

        let mut frame_count = 0u64;
        let mut total_capture_time = Duration::ZERO;
        let mut total_overlay_time = Duration::ZERO;
        let mut total_output_time = Duration::ZERO;

        tracing::info!("Starting capture loop");

        loop {
            // Capture frame
            let capture_start = Instant::now();
            let read = device.read_frame();
            total_capture_time += capture_start.elapsed();

            if let Some(frame) = read {
                consecutive_failures = 0;

                if let Some(scheduler) = scheduler {
                    scheduler.offer(&frame);
                }

                // Overlay is drawn on a copy; `frame` stays as captured
                let overlay_start = Instant::now();
                let latest = self.cache.latest();
                let annotated = latest.as_ref().map(|cached| {
                    let ops =
                        overlay::plan(&cached.result, &self.config.overlay, frame.dimensions());
                    if announced != Some(cached.sequence) {
                        announced = Some(cached.sequence);
                        self.announce(cached, &ops);
                    }
                    let mut display = frame.image.clone();
                    overlay::render(&mut display, &ops);
                    display
                });
                total_overlay_time += overlay_start.elapsed();

                // Output frame
                let output_start = Instant::now();
                let written = self.output.write_frame(annotated.as_ref().unwrap_or(&frame.image));
                total_output_time += output_start.elapsed();
                match written {
                    Ok(()) => output_failing = false,
                    Err(e) if !output_failing => {
                        tracing::warn!("Failed to write frame: {:#}", e);
                        output_failing = true;
                    }
                    Err(_) => {}
                }

                current = Some(frame);
                frame_count += 1;

                // Log stats every 30 frames
                if frame_count % STATS_INTERVAL == 0 {
                    let avg = |total: Duration| total.as_secs_f64() * 1000.0 / frame_count as f64;
                    let avg_capture_ms = avg(total_capture_time);
                    let avg_overlay_ms = avg(total_overlay_time);
                    let avg_output_ms = avg(total_output_time);
                    let total_ms = avg_capture_ms + avg_overlay_ms + avg_output_ms;
                    tracing::info!(
                        "Frame {}: capture={:.1}ms, overlay={:.1}ms, output={:.1}ms, \
                         total={:.1}ms, fps={:.1}",
                        frame_count,
                        avg_capture_ms,
                        avg_overlay_ms,
                        avg_output_ms,
                        total_ms,
                        1000.0 / total_ms.max(f64::EPSILON)
                    );
                }
            } else {
                consecutive_failures += 1;
                tracing::debug!(
                    "Frame read failed ({}/{})",
                    consecutive_failures,
                    MAX_CONSECUTIVE_READ_FAILURES
                );
                if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    tracing::error!("Camera stopped delivering frames");
                    return Err(CaptureError::DeviceLost {
                        failures: consecutive_failures,
                    });
                }
            }

            // Control input
            let mut stop = false;
            for control in self.controls.try_iter() {
                match control {
                    Control::Stop => stop = true,
                    Control::Save(reply) => match &current {
                        Some(frame) => {
                            let classification =
                                self.cache.latest().map(|cached| cached.result.clone());
                            snapshots.submit(frame.clone(), classification, reply);
                        }
                        None => {
                            let _ = reply.send(Err(SnapshotError::NoFrame));
                        }
                    },
                }
            }
            if stop {
                tracing::info!("Stop requested after {} frames", frame_count);
                return Ok(frame_count);
            }
        }
    }

    fn announce(&self, cached: &CachedResult, ops: &[overlay::DrawOp]) {
        let result = &cached.result;
        tracing::info!(
            "Frame {}: {} [{:?}]",
            cached.sequence,
            overlay::captions(ops).join(", "),
            overlay::assess(result, &self.config.overlay)
        );
        if self.config.overlay.is_flagged(&result.label, result.confidence) {
            let advice = self.knowledge.lookup(&result.label);
            tracing::warn!(
                "{} detected, urgency {:?}. {}",
                advice.name,
                advice.urgency,
                advice.treatment.first().map(String::as_str).unwrap_or("")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSource;
    use crate::config::CaptureSettings;
    use crate::error::OpenError;

    fn unavailable(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> {
        Err(OpenError::DeviceUnavailable {
            index: settings.device_index,
            reason: "unplugged".to_string(),
        })
    }

    #[test]
    fn open_failure_is_surfaced_and_reported() {
        let mut session = CaptureSession::new(SessionConfig::default(), unavailable);
        let handle = session.handle();

        let err = session.run().unwrap_err();
        assert!(matches!(err, CaptureError::Open(OpenError::DeviceUnavailable { index: 0, .. })));
        assert_eq!(handle.status().status, DeviceState::Error);
        assert!(!handle.is_running());
    }

    #[test]
    fn handle_refuses_snapshots_when_idle() {
        let session = CaptureSession::new(SessionConfig::default(), unavailable);
        let rx = session.handle().request_snapshot();
        assert!(matches!(rx.recv().unwrap(), Err(SnapshotError::NotRunning)));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceStatus::connected(StreamFormat {
            width: 640,
            height: 480,
            fps: 30,
        }))
        .unwrap();
        assert_eq!(json, r#"{"status":"connected","width":640,"height":480,"fps":30}"#);
    }
}
