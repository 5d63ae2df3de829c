//! Scripted devices, fake classifiers and a recording output shared by the
//! integration tests.
#![allow(dead_code)]

use chrono::Utc;
use cropcam::capture::{FrameSource, StreamFormat};
use cropcam::classify::{ClassificationResult, Classifier};
use cropcam::output::OutputSink;
use cropcam::{CaptureSettings, Frame, InferenceError, OpenError};
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TEST_FORMAT: StreamFormat = StreamFormat {
    width: 64,
    height: 48,
    fps: 30,
};

/// Build a result without going through a model.
pub fn result(label: &str, confidence: f32) -> ClassificationResult {
    ClassificationResult {
        label: label.to_string(),
        confidence,
        scores: BTreeMap::from([(label.to_string(), confidence)]),
        produced_at: Utc::now(),
    }
}

pub fn frame(sequence: u64) -> Frame {
    let image = RgbImage::from_pixel(TEST_FORMAT.width, TEST_FORMAT.height, Rgb([90, 140, 60]));
    Frame::new(image, sequence)
}

/// Delivers a fixed number of frames, then fails every read.
///
/// `releases` counts open-to-closed transitions, so a device released
/// twice shows up as 2.
pub struct ScriptedSource {
    frames_left: u64,
    next_sequence: u64,
    open: bool,
    releases: Arc<AtomicUsize>,
    pace: Option<Duration>,
    on_frame: Option<Box<dyn FnMut(u64) + Send>>,
}

impl ScriptedSource {
    pub fn new(frames: u64, releases: Arc<AtomicUsize>) -> Self {
        Self {
            frames_left: frames,
            next_sequence: 0,
            open: true,
            releases,
            pace: None,
            on_frame: None,
        }
    }

    /// Sleep before every delivered frame, like a real camera.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Called with each frame's sequence number as it is read.
    pub fn on_frame(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_frame = Some(Box::new(hook));
        self
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Option<Frame> {
        if !self.open || self.frames_left == 0 {
            return None;
        }
        self.frames_left -= 1;

        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some(hook) = self.on_frame.as_mut() {
            hook(sequence);
        }
        Some(frame(sequence))
    }

    fn format(&self) -> StreamFormat {
        TEST_FORMAT
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub type Opener =
    Box<dyn FnMut(&CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> + Send>;

/// Opens a fresh [`ScriptedSource`] of `frames` frames on every run.
pub fn scripted(frames: u64, releases: &Arc<AtomicUsize>) -> Opener {
    let releases = Arc::clone(releases);
    Box::new(move |_settings: &CaptureSettings| -> Result<Box<dyn FrameSource>, OpenError> {
        Ok(Box::new(ScriptedSource::new(frames, Arc::clone(&releases))))
    })
}

/// A camera that keeps delivering frames every few milliseconds.
pub fn live(releases: &Arc<AtomicUsize>) -> Opener {
    let releases = Arc::clone(releases);
    Box::new(move |_settings: &CaptureSettings| -> Result<Box<dyn FrameSource>, OpenError> {
        Ok(Box::new(
            ScriptedSource::new(u64::MAX, Arc::clone(&releases)).paced(Duration::from_millis(5)),
        ))
    })
}

/// Always answers with the same label.
pub struct FixedClassifier {
    label: String,
    confidence: f32,
    pub calls: Arc<AtomicUsize>,
}

impl FixedClassifier {
    pub fn new(label: &str, confidence: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Classifier for FixedClassifier {
    fn classify(&mut self, input: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        assert_eq!(input.dimensions(), self.input_size());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(result(&self.label, self.confidence))
    }

    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }
}

/// Succeeds on even calls, fails on odd ones.
#[derive(Default)]
pub struct AlternatingClassifier {
    calls: u64,
}

impl Classifier for AlternatingClassifier {
    fn classify(&mut self, _input: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        let call = self.calls;
        self.calls += 1;
        if call % 2 == 1 {
            return Err(InferenceError::InvalidOutput(format!("scripted failure {}", call)));
        }
        Ok(result("leaf_curl", 0.8))
    }

    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }
}

/// Takes `delay` per call and records how many calls overlap.
pub struct SlowClassifier {
    delay: Duration,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Classifier for SlowClassifier {
    fn classify(&mut self, _input: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(result("healthy", 0.9))
    }

    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }
}

/// Blocks until the gate opens, or five seconds pass. Once open it stays
/// open, and `finished_at` records when the first call returned.
pub struct GatedClassifier {
    gate: Receiver<()>,
    opened: bool,
    pub finished_at: Arc<Mutex<Option<Instant>>>,
}

impl GatedClassifier {
    pub fn new(gate: Receiver<()>) -> Self {
        Self {
            gate,
            opened: false,
            finished_at: Arc::new(Mutex::new(None)),
        }
    }
}

impl Classifier for GatedClassifier {
    fn classify(&mut self, _input: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        if !self.opened {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            self.opened = true;
            *self.finished_at.lock().unwrap() = Some(Instant::now());
        }
        Ok(result("whitefly", 0.95))
    }

    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }
}

/// Opens a source that releases `gate` once `after` frames have been read.
pub fn gated_source(
    frames: u64,
    after: u64,
    gate: Sender<()>,
    releases: &Arc<AtomicUsize>,
) -> Opener {
    let releases = Arc::clone(releases);
    Box::new(move |_settings: &CaptureSettings| -> Result<Box<dyn FrameSource>, OpenError> {
        let gate = gate.clone();
        Ok(Box::new(
            ScriptedSource::new(frames, Arc::clone(&releases)).on_frame(move |sequence| {
                if sequence + 1 == after {
                    let _ = gate.send(());
                }
            }),
        ))
    })
}

/// Records when each frame reached the display.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub writes: Arc<Mutex<Vec<Instant>>>,
}

impl RecordingOutput {
    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl OutputSink for RecordingOutput {
    fn write_frame(&mut self, _frame: &RgbImage) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(Instant::now());
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
