//! Persisting frames with their classification metadata.
//!
//! Each snapshot is a JPEG plus, when a classification was available, a
//! JSON sidecar with the same stem. File stems combine a microsecond
//! timestamp with a process-wide counter, so names never collide within a
//! run and sort in save order.

use crate::capture::StreamFormat;
use crate::classify::ClassificationResult;
use crate::config::OverlayPolicy;
use crate::error::SnapshotError;
use crate::frame::Frame;
use crate::knowledge::{KnowledgeBase, Remediation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Saves that may wait behind the one being written.
pub const SNAPSHOT_QUEUE_DEPTH: usize = 4;

static SNAPSHOT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Camera configuration recorded alongside each snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceSettings {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl DeviceSettings {
    pub fn new(device_index: u32, format: StreamFormat) -> Self {
        Self {
            device_index,
            width: format.width,
            height: format.height,
            fps: format.fps,
        }
    }
}

/// A persisted snapshot. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub image_path: PathBuf,
    /// Sidecar location; `None` when no classification was available
    #[serde(skip)]
    pub metadata_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub frame_sequence: u64,
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
    pub device_settings: DeviceSettings,
}

/// Writes snapshot images and metadata sidecars into one directory.
pub struct SnapshotWriter {
    dir: PathBuf,
    device: DeviceSettings,
    advice: Option<(Arc<dyn KnowledgeBase>, OverlayPolicy)>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, device: DeviceSettings) -> Self {
        Self {
            dir: dir.into(),
            device,
            advice: None,
        }
    }

    /// Attach remediation advice to sidecars of flagged classifications.
    pub fn with_knowledge(
        mut self,
        knowledge: Arc<dyn KnowledgeBase>,
        policy: OverlayPolicy,
    ) -> Self {
        self.advice = Some((knowledge, policy));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `frame` and, if given, its classification.
    ///
    /// A failure after the image is on disk is reported as
    /// [`SnapshotError::Metadata`], which carries the record so the caller
    /// may retry with [`SnapshotWriter::write_metadata`].
    pub fn save(
        &self,
        frame: &Frame,
        classification: Option<&ClassificationResult>,
    ) -> Result<SnapshotRecord, SnapshotError> {
        self.save_as(&next_stem(), frame, classification)
    }

    fn save_as(
        &self,
        stem: &str,
        frame: &Frame,
        classification: Option<&ClassificationResult>,
    ) -> Result<SnapshotRecord, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let image_path = self.dir.join(format!("{}.jpg", stem));
        frame.image.save(&image_path)?;

        let remediation = match (&self.advice, classification) {
            (Some((knowledge, policy)), Some(result))
                if policy.is_flagged(&result.label, result.confidence) =>
            {
                Some(knowledge.lookup(&result.label))
            }
            _ => None,
        };

        let mut record = SnapshotRecord {
            image_path,
            metadata_path: None,
            timestamp: frame.wall_clock,
            frame_sequence: frame.sequence,
            classification: classification.cloned(),
            remediation,
            device_settings: self.device,
        };

        if record.classification.is_some() {
            record.metadata_path = Some(self.write_metadata(&record)?);
        }

        Ok(record)
    }

    /// Write the JSON sidecar next to `record.image_path`.
    pub fn write_metadata(&self, record: &SnapshotRecord) -> Result<PathBuf, SnapshotError> {
        let metadata_path = record.image_path.with_extension("json");
        write_json(&metadata_path, record).map_err(|source| SnapshotError::Metadata {
            record: Box::new(record.clone()),
            source,
        })?;
        Ok(metadata_path)
    }
}

fn next_stem() -> String {
    let sequence = SNAPSHOT_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!("detection_{}_{:06}", Utc::now().format("%Y%m%d_%H%M%S_%6f"), sequence)
}

fn write_json(path: &Path, record: &SnapshotRecord) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, record)?;
    writer.flush()
}

/// Where a snapshot outcome is delivered.
pub type SnapshotReply = Sender<Result<SnapshotRecord, SnapshotError>>;

struct SnapshotJob {
    frame: Frame,
    classification: Option<ClassificationResult>,
    reply: SnapshotReply,
}

/// Runs a [`SnapshotWriter`] on its own thread so disk I/O never stalls
/// the capture loop.
pub struct SnapshotWorker {
    jobs: Option<SyncSender<SnapshotJob>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotWorker {
    pub fn spawn(writer: SnapshotWriter) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<SnapshotJob>(SNAPSHOT_QUEUE_DEPTH);

        let worker = thread::Builder::new().name("snapshot".to_string()).spawn(move || {
            for job in rx {
                let outcome = writer.save(&job.frame, job.classification.as_ref());
                match &outcome {
                    Ok(record) => tracing::info!("Snapshot saved: {}", record.image_path.display()),
                    Err(e) => tracing::warn!("Snapshot failed: {}", e),
                }
                // The requester may have stopped listening
                let _ = job.reply.send(outcome);
            }
        })?;

        Ok(Self {
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a save. The outcome, including rejection, arrives on `reply`.
    pub fn submit(
        &self,
        frame: Frame,
        classification: Option<ClassificationResult>,
        reply: SnapshotReply,
    ) {
        let Some(jobs) = &self.jobs else {
            let _ = reply.send(Err(SnapshotError::NotRunning));
            return;
        };

        let job = SnapshotJob {
            frame,
            classification,
            reply,
        };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                tracing::warn!("Snapshot queue full, dropping request");
                let _ = job.reply.send(Err(SnapshotError::Busy));
            }
            Err(TrySendError::Disconnected(job)) => {
                let _ = job.reply.send(Err(SnapshotError::NotRunning));
            }
        }
    }

    /// Finish queued saves and stop the thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Snapshot worker panicked");
            }
        }
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
