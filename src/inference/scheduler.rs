use super::{lock, ResultCache};
use crate::classify::{Classifier, Preprocessor};
use crate::error::InferenceError;
use crate::frame::Frame;
use image::RgbImage;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What happened to a frame offered to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A copy of the frame was handed to the worker
    Dispatched,
    /// Too soon after the previous dispatch
    Throttled,
    /// The interval elapsed but a classification is still running
    Busy,
    /// The worker is gone
    Closed,
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct DispatchState {
    last_dispatch: Option<Instant>,
    in_flight: bool,
    stats: SchedulerStats,
}

struct Shared {
    state: Mutex<DispatchState>,
    idle: Condvar,
    cache: Arc<ResultCache>,
}

struct Job {
    sequence: u64,
    image: RgbImage,
}

/// Rate-limited dispatcher feeding a single inference worker.
///
/// At most one classification is in flight at any time. Frames arriving
/// less than `min_interval` after the last dispatch, or while the worker is
/// busy, are skipped; the caller is never blocked on the classifier.
pub struct InferenceScheduler {
    shared: Arc<Shared>,
    min_interval: Duration,
    jobs: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<Box<dyn Classifier>>>,
}

impl InferenceScheduler {
    /// Start the worker thread. The classifier is moved onto it and handed
    /// back by [`InferenceScheduler::shutdown`].
    pub fn spawn(
        classifier: Box<dyn Classifier>,
        cache: Arc<ResultCache>,
        min_interval: Duration,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState::default()),
            idle: Condvar::new(),
            cache,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || run_worker(classifier, rx, worker_shared))?;

        tracing::info!(
            "Inference worker started, interval={:.1}s",
            min_interval.as_secs_f32()
        );

        Ok(Self {
            shared,
            min_interval,
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    /// Offer a captured frame for classification.
    ///
    /// Throttling is measured on the frame's capture instant. On dispatch
    /// the frame is copied, so the caller keeps full ownership of its buffer.
    pub fn offer(&self, frame: &Frame) -> Dispatch {
        let Some(jobs) = &self.jobs else {
            return Dispatch::Closed;
        };

        let mut state = lock(&self.shared.state);

        if let Some(last) = state.last_dispatch {
            if frame.captured_at.saturating_duration_since(last) < self.min_interval {
                return Dispatch::Throttled;
            }
        }
        if state.in_flight {
            return Dispatch::Busy;
        }

        let job = Job {
            sequence: frame.sequence,
            image: frame.image.clone(),
        };
        match jobs.try_send(job) {
            Ok(()) => {
                state.in_flight = true;
                state.last_dispatch = Some(frame.captured_at);
                state.stats.dispatched += 1;
                tracing::debug!("Dispatched frame {} for classification", frame.sequence);
                Dispatch::Dispatched
            }
            Err(TrySendError::Full(_)) => Dispatch::Busy,
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(
                    "Inference worker has exited; frame {} not classified",
                    frame.sequence
                );
                Dispatch::Closed
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.shared.state).in_flight
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.shared.state).stats
    }

    /// Block until no classification is in flight.
    pub fn wait_idle(&self) {
        let mut state = lock(&self.shared.state);
        while state.in_flight {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Like [`InferenceScheduler::wait_idle`] with a deadline. Returns
    /// whether the worker is idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let state = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| s.in_flight)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !state.in_flight
    }

    /// Let any in-flight classification finish, stop the worker and return
    /// the classifier. Later calls return `None`.
    pub fn shutdown(&mut self) -> Option<Box<dyn Classifier>> {
        let worker = self.worker.take()?;

        if self.is_busy() {
            tracing::info!("Waiting for in-flight inference to finish");
        }
        self.wait_idle();
        self.jobs = None;

        match worker.join() {
            Ok(classifier) => {
                let stats = self.stats();
                tracing::info!(
                    "Inference worker stopped: dispatched={}, completed={}, failed={}",
                    stats.dispatched,
                    stats.completed,
                    stats.failed
                );
                Some(classifier)
            }
            Err(_) => {
                tracing::error!("Inference worker panicked; classifier lost");
                None
            }
        }
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut classifier: Box<dyn Classifier>,
    jobs: Receiver<Job>,
    shared: Arc<Shared>,
) -> Box<dyn Classifier> {
    for job in jobs {
        let started = Instant::now();
        let Job { sequence, image } = job;

        // Everything between dispatch and install runs under the guard, so
        // `in_flight` is always cleared
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let (width, height) = classifier.input_size();
            let input = Preprocessor::new(width, height).resize(&image);
            drop(image);
            classifier.classify(&input)
        }))
        .unwrap_or_else(|payload| Err(InferenceError::Panicked(panic_message(payload.as_ref()))));

        let mut state = lock(&shared.state);
        match outcome {
            Ok(result) => {
                tracing::debug!(
                    "Frame {} classified as {} ({:.2}) in {:.1}ms",
                    sequence,
                    result.label,
                    result.confidence,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                if !shared.cache.install(sequence, result) {
                    tracing::debug!("Discarded stale result for frame {}", sequence);
                }
                state.stats.completed += 1;
            }
            Err(e) => {
                // Previous result stays on display
                tracing::warn!("Inference failed for frame {}: {}", sequence, e);
                state.stats.failed += 1;
            }
        }
        state.in_flight = false;
        drop(state);
        shared.idle.notify_all();
    }

    classifier
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
