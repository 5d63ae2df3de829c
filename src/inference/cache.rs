use super::lock;
use crate::classify::ClassificationResult;
use std::sync::{Arc, Mutex};

/// A completed classification tagged with the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    /// Sequence number of the classified frame
    pub sequence: u64,
    pub result: ClassificationResult,
}

/// Single-slot holder of the most recent classification.
///
/// Writes replace the whole entry under a lock and readers get a shared
/// handle, so a reader never observes a partially written result. Installs
/// from frames older than the cached one are rejected.
#[derive(Debug, Default)]
pub struct ResultCache {
    slot: Mutex<Option<Arc<CachedResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest result, or `None` if nothing has completed yet. Never waits
    /// for a classification.
    pub fn latest(&self) -> Option<Arc<CachedResult>> {
        lock(&self.slot).clone()
    }

    /// Replace the cached result unless it came from an older frame.
    ///
    /// Returns whether the result was installed.
    pub fn install(&self, sequence: u64, result: ClassificationResult) -> bool {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|current| current.sequence > sequence) {
            return false;
        }
        *slot = Some(Arc::new(CachedResult { sequence, result }));
        true
    }

    /// Forget the cached result. Frame sequence numbers restart when a
    /// device is reopened, so sessions clear the cache at the start of a run.
    pub fn clear(&self) {
        *lock(&self.slot) = None;
    }
}
