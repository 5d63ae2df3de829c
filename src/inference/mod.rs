//! Throttled background classification.
//!
//! Two separate primitives: the [`InferenceScheduler`] tracks whether a
//! classification is in flight and feeds the worker; the [`ResultCache`]
//! holds the latest completed result for readers.

mod cache;
mod scheduler;

pub use cache::{CachedResult, ResultCache};
pub use scheduler::{Dispatch, InferenceScheduler, SchedulerStats};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Every value guarded in this crate is replaced whole, so a poisoned lock
/// still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
