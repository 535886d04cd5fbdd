//! Utility modules: retry, timeout.

pub mod retry;
pub mod timeout;

pub use retry::RetryPolicy;
pub use timeout::{with_timeout, TimedOut};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
