//! Deadlines for fallible futures.

use std::future::Future;
use std::time::Duration;

use crate::error::WeftError;

/// A deadline elapsed before the work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub after: Duration,
}

impl TimedOut {
    pub fn millis(&self) -> u64 {
        self.after.as_millis() as u64
    }
}

impl From<TimedOut> for WeftError {
    fn from(timed_out: TimedOut) -> Self {
        WeftError::Timeout(timed_out.millis())
    }
}

/// Run `future` under `duration`; an elapsed deadline becomes `E::from(TimedOut)`.
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<TimedOut>,
{
    tokio::time::timeout(duration, future)
        .await
        .unwrap_or_else(|_| Err(TimedOut { after: duration }.into()))
}
