//! Events and their side-effect manifests.

pub mod event;
pub mod history;

pub use event::{Event, EventActions, EventCompaction, USER_AUTHOR};
pub use history::{apply_rewinds, find_matching_function_call, pending_long_running_calls};

use futures::stream::BoxStream;

use crate::error::WeftError;

/// Stream of events produced by an agent or the runner.
pub type EventStream = BoxStream<'static, Result<Event, WeftError>>;
