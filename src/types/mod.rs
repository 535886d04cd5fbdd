//! Core value types shared by every layer.

pub mod content;
pub mod generation;
pub mod usage;

pub use content::*;
pub use generation::*;
pub use usage::*;

/// Key/value map used for session state and state deltas.
pub type StateMap = serde_json::Map<String, serde_json::Value>;
