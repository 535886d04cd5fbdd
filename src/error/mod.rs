//! Error types for weft.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

#[cfg(feature = "mcp")]
use crate::mcp::McpError;

/// Primary error type for all runtime operations.
#[derive(Error, Debug)]
pub enum WeftError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session not found: {app_name}/{user_id}/{session_id}")]
    SessionNotFound {
        app_name: String,
        user_id: String,
        session_id: String,
    },

    #[error("Session {session_id} is stale: storage was updated after it was loaded")]
    StaleSession { session_id: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid agent tree: {0}")]
    InvalidAgentTree(String),

    #[error("Max number of LLM calls ({limit}) exceeded for this invocation")]
    LlmCallLimitExceeded { limit: usize },

    #[error("Model error ({model}): {message}")]
    Model { model: String, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invocation not found in session: {0}")]
    InvocationNotFound(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[cfg(feature = "mcp")]
    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl WeftError {
    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a model error.
    pub fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::ModelNotFound(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) => ErrorCategory::InvalidInput,
            Self::SessionNotFound { .. }
            | Self::StaleSession { .. }
            | Self::InvocationNotFound(_)
            | Self::Artifact(_) => ErrorCategory::Storage,
            Self::AgentNotFound(_) | Self::InvalidAgentTree(_) | Self::InvalidState(_) => {
                ErrorCategory::Configuration
            }
            Self::LlmCallLimitExceeded { .. } => ErrorCategory::Limit,
            Self::Model { .. } => ErrorCategory::Model,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Timeout(_) => ErrorCategory::Timeout,
            #[cfg(feature = "mcp")]
            Self::Mcp(err) => match err {
                McpError::Timeout(_) => ErrorCategory::Timeout,
                McpError::Connection(_) | McpError::Closed(_) => ErrorCategory::Network,
                McpError::InvalidSchema(_) => ErrorCategory::InvalidInput,
                McpError::Execution { .. } => ErrorCategory::ToolExecution,
            },
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Model
        )
    }

    /// Whether this error must abort the current invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LlmCallLimitExceeded { .. })
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Network | ErrorCategory::Model => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Limit => RecoverySuggestion::RaiseLimit,
            ErrorCategory::Storage => RecoverySuggestion::ReloadSession,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WeftError>;
