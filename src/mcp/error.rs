use thiserror::Error;

use crate::util::TimedOut;

/// Failures talking to an MCP server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McpError {
    #[error("MCP connection failed: {0}")]
    Connection(String),

    #[error("MCP request timed out after {0}ms")]
    Timeout(u64),

    #[error("MCP tool schema is invalid: {0}")]
    InvalidSchema(String),

    #[error("MCP tool {tool} failed: {message}")]
    Execution { tool: String, message: String },

    #[error("MCP session closed: {0}")]
    Closed(String),
}

impl From<TimedOut> for McpError {
    fn from(timed_out: TimedOut) -> Self {
        Self::Timeout(timed_out.millis())
    }
}

impl McpError {
    /// Whether a fresh connection may succeed where this one failed.
    pub fn is_reconnectable(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, WeftError};

    #[test]
    fn only_transport_failures_reconnect() {
        assert!(McpError::Closed("reset".into()).is_reconnectable());
        assert!(McpError::Connection("refused".into()).is_reconnectable());
        assert!(!McpError::Timeout(100).is_reconnectable());
        assert!(!McpError::Execution {
            tool: "search".into(),
            message: "bad query".into()
        }
        .is_reconnectable());
    }

    #[test]
    fn converts_into_runtime_error() {
        let err: WeftError = McpError::Timeout(250).into();
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.to_string(), "MCP request timed out after 250ms");
    }
}
