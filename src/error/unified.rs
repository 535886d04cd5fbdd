//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Model,
    Limit,
    Storage,
    InvalidInput,
    Configuration,
    Serialization,
    ToolExecution,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckConfiguration,
    IncreaseTimeout,
    RaiseLimit,
    ReloadSession,
    CheckToolImplementation,
    ContactSupport,
}
