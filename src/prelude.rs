//! Convenience re-exports for common use.

pub use crate::agents::{Agent, GraphConfig, GraphNode, IncludeContents, LlmAgent, ModelRef};
pub use crate::artifacts::{ArtifactService, InMemoryArtifactService};
pub use crate::config::{CompactionConfig, RunConfig, StreamingMode};
pub use crate::context::{CallbackContext, InvocationContext, Services, ToolContext};
pub use crate::error::{Result, WeftError};
pub use crate::events::{Event, EventActions, EventStream};
pub use crate::memory::{InMemoryMemoryService, MemoryService};
pub use crate::models::{Llm, LlmRegistry, LlmRequest, LlmResponse};
pub use crate::runner::{EventSummarizer, LlmEventSummarizer, Runner};
pub use crate::sessions::{InMemorySessionService, Session, SessionService};
pub use crate::state::State;
pub use crate::tools::{AgentTool, FunctionTool, Tool, ToolArguments, ToolParameters, Toolset};
pub use crate::types::{Content, FunctionCall, FunctionResponse, Part, Role};
