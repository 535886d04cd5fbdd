//! Tool system for function calling.

pub mod agent_tool;
pub mod arguments;
pub mod builtin;
pub mod tool;
pub mod toolset;
pub mod types;
pub mod validation;

pub use agent_tool::AgentTool;
pub use arguments::ToolArguments;
pub use builtin::{ExitLoopTool, TransferToAgentTool, EXIT_LOOP, TRANSFER_TO_AGENT};
pub use tool::{FunctionTool, Tool};
pub use toolset::{DynamicTool, DynamicToolAdapter, DynamicToolProvider, ProviderToolset, Toolset};
pub use types::{ParameterBuilder, ToolParameters};
