//! Flows drive LLM agents: build a request, call the model, dispatch tools,
//! and repeat until the agent produces a final response.

pub mod functions;
pub mod llm_flow;
pub mod processors;

pub use functions::{credential_request_event, handle_function_calls, ToolMap};
pub use llm_flow::{LlmFlow, TransferPolicy};
