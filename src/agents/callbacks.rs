//! Hook types for agents, model calls and tool calls.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{CallbackContext, ToolContext};
use crate::error::WeftError;
use crate::models::{LlmRequest, LlmResponse};
use crate::types::{Content, FunctionCall};

/// Future returned by every hook.
pub type HookFuture<T> = Pin<Box<dyn Future<Output = Result<T, WeftError>> + Send>>;

/// Runs before an agent's body. Returning content skips the body and
/// replies with that content instead.
pub type BeforeAgentCallback =
    Arc<dyn Fn(CallbackContext) -> HookFuture<Option<Content>> + Send + Sync>;

/// Runs after an agent's body. Returned content is emitted as a final reply.
pub type AfterAgentCallback =
    Arc<dyn Fn(CallbackContext) -> HookFuture<Option<Content>> + Send + Sync>;

/// Decision returned by a before-model hook.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeModelOutcome {
    /// Call the model with this (possibly rewritten) request.
    Continue(LlmRequest),
    /// Skip the model call and use this response.
    Respond(LlmResponse),
}

/// Hook that can rewrite the request or answer in place of the model.
pub type BeforeModelCallback =
    Arc<dyn Fn(CallbackContext, LlmRequest) -> HookFuture<BeforeModelOutcome> + Send + Sync>;

/// Hook that can replace a model response.
pub type AfterModelCallback =
    Arc<dyn Fn(CallbackContext, LlmResponse) -> HookFuture<Option<LlmResponse>> + Send + Sync>;

/// Hook that can answer a tool call without executing the tool.
pub type BeforeToolCallback =
    Arc<dyn Fn(ToolContext, FunctionCall) -> HookFuture<Option<Value>> + Send + Sync>;

/// Hook that can replace a tool result.
pub type AfterToolCallback =
    Arc<dyn Fn(ToolContext, FunctionCall, Value) -> HookFuture<Option<Value>> + Send + Sync>;
