//! Model contract, request/response types and the model registry.

pub mod llm;
pub mod registry;

pub use llm::{FunctionDeclaration, Llm, LlmRequest, LlmResponse, LlmResponseStream};
pub use registry::{LlmFactory, LlmRegistry};
