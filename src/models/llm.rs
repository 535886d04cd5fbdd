//! Model-generation contract.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::WeftError;
use crate::types::{Content, FinishReason, GenerateContentConfig, ResponseFormat, Usage};

/// Tool declaration sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A request for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    #[serde(default)]
    pub config: GenerateContentConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDeclaration>,
}

impl LlmRequest {
    /// Append paragraphs to the system instruction.
    pub fn append_instructions<I, S>(&mut self, instructions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for instruction in instructions {
            let instruction = instruction.as_ref();
            if instruction.is_empty() {
                continue;
            }
            match &mut self.system_instruction {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(instruction);
                }
                None => self.system_instruction = Some(instruction.to_string()),
            }
        }
    }

    /// Declare a tool unless one with the same name is already declared.
    pub fn append_tool(&mut self, declaration: FunctionDeclaration) {
        if self.tools.iter().all(|t| t.name != declaration.name) {
            self.tools.push(declaration);
        }
    }

    /// Constrain the response to `schema`.
    pub fn set_output_schema(&mut self, schema: serde_json::Value) {
        self.config.response_format = Some(ResponseFormat::JsonSchema {
            schema,
            name: "response".to_string(),
        });
    }
}

/// One item of a model's output stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Streaming fragment; a final response follows.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl LlmResponse {
    pub fn from_content(content: Content) -> Self {
        Self {
            content: Some(content),
            turn_complete: true,
            ..Default::default()
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            turn_complete: true,
            finish_reason: Some(FinishReason::Error),
            ..Default::default()
        }
    }
}

/// Stream of responses: zero or more partial results, then one final result.
pub type LlmResponseStream = BoxStream<'static, Result<LlmResponse, WeftError>>;

/// A generative model.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Model identifier, e.g. `gemini-2.0-flash`.
    fn model_name(&self) -> &str;

    /// Run one generation. With `stream` unset the stream yields exactly one item.
    async fn generate(&self, request: LlmRequest, stream: bool)
        -> Result<LlmResponseStream, WeftError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instructions_are_joined_as_paragraphs() {
        let mut request = LlmRequest::default();
        request.append_instructions(["Be brief.", "", "Answer in French."]);
        assert_eq!(
            request.system_instruction.as_deref(),
            Some("Be brief.\n\nAnswer in French.")
        );
    }

    #[test]
    fn duplicate_tool_declarations_are_ignored() {
        let mut request = LlmRequest::default();
        let decl = FunctionDeclaration {
            name: "add".into(),
            description: "Add numbers".into(),
            parameters: json!({"type": "object"}),
        };
        request.append_tool(decl.clone());
        request.append_tool(decl);
        assert_eq!(request.tools.len(), 1);
    }
}
