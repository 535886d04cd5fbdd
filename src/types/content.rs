//! Content exchanged with models and recorded in events.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Who produced a piece of content, from the model's point of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A message: a role plus ordered parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Create a user text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a model text message.
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Concatenate all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionResponse(response) => Some(response),
                _ => None,
            })
            .collect()
    }

    /// True when there are no parts, or every part is empty text.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| match part {
            Part::Text { text } => text.is_empty(),
            _ => false,
        })
    }
}

/// A single part of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    InlineData(Blob),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Binary payload carried inline (base64 on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blob {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl FunctionCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// The result of a function call, fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

impl FunctionResponse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response,
        }
    }

    /// True when the payload is a structured error (`{"error": ...}`).
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Encode raw bytes the same way inline blobs are serialized.
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_calls_and_responses_in_order() {
        let content = Content::new(
            Role::Model,
            vec![
                Part::text("thinking about it"),
                Part::FunctionCall(FunctionCall::new("c1", "add", json!({"a": 1}))),
                Part::FunctionCall(FunctionCall::new("c2", "mul", json!({"a": 2}))),
            ],
        );

        let names: Vec<_> = content.function_calls().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["add", "mul"]);
        assert!(content.function_responses().is_empty());
        assert_eq!(content.text(), "thinking about it");
    }

    #[test]
    fn blob_serializes_as_base64() {
        let part = Part::InlineData(Blob::new("text/plain", b"hi".to_vec()));
        let value = serde_json::to_value(&part).expect("serialize");
        assert_eq!(value["data"], encode_base64(b"hi"));

        let back: Part = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, part);
    }

    #[test]
    fn empty_text_counts_as_empty_content() {
        assert!(Content::model("").is_empty());
        assert!(!Content::model("x").is_empty());
    }
}
