//! Typed access to function-call arguments.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::WeftError;

/// Arguments of one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    /// Wrap raw arguments. Models sometimes send the object JSON-encoded as a
    /// string; that form is decoded here.
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw.trim()) {
                Ok(decoded @ Value::Object(_)) => decoded,
                _ => Value::String(raw),
            },
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn missing(kind: &str, key: &str) -> WeftError {
        WeftError::InvalidArgument(format!("Missing {kind} argument: {key}"))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, WeftError> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, WeftError> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, WeftError> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, WeftError> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing("boolean", key))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>, WeftError> {
        self.value
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| Self::missing("array", key))
    }

    /// Deserialize one field, `None` when absent or null.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WeftError> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
                WeftError::InvalidArgument(format!("Invalid argument '{key}': {e}"))
            }),
        }
    }

    /// Deserialize all arguments into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, WeftError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            WeftError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
