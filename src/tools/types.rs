//! Parameter schemas for tools.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON Schema describing a tool's arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameters {
    pub schema: Value,
}

impl ToolParameters {
    /// Wrap a raw JSON Schema value.
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    /// An object schema with no properties.
    pub fn empty() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Start an object schema.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder::default()
    }
}

/// Builder for object parameter schemas.
#[derive(Debug, Default)]
pub struct ParameterBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "string", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "number", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "integer", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = json!({ "type": "boolean", "description": description.into() });
        self.property(name, schema, required)
    }

    /// String restricted to `values`.
    pub fn string_enum<S: AsRef<str>>(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[S],
        required: bool,
    ) -> Self {
        let values: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
        let schema = json!({
            "type": "string",
            "description": description.into(),
            "enum": values,
        });
        self.property(name, schema, required)
    }

    /// Array whose items follow `items`.
    pub fn array(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        items: Value,
        required: bool,
    ) -> Self {
        let schema = json!({
            "type": "array",
            "description": description.into(),
            "items": items,
        });
        self.property(name, schema, required)
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
