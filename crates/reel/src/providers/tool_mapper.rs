//! Translation between MCP tool descriptors and each vendor's tool schema, and
//! from vendor tool-call payloads back to [`ToolCall`].
use std::collections::HashSet;

use serde_json::{json, Value};
use thiserror::Error;

use super::errors::ProviderError;
use crate::message::ToolCall;
use mcp_core::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    Anthropic,
    /// Also used by OpenAI-compatible custom endpoints.
    OpenAi,
    Google,
}

#[derive(Debug, Error)]
pub enum ToolMappingError {
    #[error("tool call is missing field '{0}'")]
    MissingField(&'static str),

    #[error("tool call '{name}' has malformed arguments: {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ToolMappingError> for ProviderError {
    fn from(error: ToolMappingError) -> Self {
        ProviderError::RequestFailed(error.to_string())
    }
}

impl ToolFormat {
    /// Vendor schema for one tool.
    pub fn tool_spec(self, tool: &Tool) -> Value {
        match self {
            ToolFormat::Anthropic => json!({
                "name": tool.name,
                "description": tool.description_or_empty(),
                "input_schema": tool.input_schema,
            }),
            ToolFormat::OpenAi => {
                let mut function = json!({
                    "name": tool.name,
                    "parameters": tool.input_schema,
                });
                if let Some(description) = &tool.description {
                    function["description"] = json!(description);
                }
                json!({ "type": "function", "function": function })
            }
            ToolFormat::Google => json!({
                "name": tool.name,
                "description": tool.description_or_empty(),
                "parameters": google_schema(&tool.input_schema),
            }),
        }
    }

    /// Vendor schemas for a tool list, dropping repeated names.
    pub fn tool_specs(self, tools: &[Tool]) -> Vec<Value> {
        let mut unique_tools = HashSet::new();
        tools
            .iter()
            .filter(|tool| unique_tools.insert(tool.name.as_str()))
            .map(|tool| self.tool_spec(tool))
            .collect()
    }

    /// Normalize one vendor tool-call payload.
    ///
    /// Anthropic: `{id, name, input}`. OpenAI: `{id, function: {name, arguments}}`
    /// where `arguments` is a JSON string or an object. Google: `{name, args}` with
    /// no id, so one is synthesized.
    pub fn parse_tool_call(self, raw: &Value) -> Result<ToolCall, ToolMappingError> {
        match self {
            ToolFormat::Anthropic => {
                let name = str_field(raw, "name")?;
                let id = str_field(raw, "id")?;
                let args = normalize_arguments(name, raw.get("input").cloned())?;
                Ok(ToolCall::new(name, id, args))
            }
            ToolFormat::OpenAi => {
                let function = raw
                    .get("function")
                    .ok_or(ToolMappingError::MissingField("function"))?;
                let name = str_field(function, "name")?;
                let id = str_field(raw, "id")?;
                let args = normalize_arguments(name, function.get("arguments").cloned())?;
                Ok(ToolCall::new(name, id, args))
            }
            ToolFormat::Google => {
                let name = str_field(raw, "name")?;
                let args = normalize_arguments(name, raw.get("args").cloned())?;
                Ok(ToolCall::new(name, synthesize_call_id(), args))
            }
        }
    }
}

/// JSON Schema keywords Gemini function declarations reject.
const GOOGLE_UNSUPPORTED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$comment",
    "additionalProperties",
    "examples",
];

/// Copy of `schema` without the keywords in [`GOOGLE_UNSUPPORTED_KEYS`], at any depth.
/// Property names are data, not keywords, and are kept as is.
pub fn google_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    let mut cleaned = serde_json::Map::with_capacity(map.len());
    for (key, value) in map {
        if GOOGLE_UNSUPPORTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match (key.as_str(), value) {
            ("properties", Value::Object(properties)) => Value::Object(
                properties
                    .iter()
                    .map(|(name, property)| (name.clone(), google_schema(property)))
                    .collect(),
            ),
            ("items", _) => google_schema(value),
            ("anyOf" | "oneOf" | "allOf", Value::Array(variants)) => {
                Value::Array(variants.iter().map(google_schema).collect())
            }
            _ => value.clone(),
        };
        cleaned.insert(key.clone(), value);
    }
    Value::Object(cleaned)
}

fn str_field<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, ToolMappingError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ToolMappingError::MissingField(field))
}

/// Arguments as a JSON value: strings are parsed, absent or empty become `{}`.
pub fn normalize_arguments(name: &str, args: Option<Value>) -> Result<Value, ToolMappingError> {
    match args {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(json!({})),
        Some(Value::String(s)) => {
            serde_json::from_str(&s).map_err(|source| ToolMappingError::InvalidArguments {
                name: name.to_string(),
                source,
            })
        }
        Some(other) => Ok(other),
    }
}

pub fn synthesize_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
