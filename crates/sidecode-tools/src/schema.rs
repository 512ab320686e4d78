//! Tool input schemas.
//!
//! Each tool's parameter schema is compiled once, when the tool is
//! registered, and every call's input is validated against it before the
//! handler runs. Registration also checks the conventions the registry
//! relies on: an object schema whose required fields are declared.

use jsonschema::{JSONSchema, ValidationError};
use serde_json::{Map, Value};
use std::fmt;

/// A problem with a registered tool's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub tool: String,
    pub message: String,
}

impl SchemaError {
    fn new(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tool, self.message)
    }
}

impl std::error::Error for SchemaError {}

/// Compiled validator for one tool's input.
pub struct InputValidator {
    schema: JSONSchema,
}

impl fmt::Debug for InputValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputValidator").finish_non_exhaustive()
    }
}

impl InputValidator {
    pub fn compile(tool: &str, schema: &Value) -> Result<Self, SchemaError> {
        JSONSchema::compile(schema)
            .map(|schema| Self { schema })
            .map_err(|e| SchemaError::new(tool, format!("schema does not compile: {e}")))
    }

    /// Validate `input`, returning every violation rather than the first.
    ///
    /// Top-level `null` values are treated as absent, since models often
    /// send them for optional fields.
    pub fn validate(&self, input: &Value) -> Result<(), Vec<String>> {
        let input = without_nulls(input);
        let result = self
            .schema
            .validate(&input)
            .map_err(|errors| errors.map(|e| describe(&e)).collect());
        result
    }
}

/// Registration-time checks beyond what the schema compiler enforces.
pub fn check_schema(tool: &str, schema: &Value) -> Vec<SchemaError> {
    let mut errors = Vec::new();

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        errors.push(SchemaError::new(tool, "schema type must be \"object\""));
    }

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for field in required {
        if !properties.contains_key(field) {
            errors.push(SchemaError::new(
                tool,
                format!("required field '{field}' is not a declared property"),
            ));
        }
    }

    if let Err(e) = InputValidator::compile(tool, schema) {
        errors.push(e);
    }

    errors
}

fn without_nulls(input: &Value) -> Value {
    match input {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn describe(error: &ValidationError<'_>) -> String {
    let path = error.instance_path.to_string();
    if path.is_empty() {
        error.to_string()
    } else {
        format!("'{path}': {error}")
    }
}
