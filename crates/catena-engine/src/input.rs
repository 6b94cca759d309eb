//! Chain input validation against the chain's `input_schema`.
//!
//! Only the flat subset of JSON Schema is checked: the top-level `type`,
//! `required` property names and per-property `type`. Anything else in the
//! schema is ignored.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineError;

/// JSON Schema primitive types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaType {
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  Object,
}

impl SchemaType {
  fn parse(name: &str) -> Option<Self> {
    match name {
      "string" => Some(SchemaType::String),
      "number" => Some(SchemaType::Number),
      "integer" => Some(SchemaType::Integer),
      "boolean" => Some(SchemaType::Boolean),
      "null" => Some(SchemaType::Null),
      "array" => Some(SchemaType::Array),
      "object" => Some(SchemaType::Object),
      _ => None,
    }
  }

  fn matches(self, value: &Value) -> bool {
    match self {
      SchemaType::String => value.is_string(),
      SchemaType::Number => value.is_number(),
      SchemaType::Integer => value.is_i64() || value.is_u64(),
      SchemaType::Boolean => value.is_boolean(),
      SchemaType::Null => value.is_null(),
      SchemaType::Array => value.is_array(),
      SchemaType::Object => value.is_object(),
    }
  }

  fn name(self) -> &'static str {
    match self {
      SchemaType::String => "string",
      SchemaType::Number => "number",
      SchemaType::Integer => "integer",
      SchemaType::Boolean => "boolean",
      SchemaType::Null => "null",
      SchemaType::Array => "array",
      SchemaType::Object => "object",
    }
  }
}

/// Extract property types from an object schema.
///
/// Properties with an unknown or missing `type` are left out.
pub fn extract_schema_types(schema: &Value) -> HashMap<String, SchemaType> {
  schema
    .get("properties")
    .and_then(Value::as_object)
    .map(|properties| {
      properties
        .iter()
        .filter_map(|(name, prop)| {
          let ty = prop.get("type").and_then(Value::as_str)?;
          Some((name.clone(), SchemaType::parse(ty)?))
        })
        .collect()
    })
    .unwrap_or_default()
}

/// Check `input` against `schema`.
pub fn validate_input(schema: Option<&Value>, input: &Value) -> Result<(), EngineError> {
  let Some(schema) = schema else {
    return Ok(());
  };

  if let Some(ty) = schema.get("type").and_then(Value::as_str).and_then(SchemaType::parse) {
    if !ty.matches(input) {
      return Err(EngineError::InvalidInput(format!(
        "expected {}, got {}",
        ty.name(),
        kind_of(input)
      )));
    }
  }

  let required = schema
    .get("required")
    .and_then(Value::as_array)
    .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
    .unwrap_or_default();
  let types = extract_schema_types(schema);

  if required.is_empty() && types.is_empty() {
    return Ok(());
  }

  let Some(object) = input.as_object() else {
    return Err(EngineError::InvalidInput(format!(
      "expected object, got {}",
      kind_of(input)
    )));
  };

  for name in required {
    if !object.contains_key(name) {
      return Err(EngineError::InvalidInput(format!(
        "missing required field '{}'",
        name
      )));
    }
  }

  let mut names: Vec<&String> = types.keys().collect();
  names.sort();
  for name in names {
    let ty = types[name];
    if let Some(value) = object.get(name) {
      if !ty.matches(value) {
        return Err(EngineError::InvalidInput(format!(
          "field '{}' expected {}, got {}",
          name,
          ty.name(),
          kind_of(value)
        )));
      }
    }
  }

  Ok(())
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
