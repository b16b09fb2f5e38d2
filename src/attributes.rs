//! Helpers for reading and writing flat attribute maps.
//!
//! Blocks that appear at most once are lists of zero or one object. Readers
//! here accept a bare object too, so hand-written state still parses.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ProviderError;

/// A JSON object holding attributes.
pub type Attributes = Map<String, Value>;

/// View `value` as an attribute object.
pub fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Attributes, ProviderError> {
    value
        .as_object()
        .ok_or_else(|| ProviderError::Validation(format!("{} must be an object", what)))
}

/// The `id` attribute of a state value.
pub fn resource_id(state: &Value) -> Result<String, ProviderError> {
    match state.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ProviderError::Validation(
            "state has no \"id\" attribute".to_string(),
        )),
    }
}

/// A required, non-empty string attribute.
pub fn required_str(obj: &Attributes, key: &str) -> Result<String, ProviderError> {
    optional_str(obj, key)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Validation(format!("missing required attribute \"{}\"", key)))
}

/// An optional string attribute.
pub fn optional_str(obj: &Attributes, key: &str) -> Result<Option<String>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(type_error(key, "a string")),
    }
}

/// An optional boolean attribute.
pub fn optional_bool(obj: &Attributes, key: &str) -> Result<Option<bool>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(type_error(key, "a bool")),
    }
}

/// An optional integer attribute.
pub fn optional_i64(obj: &Attributes, key: &str) -> Result<Option<i64>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| type_error(key, "an integer")),
    }
}

/// A block allowed at most once.
pub fn single_block<'a>(
    obj: &'a Attributes,
    key: &str,
) -> Result<Option<&'a Attributes>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(block)) => Ok(Some(block)),
        Some(Value::Array(items)) => match items.as_slice() {
            [] => Ok(None),
            [Value::Null] => Ok(None),
            [Value::Object(block)] => Ok(Some(block)),
            [_] => Err(type_error(key, "a list of objects")),
            _ => Err(ProviderError::Validation(format!(
                "block \"{}\" allows at most 1 item, got {}",
                key,
                items.len()
            ))),
        },
        Some(_) => Err(type_error(key, "a list of objects")),
    }
}

/// A repeated block.
pub fn block_list<'a>(obj: &'a Attributes, key: &str) -> Result<Vec<&'a Attributes>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_object().ok_or_else(|| type_error(key, "a list of objects")))
            .collect(),
        Some(_) => Err(type_error(key, "a list of objects")),
    }
}

/// A map of strings.
pub fn string_map(obj: &Attributes, key: &str) -> Result<BTreeMap<String, String>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                _ => Err(type_error(&format!("{}.{}", key, k), "a string")),
            })
            .collect(),
        Some(_) => Err(type_error(key, "a map of strings")),
    }
}

/// A list of strings.
pub fn string_list(obj: &Attributes, key: &str) -> Result<Vec<String>, ProviderError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| type_error(key, "a list of strings"))
            })
            .collect(),
        Some(_) => Err(type_error(key, "a list of strings")),
    }
}

/// Encode an optional block as a list of zero or one object.
pub fn wrap_in_list(block: Option<Value>) -> Value {
    Value::Array(block.into_iter().collect())
}

fn type_error(key: &str, expected: &str) -> ProviderError {
    ProviderError::Validation(format!("attribute \"{}\" must be {}", key, expected))
}
