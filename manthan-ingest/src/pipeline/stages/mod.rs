//! Stage transformations
//!
//! Each stage module is pure: it turns typed inputs (and, for LLM-backed
//! stages, an optional model answer) into that stage's output. Capability
//! calls happen in the executor, never here.

pub mod character_bible;
pub mod core_extraction;
pub mod final_package;
pub mod market_adaptation;
pub mod package_assembly;
pub mod script_preprocess;

use serde_json::Value;

/// Non-blank string field of a model answer
pub(crate) fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Non-blank strings of an array field; anything else is empty
pub(crate) fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
