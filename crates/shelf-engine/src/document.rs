//! Document rules shared by every backend: identity keys, canonical values
//! and field matching.

use regex::Regex;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::schema::BucketSchema;

/// Identity key of `doc` under `schema`.
///
/// The key is the canonical JSON text of the identity field, so `1` and
/// `"1"` are distinct identities.
pub fn identity_key(schema: &BucketSchema, doc: &Value) -> EngineResult<String> {
    let obj = doc.as_object().ok_or(EngineError::NotAnObject)?;
    let field = &schema.id_field;
    let id = obj.get(field).ok_or_else(|| EngineError::MissingId {
        field: field.clone(),
    })?;
    if is_zero(id) {
        return Err(EngineError::ZeroId {
            field: field.clone(),
        });
    }
    Ok(canonical(id))
}

/// Text form used for keys and index entries.
pub fn canonical(value: &Value) -> String {
    value.to_string()
}

/// Unique fields of `doc` that hold a value, with that value's canonical text.
pub fn unique_values<'a>(
    schema: &'a BucketSchema,
    doc: &'a Value,
) -> impl Iterator<Item = (&'a str, String)> + 'a {
    schema
        .unique
        .iter()
        .filter(move |field| **field != schema.id_field)
        .filter_map(move |field| {
            doc.get(field)
                .filter(|v| !v.is_null())
                .map(|v| (field.as_str(), canonical(v)))
        })
}

pub fn compile_pattern(pattern: &str) -> EngineResult<Regex> {
    Regex::new(pattern).map_err(|e| EngineError::InvalidPattern(e.to_string()))
}

/// Returns `true` if string `field` of `doc` matches `re`.
pub fn text_matches(doc: &Value, field: &str, re: &Regex) -> bool {
    doc.get(field)
        .and_then(Value::as_str)
        .is_some_and(|s| re.is_match(s))
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}
