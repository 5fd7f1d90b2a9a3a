//! Query and document sanitization for operator-injection defense.
//!
//! Untrusted JSON reaches the storage layer through three doors — filters,
//! update documents, and aggregation pipelines — and each gets a different
//! treatment:
//!
//! - **Documents and filters**: keys beginning with `$` are silently dropped
//!   (logged and counted, but the request proceeds with the cleaned value).
//! - **Updates**: the top level may contain *only* allowlisted operators;
//!   anything else rejects the whole request. Dropping would silently change
//!   the meaning of a write.
//! - **Pipelines**: every stage must be a single allowlisted operator;
//!   unknown stages reject the pipeline outright.
//!
//! All recursion is depth-capped; exceeding the cap is a rejection, not a
//! truncation, because a truncated query can match more than the caller
//! intended.

pub mod query;

pub use query::{QueryOptions, RawQueryOptions, sanitize_query_options};

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AppResult, SecurityError};

/// Maximum nesting depth the sanitizer will recurse into.
pub const MAX_SANITIZE_DEPTH: usize = 8;

/// Update operators a client may use at the top level of an update document.
const ALLOWED_UPDATE_OPERATORS: [&str; 6] =
    ["$set", "$unset", "$inc", "$push", "$pull", "$addToSet"];

/// Aggregation stages a client may use.
const ALLOWED_PIPELINE_STAGES: [&str; 8] = [
    "$match", "$group", "$sort", "$limit", "$skip", "$project", "$lookup", "$unwind",
];

/// Substrings stripped out of every string value.
const DANGEROUS_FRAGMENTS: [&str; 4] = ["<script", "</script", "javascript:", "data:text/html"];

fn is_object_id_key(key: &str) -> bool {
    key == "_id" || key.ends_with("Id") || key.ends_with("_id")
}

fn is_hex_object_id(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Remove dangerous fragments from a string value, case-insensitively.
fn scrub_string(input: &str) -> String {
    let mut out = input.to_string();
    for fragment in DANGEROUS_FRAGMENTS {
        while let Some(idx) = find_ascii_ignore_case(&out, fragment) {
            out.replace_range(idx..idx + fragment.len(), "");
        }
    }
    out
}

/// Byte-wise ASCII-case-insensitive substring search.
///
/// The needle must be pure ASCII. Matching on the haystack's bytes keeps the
/// returned offset valid for splicing: an ASCII match always starts and ends
/// on char boundaries, which is not true of offsets computed against a
/// `to_lowercase()` copy (Unicode lowercasing can change byte lengths).
fn find_ascii_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn depth_guard(depth: usize, max_depth: usize, context: &str) -> AppResult<()> {
    if depth > max_depth {
        return Err(SecurityError::Sanitization(format!(
            "{context} exceeds maximum nesting depth of {max_depth}"
        )));
    }
    Ok(())
}

fn clean_value(
    value: &Value,
    depth: usize,
    max_depth: usize,
    dropped: &mut BTreeSet<String>,
) -> AppResult<Value> {
    depth_guard(depth, max_depth, "document")?;

    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                if key.starts_with('$') {
                    dropped.insert(key.clone());
                    continue;
                }
                out.insert(key.clone(), clean_value(val, depth + 1, max_depth, dropped)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(clean_value(item, depth + 1, max_depth, dropped)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => Ok(Value::String(scrub_string(s))),
        other => Ok(other.clone()),
    }
}

/// Deep-clean an arbitrary document.
///
/// Drops every `$`-prefixed key at any depth, scrubs dangerous fragments out
/// of string values, and rejects documents nested deeper than `max_depth`.
pub fn sanitize_document(document: &Value, max_depth: usize) -> AppResult<Value> {
    let mut dropped = BTreeSet::new();
    let cleaned = clean_value(document, 0, max_depth, &mut dropped)?;
    if !dropped.is_empty() {
        warn!(keys = ?dropped, "Dropped operator keys from document");
        crate::metrics::record_operator_keys_dropped(dropped.len());
    }
    Ok(cleaned)
}

/// Sanitize a query filter.
///
/// In addition to document cleaning, any key naming an object id (`_id`, or
/// ending in `Id`/`_id`) must hold a 24-character hex string; anything else
/// rejects the filter. Id fields driven by client input are the most common
/// injection point, so they get strict validation instead of dropping.
pub fn sanitize_filter(filter: &Value, max_depth: usize) -> AppResult<Value> {
    validate_id_fields(filter, 0, max_depth)?;
    sanitize_document(filter, max_depth)
}

fn validate_id_fields(value: &Value, depth: usize, max_depth: usize) -> AppResult<()> {
    depth_guard(depth, max_depth, "filter")?;

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if !key.starts_with('$') && is_object_id_key(key) {
                    match val {
                        Value::String(s) if is_hex_object_id(s) => {}
                        Value::Null => {}
                        _ => {
                            return Err(SecurityError::Sanitization(format!(
                                "field '{key}' must be a 24-character hex id"
                            )));
                        }
                    }
                }
                validate_id_fields(val, depth + 1, max_depth)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_id_fields(item, depth + 1, max_depth)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Sanitize an update document.
///
/// Every top-level key must be an allowlisted update operator; any other key
/// (operator or plain field alike) rejects the update. Operator bodies are
/// then deep-cleaned like ordinary documents.
pub fn sanitize_update(update: &Value, max_depth: usize) -> AppResult<Value> {
    let map = update.as_object().ok_or_else(|| {
        SecurityError::Sanitization("update must be a JSON object".to_string())
    })?;

    if map.is_empty() {
        return Err(SecurityError::Sanitization(
            "update must contain at least one operator".to_string(),
        ));
    }

    let mut out = Map::with_capacity(map.len());
    for (key, body) in map {
        if !ALLOWED_UPDATE_OPERATORS.contains(&key.as_str()) {
            return Err(SecurityError::Sanitization(format!(
                "update operator '{key}' is not allowed"
            )));
        }
        out.insert(key.clone(), sanitize_document(body, max_depth)?);
    }
    Ok(Value::Object(out))
}

/// Sanitize an aggregation pipeline.
///
/// Each stage must be an object with exactly one key, and that key must be
/// an allowlisted stage. `$match` bodies are treated as filters (with id
/// validation); other stage bodies are deep-cleaned as documents.
pub fn sanitize_pipeline(pipeline: &[Value], max_depth: usize) -> AppResult<Vec<Value>> {
    let mut out = Vec::with_capacity(pipeline.len());
    for stage in pipeline {
        let map = stage.as_object().ok_or_else(|| {
            SecurityError::Sanitization("pipeline stage must be a JSON object".to_string())
        })?;
        let mut entries = map.iter();
        let (name, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(SecurityError::Sanitization(
                    "pipeline stage must contain exactly one operator".to_string(),
                ));
            }
        };

        if !ALLOWED_PIPELINE_STAGES.contains(&name.as_str()) {
            return Err(SecurityError::Sanitization(format!(
                "pipeline stage '{name}' is not allowed"
            )));
        }

        let cleaned_body = if name == "$match" {
            sanitize_filter(body, max_depth)?
        } else {
            sanitize_document(body, max_depth)?
        };

        let mut cleaned = Map::with_capacity(1);
        cleaned.insert(name.clone(), cleaned_body);
        out.push(Value::Object(cleaned));
    }
    Ok(out)
}

/// Build a projection document from a field-name list.
///
/// Only plain dotted identifiers (`[A-Za-z0-9_.]`) survive; anything else is
/// dropped with a warning rather than rejected, since a projection can only
/// narrow what is returned.
pub fn create_safe_projection(fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        let valid = !field.is_empty()
            && !field.starts_with('$')
            && field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if valid {
            out.insert((*field).to_string(), Value::from(1));
        } else {
            warn!(field = %field, "Dropped invalid projection field");
        }
    }
    Value::Object(out)
}
