//! Pagination and sort clamping.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::Config;

/// Client-supplied query options before clamping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQueryOptions {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub sort: Option<Value>,
}

/// Clamped, storage-safe query options.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub limit: u32,
    pub skip: u64,
    /// Field name to sort direction, always `1` or `-1`.
    pub sort: Option<Value>,
}

/// Clamp client-supplied query options into safe ranges.
///
/// - `limit`: defaults when absent or non-positive, capped at the configured
///   maximum. Out-of-range values clamp silently; a wrong page size is not
///   worth failing a read over.
/// - `skip`: floored at zero, capped at the configured maximum.
/// - `sort`: object keys pass through unchanged; every direction value is
///   coerced to `1` or `-1` (anything non-negative sorts ascending).
///   Non-object sorts are discarded.
pub fn sanitize_query_options(raw: &RawQueryOptions, config: &Config) -> QueryOptions {
    let limit = match raw.limit {
        Some(l) if l > 0 => u32::try_from(l)
            .unwrap_or(config.query_max_limit)
            .min(config.query_max_limit),
        _ => config.query_default_limit,
    };

    let skip = match raw.skip {
        Some(s) if s > 0 => u64::try_from(s)
            .unwrap_or(config.query_max_skip)
            .min(config.query_max_skip),
        _ => 0,
    };

    let sort = raw.sort.as_ref().and_then(|s| s.as_object()).map(|map| {
        let coerced: Map<String, Value> = map
            .iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .map(|(key, dir)| {
                let descending = matches!(dir, Value::Number(n) if n.as_f64().unwrap_or(1.0) < 0.0)
                    || matches!(dir, Value::String(s) if s == "desc" || s == "-1");
                (key.clone(), Value::from(if descending { -1 } else { 1 }))
            })
            .collect();
        Value::Object(coerced)
    });

    QueryOptions { limit, skip, sort }
}
