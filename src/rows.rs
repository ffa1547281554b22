//! Row normalization and last-write-wins reconciliation.
//!
//! Remote rows arrive as loose JSON; the rest of the engine only handles
//! [`NormalizedRow`]s, which are guaranteed a stable `id` and a `last_updated`
//! timestamp. Reconciliation is last-write-wins: no conflict is detected or
//! reported, the newer row silently survives.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A remote row with guaranteed identity and recency metadata.
///
/// `data` keeps the full remote payload (domain shapes stay opaque to the
/// engine); `id` and `last_updated` are extracted copies used for merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRow {
    pub id: String,
    /// Epoch milliseconds of the row's most recent known update.
    pub last_updated: i64,
    pub data: Value,
}

/// Parse a JSON value as an epoch-millisecond timestamp.
///
/// Accepts epoch numbers (milliseconds), RFC 3339 strings, and bare
/// `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp_millis());
            }
            None
        }
        _ => None,
    }
}

fn extract_id(raw: &Value) -> Option<String> {
    for key in ["id", "docId"] {
        match raw.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Normalize a raw remote row.
///
/// `id` comes from the row's `id` or `docId` field; rows with neither are
/// unusable (a synthetic id would not be stable across fetches) and yield
/// `None`. `last_updated` falls back through
/// `lastUpdated -> updatedAt -> date_field -> createdAt -> now_ms`.
///
/// Pure function: the input is not mutated, the returned row carries a copy
/// of the payload with `id` and `docId` made consistent.
pub fn normalize_row(raw: &Value, date_field: Option<&str>, now_ms: i64) -> Option<NormalizedRow> {
    let id = extract_id(raw)?;

    let mut fallbacks: Vec<&str> = vec!["lastUpdated", "updatedAt"];
    if let Some(field) = date_field {
        fallbacks.push(field);
    }
    fallbacks.push("createdAt");

    let last_updated = fallbacks
        .iter()
        .filter_map(|key| raw.get(*key).and_then(parse_timestamp))
        .next()
        .unwrap_or(now_ms);

    let mut data = raw.clone();
    if let Value::Object(ref mut map) = data {
        map.insert("id".to_string(), Value::String(id.clone()));
        map.insert("docId".to_string(), Value::String(id.clone()));
    }

    Some(NormalizedRow {
        id,
        last_updated,
        data,
    })
}

/// Normalize a batch, dropping rows without a usable id.
pub fn normalize_rows(raw: &[Value], date_field: Option<&str>, now_ms: i64) -> Vec<NormalizedRow> {
    let mut rows = Vec::with_capacity(raw.len());
    for value in raw {
        match normalize_row(value, date_field, now_ms) {
            Some(row) => rows.push(row),
            None => warn!("Dropping remote row without id/docId"),
        }
    }
    rows
}

/// Sort key for merged output: a creation-date-like field when present,
/// otherwise the update timestamp.
fn sort_key(row: &NormalizedRow) -> i64 {
    row.data
        .get("createdAt")
        .and_then(parse_timestamp)
        .unwrap_or(row.last_updated)
}

/// Union two row sets keyed by id, keeping the newer of any duplicate.
///
/// Ties keep the remote (later-seen) copy. The result is sorted descending by
/// creation date so callers can install it directly.
pub fn merge_by_newest(
    local: Vec<NormalizedRow>,
    remote: Vec<NormalizedRow>,
) -> Vec<NormalizedRow> {
    let mut merged: HashMap<String, NormalizedRow> = HashMap::with_capacity(local.len());

    for row in local {
        merged.insert(row.id.clone(), row);
    }
    for row in remote {
        match merged.get(&row.id) {
            Some(existing) if existing.last_updated > row.last_updated => {}
            _ => {
                merged.insert(row.id.clone(), row);
            }
        }
    }

    let mut rows: Vec<NormalizedRow> = merged.into_values().collect();
    rows.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
    rows
}
