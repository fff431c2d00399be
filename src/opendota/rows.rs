// src/opendota/rows.rs
//! Explorer response normalization.
//!
//! The Explorer endpoint answers either `{fields: [...], rows: [[...]]}` with
//! positional rows or `{rows: [{...}]}` with keyed rows (sometimes mixed).
//! Everything is resolved here into one canonical [`Row`] mapping.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Canonical Explorer row: column name -> value.
pub type Row = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct ExplorerField {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExplorerBody {
    #[serde(default)]
    fields: Option<Vec<ExplorerField>>,
    #[serde(default)]
    rows: Option<Vec<Value>>,
    #[serde(default)]
    err: Option<Value>,
}

/// One wire row before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    Positional(Vec<Value>),
    Keyed(Row),
}

impl RawRow {
    fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Array(items) => Some(RawRow::Positional(items)),
            Value::Object(map) => Some(RawRow::Keyed(map)),
            _ => None,
        }
    }

    /// Resolve against the field list. Positional rows need a field list of
    /// the same arity.
    pub fn into_row(self, fields: Option<&[String]>) -> Option<Row> {
        match self {
            RawRow::Keyed(map) => Some(map),
            RawRow::Positional(items) => {
                let names = fields?;
                if names.len() != items.len() {
                    return None;
                }
                Some(names.iter().cloned().zip(items).collect())
            }
        }
    }
}

/// Normalize an Explorer body into rows. Returns the rows plus the number of
/// rows dropped as malformed.
pub fn normalize_explorer(body: Value) -> (Vec<Row>, usize) {
    let parsed: ExplorerBody = match serde_json::from_value(body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "explorer body has unexpected shape");
            return (Vec::new(), 0);
        }
    };
    if let Some(err) = parsed.err.filter(|e| !e.is_null()) {
        warn!(error = %err, "explorer reported a query error");
    }

    let names: Option<Vec<String>> = parsed
        .fields
        .map(|fs| fs.into_iter().map(|f| f.name).collect());

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for raw in parsed.rows.unwrap_or_default() {
        let shown = raw.to_string();
        match RawRow::from_value(raw).and_then(|r| r.into_row(names.as_deref())) {
            Some(row) => rows.push(row),
            None => {
                dropped += 1;
                warn!(row = %truncate(&shown, 120), "dropping malformed explorer row");
            }
        }
    }
    (rows, dropped)
}

/// Read an integer column. Explorer returns bigint aggregates as strings, so
/// numeric strings are accepted too.
pub fn row_i64(row: &Row, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
