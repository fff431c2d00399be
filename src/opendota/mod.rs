// src/opendota/mod.rs
//! OpenDota access layer: HTTP transport, row normalization and the metered
//! client the pipeline talks to.

pub mod client;
pub mod rows;
pub mod transport;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::OpenDotaClient;
pub use rows::{normalize_explorer, Row};
pub use transport::{ApiError, HttpTransport, OpenDotaTransport};

pub const DEFAULT_BASE_URL: &str = "https://api.opendota.com/api";

pub type MatchId = u64;

/// Upstream table a match was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Matches,
    PublicMatches,
}

impl MatchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchSource::Matches => "matches",
            MatchSource::PublicMatches => "public_matches",
        }
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "matches" => Ok(MatchSource::Matches),
            "public_matches" => Ok(MatchSource::PublicMatches),
            other => Err(anyhow!(
                "invalid source '{other}', expected 'matches' or 'public_matches'"
            )),
        }
    }
}

/// A fully parsed match as returned by `/matches/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMatch {
    pub match_id: MatchId,
    pub start_time: i64,
    pub duration_secs: i64,
    pub patch: i64,
    /// Raw upstream body, archived as-is.
    pub payload: Value,
}

/// Result of a single match fetch. None of the variants is an error; the
/// caller decides whether to retry.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// `od_data.has_parsed` is true; full detail is available.
    Complete(Box<FetchedMatch>),
    /// Match unknown upstream or not parsed yet.
    NotReady,
    /// Transport, status or decoding failure.
    Unavailable,
}

/// Latest game patch, used as the discovery watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchInfo {
    pub name: String,
    pub id: i64,
    pub released_at: DateTime<Utc>,
}

impl PatchInfo {
    /// Unix seconds of the patch release.
    pub fn watermark(&self) -> i64 {
        self.released_at.timestamp()
    }
}

/// Classify a `/matches/{id}` body.
pub fn classify_match(body: Value) -> FetchOutcome {
    let Some(match_id) = body.get("match_id").and_then(Value::as_u64) else {
        return FetchOutcome::NotReady;
    };
    let parsed = body
        .get("od_data")
        .and_then(|od| od.get("has_parsed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !parsed {
        return FetchOutcome::NotReady;
    }

    let int_field = |key: &str| body.get(key).and_then(Value::as_i64).unwrap_or(0);
    FetchOutcome::Complete(Box::new(FetchedMatch {
        match_id,
        start_time: int_field("start_time"),
        duration_secs: int_field("duration"),
        patch: int_field("patch"),
        payload: body,
    }))
}

/// Pick the newest patch (highest `id`) from `/constants/patch`.
pub fn latest_patch(body: &Value) -> Option<PatchInfo> {
    let latest = body
        .as_array()?
        .iter()
        .filter(|p| p.is_object())
        .max_by_key(|p| p.get("id").and_then(Value::as_i64).unwrap_or(0))?;

    let date = latest.get("date").and_then(Value::as_str)?;
    let released_at = DateTime::parse_from_rfc3339(date).ok()?.with_timezone(&Utc);
    Some(PatchInfo {
        name: latest
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        id: latest.get("id").and_then(Value::as_i64).unwrap_or(0),
        released_at,
    })
}
