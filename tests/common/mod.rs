// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use match_pipeline::ingest::archive::PayloadArchive;
use match_pipeline::ingest::discovery::DiscoveryFilter;
use match_pipeline::ingest::state::{LedgerEntry, StateStore, TrackingState};
use match_pipeline::opendota::{ApiError, OpenDotaTransport};
use match_pipeline::{MatchId, MatchPipeline, MatchSource, OpenDotaClient, RateLimiter, RunParams};

/// Scripted OpenDota: queued explorer bodies, fixed match bodies, call log.
#[derive(Default)]
pub struct FakeOpenDota {
    pub patches: Option<Value>,
    explorer: Mutex<VecDeque<Value>>,
    matches: HashMap<MatchId, Value>,
    sql_log: Mutex<Vec<String>>,
    fetched: Mutex<Vec<MatchId>>,
    parse_requests: Mutex<Vec<MatchId>>,
    patch_calls: Mutex<usize>,
    /// Reply to parse requests: `None` is HTTP 200, `Some(Err)` a transport failure.
    parse_reply: Option<Result<u16, String>>,
}

impl FakeOpenDota {
    pub fn new() -> Self {
        Self {
            patches: Some(json!([
                { "name": "7.38", "id": 57, "date": "2025-02-19T00:00:00Z" },
                { "name": "7.39", "id": 58, "date": "2025-05-22T23:36:01.602Z" }
            ])),
            ..Self::default()
        }
    }

    pub fn without_patches(mut self) -> Self {
        self.patches = None;
        self
    }

    pub fn explorer(self, body: Value) -> Self {
        self.explorer.lock().unwrap().push_back(body);
        self
    }

    pub fn parsed(mut self, id: MatchId, start_time: i64) -> Self {
        self.matches.insert(id, parsed_match(id, start_time));
        self
    }

    pub fn unparsed(mut self, id: MatchId) -> Self {
        self.matches
            .insert(id, json!({ "match_id": id, "od_data": { "has_parsed": false } }));
        self
    }

    /// Parse requests answer with this HTTP status.
    pub fn parse_status(mut self, status: u16) -> Self {
        self.parse_reply = Some(Ok(status));
        self
    }

    /// Parse requests fail at the transport level.
    pub fn parse_unreachable(mut self) -> Self {
        self.parse_reply = Some(Err("connection reset".into()));
        self
    }

    pub fn fetched(&self) -> Vec<MatchId> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.sql_log.lock().unwrap().clone()
    }

    pub fn parse_requests(&self) -> Vec<MatchId> {
        self.parse_requests.lock().unwrap().clone()
    }

    pub fn patch_calls(&self) -> usize {
        *self.patch_calls.lock().unwrap()
    }

    /// Every call that reached the transport, metered or not.
    pub fn total_calls(&self) -> usize {
        self.sql().len() + self.fetched().len() + self.parse_requests().len() + self.patch_calls()
    }
}

#[async_trait]
impl OpenDotaTransport for FakeOpenDota {
    async fn explorer(&self, sql: &str) -> Result<Value, ApiError> {
        self.sql_log.lock().unwrap().push(sql.to_string());
        Ok(self
            .explorer
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| json!({ "rows": [] })))
    }

    async fn match_details(&self, match_id: MatchId) -> Result<Value, ApiError> {
        self.fetched.lock().unwrap().push(match_id);
        self.matches
            .get(&match_id)
            .cloned()
            .ok_or(ApiError::Status(404))
    }

    async fn request_parse(&self, match_id: MatchId) -> Result<u16, ApiError> {
        self.parse_requests.lock().unwrap().push(match_id);
        match &self.parse_reply {
            None => Ok(200),
            Some(Ok(status)) => Ok(*status),
            Some(Err(e)) => Err(ApiError::Transport(e.clone())),
        }
    }

    async fn patches(&self) -> Result<Value, ApiError> {
        *self.patch_calls.lock().unwrap() += 1;
        self.patches.clone().ok_or(ApiError::Status(503))
    }
}

pub fn parsed_match(id: MatchId, start_time: i64) -> Value {
    json!({
        "match_id": id,
        "start_time": start_time,
        "duration": 2400,
        "patch": 58,
        "radiant_win": true,
        "od_data": { "has_parsed": true }
    })
}

/// Explorer answer to the `MIN(start_time)` query.
pub fn horizon(min: i64) -> Value {
    json!({ "fields": [{ "name": "min" }], "rows": [[min]] })
}

/// Explorer answer to the discovery query, positional rows.
pub fn discovered(rows: &[(MatchId, i64)]) -> Value {
    let rows: Vec<Value> = rows.iter().map(|(id, st)| json!([id, st])).collect();
    json!({
        "fields": [{ "name": "match_id" }, { "name": "start_time" }],
        "rows": rows
    })
}

pub fn ledger_entry(id: MatchId, start_time: i64) -> LedgerEntry {
    LedgerEntry {
        match_id: id,
        start_time,
        source: MatchSource::PublicMatches,
        downloaded_time: Utc::now(),
        file_size: 1024,
        patch: "58".into(),
    }
}

pub fn tracking_store(root: &Path) -> StateStore {
    StateStore::new(root.join("tracking"))
}

/// Write initial state files under `root/tracking`.
pub fn seed_state(root: &Path, state: &TrackingState) -> StateStore {
    let store = tracking_store(root);
    store.init().unwrap();
    store.save(state).unwrap();
    store
}

pub fn pipeline(root: &Path, fake: FakeOpenDota, api_limit: u32) -> MatchPipeline<FakeOpenDota> {
    let client = OpenDotaClient::new(fake, RateLimiter::per_minute(10_000), api_limit);
    MatchPipeline::new(
        client,
        tracking_store(root),
        PayloadArchive::new(root.join("raw/matches"), root.join("raw/public_matches")),
        DiscoveryFilter::default(),
        RunParams::default(),
    )
}
