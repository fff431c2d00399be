// src/ingest/discovery.rs
//! New-match discovery over the Explorer SQL endpoint.
//!
//! Two queries per run. The first finds the earliest qualifying match since
//! the current patch (the dedup horizon); only ledger rows at or after that
//! horizon can collide with fresh results, which keeps the `NOT IN` list short
//! enough for the query-length limit. The second query returns the newest
//! qualifying matches minus everything already known.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::state::TrackingState;
use crate::opendota::rows::row_i64;
use crate::opendota::{MatchId, MatchSource, OpenDotaClient, OpenDotaTransport, Row};

/// Hero IDs tracked by default.
pub const DEFAULT_TARGET_HEROES: [u32; 7] = [20, 26, 27, 28, 30, 31, 85];

/// Fixed predicate shared by both discovery queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryFilter {
    pub min_rank_tier: u32,
    pub lobby_type: u32,
    pub game_mode: u32,
    pub enable_hero_filtering: bool,
    pub target_hero_ids: Vec<u32>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            min_rank_tier: 70,
            lobby_type: 7,
            game_mode: 22,
            enable_hero_filtering: true,
            target_hero_ids: DEFAULT_TARGET_HEROES.to_vec(),
        }
    }
}

impl DiscoveryFilter {
    /// Roster overlap with the target heroes, or an always-true condition
    /// when hero filtering is off (or the pool is empty).
    pub fn hero_condition(&self) -> String {
        if !self.enable_hero_filtering || self.target_hero_ids.is_empty() {
            return "1=1".to_string();
        }
        format!(
            "((radiant_team || dire_team) && ARRAY[{}])",
            join_ids(self.target_hero_ids.iter())
        )
    }

    fn predicate(&self, watermark: i64) -> String {
        format!(
            "start_time > {watermark}\n  AND avg_rank_tier >= {}\n  AND lobby_type = {}\n  AND game_mode = {}\n  AND {}",
            self.min_rank_tier,
            self.lobby_type,
            self.game_mode,
            self.hero_condition()
        )
    }

    /// `SELECT MIN(start_time)` over the qualifying window.
    pub fn horizon_query(&self, source: MatchSource, watermark: i64) -> String {
        format!(
            "SELECT MIN(start_time)\nFROM {source}\nWHERE {}",
            self.predicate(watermark)
        )
    }

    /// Newest qualifying matches, excluding known IDs.
    pub fn discovery_query(
        &self,
        source: MatchSource,
        watermark: i64,
        exclude: &BTreeSet<MatchId>,
        limit: usize,
    ) -> String {
        let exclusion = if exclude.is_empty() {
            String::new()
        } else {
            format!("\n  AND match_id NOT IN ({})", join_ids(exclude.iter()))
        };
        format!(
            "SELECT match_id, start_time\nFROM {source}\nWHERE {}{exclusion}\nORDER BY start_time DESC\nLIMIT {limit}",
            self.predicate(watermark)
        )
    }
}

fn join_ids<T: ToString>(ids: impl Iterator<Item = T>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

/// IDs that must not come back as "new": ledger rows at or after the horizon
/// plus every backlog row regardless of age.
pub fn build_exclusion_set(state: &TrackingState, horizon: i64) -> BTreeSet<MatchId> {
    let mut out: BTreeSet<MatchId> = state
        .ledger
        .iter()
        .filter(|e| e.start_time >= horizon)
        .map(|e| e.match_id)
        .collect();
    out.extend(state.backlog.ids());
    out
}

/// A match returned by discovery, not yet fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub match_id: MatchId,
    pub start_time: i64,
}

/// Discover up to `batch_size` unseen matches. Every failure path (no patch,
/// empty horizon, exhausted budget, failed query) yields an empty list.
pub async fn discover_new_matches<T: OpenDotaTransport>(
    client: &mut OpenDotaClient<T>,
    filter: &DiscoveryFilter,
    state: &TrackingState,
    source: MatchSource,
    batch_size: usize,
) -> Vec<Candidate> {
    if source != MatchSource::PublicMatches {
        warn!(target: "discovery", %source, "source not supported for discovery");
        return Vec::new();
    }

    let Some(patch) = client.current_patch().await else {
        warn!(target: "discovery", "no watermark available, skipping discovery");
        return Vec::new();
    };
    let watermark = patch.watermark();

    if client.budget_exhausted() {
        warn!(target: "discovery", "API limit reached, skipping discovery");
        return Vec::new();
    }

    let rows = client
        .run_query(&filter.horizon_query(source, watermark))
        .await;
    let Some(horizon) = rows.first().and_then(|r| row_i64(r, "min")) else {
        warn!(target: "discovery", watermark, "no qualifying matches since watermark");
        return Vec::new();
    };
    info!(target: "discovery", horizon, "dedup horizon resolved");

    if client.budget_exhausted() {
        warn!(target: "discovery", "API limit reached after horizon query");
        return Vec::new();
    }

    let exclude = build_exclusion_set(state, horizon);
    info!(target: "discovery", excluded = exclude.len(), "built exclusion set");

    let rows = client
        .run_query(&filter.discovery_query(source, watermark, &exclude, batch_size))
        .await;

    let out = collect_candidates(&rows, &exclude);
    info!(target: "discovery", %source, found = out.len(), "discovered new matches");
    out
}

/// Turn discovery rows into candidates. Rows missing `match_id` or
/// `start_time` are dropped; excluded and repeated IDs are skipped.
pub fn collect_candidates(rows: &[Row], exclude: &BTreeSet<MatchId>) -> Vec<Candidate> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(id) = row_i64(row, "match_id").and_then(|v| MatchId::try_from(v).ok()) else {
            warn!(target: "discovery", row = ?row, "discovery row without a usable match_id");
            continue;
        };
        let Some(start_time) = row_i64(row, "start_time") else {
            warn!(target: "discovery", match_id = id, "discovery row without start_time");
            continue;
        };
        if exclude.contains(&id) || !seen.insert(id) {
            continue;
        }
        out.push(Candidate {
            match_id: id,
            start_time,
        });
    }
    out
}
