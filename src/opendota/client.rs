// src/opendota/client.rs
//! Metered OpenDota client.
//!
//! Wraps a transport with the rate limiter and the per-run API call counter.
//! Every counted call bumps the counter exactly once, success or not. Failures
//! are logged and collapsed into empty/absent results; retry policy belongs to
//! the caller.

use metrics::counter;
use tracing::{debug, info, warn};

use super::rows::normalize_explorer;
use super::transport::OpenDotaTransport;
use super::{classify_match, latest_patch, FetchOutcome, MatchId, PatchInfo, Row};
use crate::rate_limit::RateLimiter;

pub struct OpenDotaClient<T: OpenDotaTransport> {
    transport: T,
    limiter: RateLimiter,
    api_limit: u32,
    calls_used: u32,
}

impl<T: OpenDotaTransport> OpenDotaClient<T> {
    pub fn new(transport: T, limiter: RateLimiter, api_limit: u32) -> Self {
        Self {
            transport,
            limiter,
            api_limit,
            calls_used: 0,
        }
    }

    pub fn calls_used(&self) -> u32 {
        self.calls_used
    }

    pub fn api_limit(&self) -> u32 {
        self.api_limit
    }

    /// True once the run budget is spent; no new unit of work should start.
    pub fn budget_exhausted(&self) -> bool {
        self.calls_used >= self.api_limit
    }

    /// Start a fresh run: the counter covers one pipeline run only.
    pub fn reset_usage(&mut self) {
        self.calls_used = 0;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn record_call(&mut self) {
        self.calls_used = self.calls_used.saturating_add(1);
        counter!("pipeline_api_calls_total").increment(1);
    }

    /// Run an Explorer SQL query and return normalized rows.
    pub async fn run_query(&mut self, sql: &str) -> Vec<Row> {
        let sql = sql.trim();
        debug!(target: "opendota", %sql, "explorer query");
        self.limiter.acquire().await;
        let result = self.transport.explorer(sql).await;
        self.record_call();

        match result {
            Ok(body) => {
                let (rows, dropped) = normalize_explorer(body);
                if dropped > 0 {
                    counter!("pipeline_rows_dropped_total").increment(dropped as u64);
                }
                info!(target: "opendota", rows = rows.len(), dropped, "explorer query returned");
                rows
            }
            Err(e) => {
                warn!(target: "opendota", error = %e, "explorer query failed");
                Vec::new()
            }
        }
    }

    /// Fetch one match and classify it by parse completeness.
    pub async fn fetch_match(&mut self, match_id: MatchId) -> FetchOutcome {
        debug!(target: "opendota", match_id, "fetching match");
        self.limiter.acquire().await;
        let result = self.transport.match_details(match_id).await;
        self.record_call();

        match result {
            Ok(body) => {
                let outcome = classify_match(body);
                match &outcome {
                    FetchOutcome::Complete(m) => info!(
                        target: "opendota",
                        match_id,
                        duration_min = m.duration_secs / 60,
                        patch = m.patch,
                        "match is parsed"
                    ),
                    _ => warn!(target: "opendota", match_id, "match not parsed or not found"),
                }
                outcome
            }
            Err(e) => {
                warn!(target: "opendota", match_id, error = %e, "match fetch failed");
                FetchOutcome::Unavailable
            }
        }
    }

    /// Ask OpenDota to parse a match. Best effort: the result only feeds logs.
    pub async fn request_parse(&mut self, match_id: MatchId) -> bool {
        self.limiter.acquire().await;
        let result = self.transport.request_parse(match_id).await;
        self.record_call();

        match result {
            Ok(200) => {
                info!(target: "opendota", match_id, "parse request sent");
                true
            }
            Ok(status) => {
                warn!(target: "opendota", match_id, status, "parse request rejected");
                false
            }
            Err(e) => {
                warn!(target: "opendota", match_id, error = %e, "parse request failed");
                false
            }
        }
    }

    /// Current patch metadata. Rate limited, not counted against the run budget.
    pub async fn current_patch(&mut self) -> Option<PatchInfo> {
        self.limiter.acquire().await;
        match self.transport.patches().await {
            Ok(body) => {
                let patch = latest_patch(&body);
                match &patch {
                    Some(p) => info!(
                        target: "opendota",
                        patch = %p.name,
                        watermark = p.watermark(),
                        "current patch resolved"
                    ),
                    None => warn!(target: "opendota", "patch constants missing a usable release date"),
                }
                patch
            }
            Err(e) => {
                warn!(target: "opendota", error = %e, "patch constants fetch failed");
                None
            }
        }
    }
}
