// src/ingest/mod.rs
//! Daily match collection run: backlog replay, discovery, ingest, persist.

pub mod archive;
pub mod discovery;
pub mod state;

use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::opendota::{
    FetchOutcome, HttpTransport, MatchId, MatchSource, OpenDotaClient, OpenDotaTransport,
};
use crate::rate_limit::RateLimiter;
use archive::PayloadArchive;
use discovery::{discover_new_matches, Candidate, DiscoveryFilter};
use state::{BacklogEntry, BacklogStatus, LedgerEntry, StateStore, TrackingState};

/// One-time metrics registration (so series show up once a recorder exists).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_api_calls_total",
            "OpenDota calls counted against the run budget."
        );
        describe_counter!(
            "pipeline_matches_ingested_total",
            "Parsed matches archived and added to the ledger."
        );
        describe_counter!(
            "pipeline_backlog_enqueued_total",
            "Discovered matches queued for a later parse retry."
        );
        describe_counter!(
            "pipeline_backlog_skipped_total",
            "Backlog entries that hit the retry ceiling."
        );
        describe_counter!(
            "pipeline_rows_dropped_total",
            "Explorer rows dropped as malformed."
        );
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the pipeline last finished a run."
        );
    });
}

/// Immutable parameters of one run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub source: MatchSource,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 2,
            source: MatchSource::PublicMatches,
        }
    }
}

/// Where a record ended up after its fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Ingested,
    Backlogged,
    Skipped,
}

/// Structured result of one run, consumed by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub backlog_processed: usize,
    pub new_matches_processed: usize,
    pub total_matches_processed: usize,
    pub api_calls_used: u32,
    pub api_limit: u32,
    pub remaining_backlog: usize,
    pub total_downloaded: usize,
}

impl RunSummary {
    /// API usage in percent of the budget.
    pub fn api_usage_pct(&self) -> f64 {
        if self.api_limit == 0 {
            return 100.0;
        }
        f64::from(self.api_calls_used) / f64::from(self.api_limit) * 100.0
    }
}

/// State counts shown by dry runs and `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePreview {
    pub downloaded_matches: usize,
    pub downloaded_public: usize,
    pub downloaded_competitive: usize,
    pub backlog_pending: usize,
    pub backlog_skipped: usize,
    pub archived_public: usize,
    pub archived_competitive: usize,
    pub max_new_matches: usize,
}

fn round2(d: Duration) -> f64 {
    (d.as_secs_f64() * 100.0).round() / 100.0
}

/// Owns everything one run touches.
pub struct MatchPipeline<T: OpenDotaTransport> {
    client: OpenDotaClient<T>,
    store: StateStore,
    archive: PayloadArchive,
    filter: DiscoveryFilter,
    params: RunParams,
}

impl MatchPipeline<HttpTransport> {
    /// Wire the HTTP-backed pipeline from config.
    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(
            &cfg.api.base_url,
            cfg.api.api_key.clone(),
            Duration::from_secs(cfg.api.request_timeout_secs),
        )?;
        let client = OpenDotaClient::new(
            transport,
            RateLimiter::per_minute(cfg.api.rate_limit_per_minute),
            cfg.pipeline.daily_api_limit,
        );
        Ok(Self::new(
            client,
            StateStore::new(&cfg.data.tracking_dir),
            PayloadArchive::new(&cfg.data.raw_matches_dir, &cfg.data.public_matches_dir),
            cfg.discovery.clone(),
            RunParams {
                batch_size: cfg.pipeline.batch_size,
                max_attempts: cfg.pipeline.max_attempts,
                source: MatchSource::PublicMatches,
            },
        ))
    }
}

impl<T: OpenDotaTransport> MatchPipeline<T> {
    pub fn new(
        client: OpenDotaClient<T>,
        store: StateStore,
        archive: PayloadArchive,
        filter: DiscoveryFilter,
        params: RunParams,
    ) -> Self {
        info!(
            target: "pipeline",
            api_limit = client.api_limit(),
            hero_filtering = filter.enable_hero_filtering,
            "pipeline initialized"
        );
        Self {
            client,
            store,
            archive,
            filter,
            params,
        }
    }

    pub fn client(&self) -> &OpenDotaClient<T> {
        &self.client
    }

    /// Load state without touching the network.
    pub fn preview(&self) -> anyhow::Result<StatePreview> {
        let state = self.store.load()?;
        Ok(StatePreview {
            downloaded_matches: state.ledger.len(),
            downloaded_public: state.ledger.count_by_source(MatchSource::PublicMatches),
            downloaded_competitive: state.ledger.count_by_source(MatchSource::Matches),
            backlog_pending: state.backlog.count_with_status(BacklogStatus::Pending),
            backlog_skipped: state.backlog.count_with_status(BacklogStatus::Skipped),
            archived_public: self.archive.count(MatchSource::PublicMatches),
            archived_competitive: self.archive.count(MatchSource::Matches),
            max_new_matches: self.params.batch_size,
        })
    }

    /// Execute one full run. Never fails: every problem ends up in the summary.
    pub async fn run(&mut self) -> RunSummary {
        ensure_metrics_described();
        let started = Instant::now();
        self.client.reset_usage();
        info!(target: "pipeline", "starting daily match pipeline");

        let mut state = match self.store.load() {
            Ok(s) => s,
            Err(e) => {
                error!(target: "pipeline", error = %format!("{e:#}"), "failed to load state");
                return RunSummary {
                    success: false,
                    error: Some(format!("failed to load state files: {e:#}")),
                    duration_seconds: round2(started.elapsed()),
                    api_calls_used: self.client.calls_used(),
                    api_limit: self.client.api_limit(),
                    ..RunSummary::default()
                };
            }
        };

        let backlog_processed = self.process_backlog(&mut state).await;

        let mut new_matches_processed = 0;
        if self.client.budget_exhausted() {
            warn!(target: "pipeline", "API limit reached, skipping discovery");
        } else {
            let candidates = discover_new_matches(
                &mut self.client,
                &self.filter,
                &state,
                self.params.source,
                self.params.batch_size,
            )
            .await;
            new_matches_processed = self.process_new(&mut state, &candidates).await;
        }

        let save_error = self
            .store
            .save(&state)
            .err()
            .map(|e| format!("failed to save state files: {e:#}"));
        if let Some(e) = &save_error {
            error!(target: "pipeline", error = %e, "state not persisted");
        }

        let summary = RunSummary {
            success: save_error.is_none(),
            error: save_error,
            duration_seconds: round2(started.elapsed()),
            backlog_processed,
            new_matches_processed,
            total_matches_processed: backlog_processed + new_matches_processed,
            api_calls_used: self.client.calls_used(),
            api_limit: self.client.api_limit(),
            remaining_backlog: state.backlog.len(),
            total_downloaded: state.ledger.len(),
        };
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            target: "pipeline",
            duration_seconds = summary.duration_seconds,
            processed = summary.total_matches_processed,
            api_calls_used = summary.api_calls_used,
            api_limit = summary.api_limit,
            "pipeline finished"
        );
        summary
    }

    /// Retry backlog entries that are still pending and under the ceiling.
    async fn process_backlog(&mut self, state: &mut TrackingState) -> usize {
        if state.backlog.is_empty() {
            info!(target: "pipeline", "no matches in parse backlog");
            return 0;
        }
        info!(target: "pipeline", entries = state.backlog.len(), "processing parse backlog");

        let ids: Vec<MatchId> = state.backlog.ids().collect();
        let mut processed = 0;
        for id in ids {
            if self.client.budget_exhausted() {
                warn!(target: "pipeline", "API limit reached during backlog processing");
                break;
            }
            let Some(entry) = state.backlog.get(id) else {
                continue;
            };
            if !entry.is_retryable(self.params.max_attempts) {
                debug!(
                    target: "pipeline",
                    match_id = id,
                    attempts = entry.attempts,
                    status = ?entry.status,
                    "backlog entry not retryable"
                );
                continue;
            }
            let source = entry.source;

            if state.ledger.contains(id) {
                state.backlog.remove(id);
                continue;
            }

            match self.ingest(id, source).await {
                Some(ledger_entry) => {
                    state.ledger.push(ledger_entry);
                    state.backlog.remove(id);
                    processed += 1;
                    self.log_outcome(id, RecordOutcome::Ingested);
                }
                None => {
                    let max = self.params.max_attempts;
                    if let Some(entry) = state.backlog.get_mut(id) {
                        let outcome = match entry.record_failure(Utc::now(), max) {
                            BacklogStatus::Skipped => {
                                counter!("pipeline_backlog_skipped_total").increment(1);
                                RecordOutcome::Skipped
                            }
                            BacklogStatus::Pending => RecordOutcome::Backlogged,
                        };
                        self.log_outcome(id, outcome);
                    }
                }
            }
        }

        info!(
            target: "pipeline",
            processed,
            remaining = state.backlog.len(),
            "backlog pass finished"
        );
        processed
    }

    /// Fetch freshly discovered candidates; unparsed ones go to the backlog.
    async fn process_new(&mut self, state: &mut TrackingState, candidates: &[Candidate]) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        let source = self.params.source;
        info!(target: "pipeline", count = candidates.len(), %source, "processing new matches");

        let mut processed = 0;
        for c in candidates {
            if self.client.budget_exhausted() {
                warn!(target: "pipeline", "API limit reached during new match processing");
                break;
            }
            let id = c.match_id;
            if state.ledger.contains(id) || state.backlog.contains(id) {
                debug!(target: "pipeline", match_id = id, "candidate already tracked");
                continue;
            }

            match self.ingest(id, source).await {
                Some(entry) => {
                    state.ledger.push(entry);
                    processed += 1;
                    self.log_outcome(id, RecordOutcome::Ingested);
                }
                None => {
                    // Enqueue regardless of whether the parse request went through.
                    self.client.request_parse(id).await;
                    state
                        .backlog
                        .insert(BacklogEntry::first_attempt(id, source, Utc::now()));
                    counter!("pipeline_backlog_enqueued_total").increment(1);
                    self.log_outcome(id, RecordOutcome::Backlogged);
                }
            }
        }

        info!(target: "pipeline", processed, %source, "new match pass finished");
        processed
    }

    /// Fetch one match; archive and build its ledger row when parsed.
    async fn ingest(&mut self, id: MatchId, source: MatchSource) -> Option<LedgerEntry> {
        let FetchOutcome::Complete(m) = self.client.fetch_match(id).await else {
            return None;
        };
        let file_size = match self.archive.write(source, id, &m.payload) {
            Ok(n) => n,
            Err(e) => {
                error!(target: "pipeline", match_id = id, error = %format!("{e:#}"), "failed to archive match");
                return None;
            }
        };
        counter!("pipeline_matches_ingested_total").increment(1);
        Some(LedgerEntry {
            match_id: id,
            start_time: m.start_time,
            source,
            downloaded_time: Utc::now(),
            file_size,
            patch: m.patch.to_string(),
        })
    }

    fn log_outcome(&self, id: MatchId, outcome: RecordOutcome) {
        info!(
            target: "pipeline",
            match_id = id,
            outcome = ?outcome,
            api_calls_used = self.client.calls_used(),
            "record processed"
        );
    }
}
