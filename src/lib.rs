// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod ingest;
pub mod logging;
pub mod opendota;
pub mod rate_limit;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::ingest::{MatchPipeline, RunParams, RunSummary, StatePreview};
pub use crate::opendota::{MatchId, MatchSource, OpenDotaClient};
pub use crate::rate_limit::RateLimiter;
