// src/config.rs
//! Pipeline configuration: TOML file + environment overrides.
//!
//! Lookup order for the file:
//! 1) explicit path (CLI `--config`)
//! 2) $PIPELINE_CONFIG_PATH
//! 3) config/pipeline.toml
//!
//! With no file at all the built-in defaults apply. Secrets never come from the
//! file: the API key is read from `OPENDOTA_API_KEY` only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::ingest::discovery::DiscoveryFilter;
use crate::logging::LoggingConfig;
use crate::opendota::DEFAULT_BASE_URL;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

pub const ENV_API_KEY: &str = "OPENDOTA_API_KEY";
pub const ENV_BASE_URL: &str = "OPENDOTA_API_BASE_URL";
pub const ENV_API_LIMIT: &str = "PIPELINE_DAILY_API_LIMIT";
pub const ENV_BATCH_SIZE: &str = "PIPELINE_BATCH_SIZE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub pipeline: RunConfig,
    pub discovery: DiscoveryFilter,
    pub data: DataConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit_per_minute: 60,
            request_timeout_secs: 30,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub daily_api_limit: u32,
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            daily_api_limit: 1800,
            batch_size: 50,
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub tracking_dir: PathBuf,
    pub raw_matches_dir: PathBuf,
    pub public_matches_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tracking_dir: PathBuf::from("data/tracking"),
            raw_matches_dir: PathBuf::from("data/raw/matches"),
            public_matches_dir: PathBuf::from("data/raw/public_matches"),
        }
    }
}

impl PipelineConfig {
    /// Parse a config file and apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let mut cfg: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the config file (explicit path, env, default location) or fall
    /// back to defaults + env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        let mut cfg = PipelineConfig::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        self.api.api_key = std::env::var(ENV_API_KEY)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Some(v) = parse_env::<u32>(ENV_API_LIMIT)? {
            self.pipeline.daily_api_limit = v;
        }
        if let Some(v) = parse_env::<usize>(ENV_BATCH_SIZE)? {
            self.pipeline.batch_size = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.rate_limit_per_minute == 0 {
            bail!("api.rate_limit_per_minute must be > 0");
        }
        if self.api.request_timeout_secs == 0 {
            bail!("api.request_timeout_secs must be > 0");
        }
        if self.pipeline.batch_size == 0 {
            bail!("pipeline.batch_size must be > 0");
        }
        if self.pipeline.max_attempts == 0 {
            bail!("pipeline.max_attempts must be > 0");
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{name} is not a valid number: {raw:?}")),
        _ => Ok(None),
    }
}
