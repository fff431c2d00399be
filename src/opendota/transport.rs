// src/opendota/transport.rs
//! Raw OpenDota endpoints. The transport only moves bytes and decodes JSON;
//! metering, rate limiting and classification live in [`super::client`].

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::MatchId;

/// Failure taxonomy for a single remote call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed JSON: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// The four endpoints the pipeline needs.
#[async_trait]
pub trait OpenDotaTransport: Send + Sync {
    /// `GET /explorer?sql=...`
    async fn explorer(&self, sql: &str) -> Result<Value, ApiError>;

    /// `GET /matches/{id}`
    async fn match_details(&self, match_id: MatchId) -> Result<Value, ApiError>;

    /// `POST /request/{id}`; returns the HTTP status, whatever it is.
    async fn request_parse(&self, match_id: MatchId) -> Result<u16, ApiError>;

    /// `GET /constants/patch`
    async fn patches(&self) -> Result<Value, ApiError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("match-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.query(&[("api_key", key.as_str())]),
            None => req,
        }
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = self.with_key(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl OpenDotaTransport for HttpTransport {
    async fn explorer(&self, sql: &str) -> Result<Value, ApiError> {
        let req = self.http.get(self.url("explorer")).query(&[("sql", sql)]);
        self.get_json(req).await
    }

    async fn match_details(&self, match_id: MatchId) -> Result<Value, ApiError> {
        let req = self.http.get(self.url(&format!("matches/{match_id}")));
        self.get_json(req).await
    }

    async fn request_parse(&self, match_id: MatchId) -> Result<u16, ApiError> {
        let req = self.http.post(self.url(&format!("request/{match_id}")));
        let resp = self.with_key(req).send().await?;
        Ok(resp.status().as_u16())
    }

    async fn patches(&self) -> Result<Value, ApiError> {
        let req = self.http.get(self.url("constants/patch"));
        self.get_json(req).await
    }
}
