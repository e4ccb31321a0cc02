//! Typed HTTP client for the relight daemon REST API.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::directory::LocationRecord;
use crate::domain::types::{DaemonHealth, ReachabilityEntry};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9300";

pub struct RelightClient {
    base_url: String,
    http: Client,
}

impl RelightClient {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            http,
        })
    }

    pub async fn health(&self) -> Result<DaemonHealth> {
        self.get("/health").await
    }

    pub async fn locations(&self) -> Result<Vec<LocationRecord>> {
        self.get("/api/v1/locations").await
    }

    pub async fn reachability(&self) -> Result<Vec<ReachabilityEntry>> {
        self.get("/api/v1/reachability").await
    }

    pub async fn reset_all(&self, timeout: Option<u64>) -> Result<Value> {
        self.post_batch("/api/v1/reset/all", timeout).await
    }

    pub async fn reset_down(&self, timeout: Option<u64>) -> Result<Value> {
        self.post_batch("/api/v1/reset/down", timeout).await
    }

    // ── Internal helpers ───────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }

        resp.json()
            .await
            .with_context(|| format!("parsing response from {}", url))
    }

    /// Batch endpoints answer the envelope on success AND on partial
    /// failure, so the body comes back either way.
    async fn post_batch(&self, path: &str, timeout: Option<u64>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let body = match timeout {
            Some(t) => serde_json::json!({ "timeout": t }),
            None => serde_json::json!({}),
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;

        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .with_context(|| format!("parsing response from {}", url))?;

        if status.is_server_error() && value.get("success").is_none() {
            bail!("{} returned {}", url, status);
        }
        Ok(value)
    }
}
