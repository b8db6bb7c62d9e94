//! HTTP client for the remote warehouse simulator.

use anyhow::Context;
use floorview_engine::TransportError;
use floorview_protocol::{paths, Ack, TaskRequest};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl SimulatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build simulator http client")?;
        Ok(Self::from_client(http, base_url))
    }

    pub fn from_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_init(&self) -> Result<String, TransportError> {
        self.get(paths::INIT).await
    }

    pub async fn fetch_update(&self) -> Result<String, TransportError> {
        self.get(paths::UPDATE).await
    }

    /// The simulator's reply is informational only; an unreadable body still counts as
    /// accepted when the status is 2xx.
    pub async fn add_task(&self, req: &TaskRequest) -> Result<Ack, TransportError> {
        let resp = self
            .http
            .post(self.url(paths::ADD_TASK))
            .json(req)
            .send()
            .await
            .map_err(network)?;
        let body = checked_text(resp).await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    pub async fn reset_shift(&self) -> Result<(), TransportError> {
        let resp = self
            .http
            .post(self.url(paths::RESET_SHIFT))
            .send()
            .await
            .map_err(network)?;
        checked_text(resp).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<String, TransportError> {
        let resp = self
            .http
            .get(self.url(path))
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(network)?;
        checked_text(resp).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn checked_text(resp: reqwest::Response) -> Result<String, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }
    resp.text().await.map_err(network)
}

fn network(e: reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}
