//! HTTP client for a running daemon
//!
//! Used by the `send` and `status` subcommands so that hooks and scripts
//! can submit events without linking the pipeline.

use crate::error::{Error, Result};
use chime_common::{NotificationEvent, SubmitOutcome};
use std::time::Duration;

pub struct ChimeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ChimeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit one event; a gate refusal is a normal `Ok` outcome
    pub async fn submit(&self, event: &NotificationEvent) -> Result<SubmitOutcome> {
        let response = self
            .http
            .post(format!("{}/api/v1/events", self.base_url))
            .json(event)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            Error::Http(format!("unexpected response ({}): {}", status, body.trim()))
        })
    }

    /// Fetch the status snapshot as raw JSON
    pub async fn status(&self) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/api/v1/status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
