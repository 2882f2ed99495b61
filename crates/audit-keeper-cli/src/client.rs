//! HTTP client for the replay control and health endpoints.

use crate::CliError;
use audit_keeper_core::{BulkOutcome, ReplayStatus};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Replay actions that take no parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Resume,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Resume => "resume",
        }
    }

    fn bulk_route(&self) -> &'static str {
        match self {
            Self::Start => "v1/replay/startAll",
            Self::Stop => "v1/replay/stopAll",
            Self::Resume => "v1/replay/resumeAll",
        }
    }
}

/// Which health endpoint to query
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum HealthComponent {
    /// Overall service health
    Overall,
    /// Broker topology health
    Broker,
    /// Readiness to accept audits
    Ready,
}

impl HealthComponent {
    fn route(&self) -> &'static str {
        match self {
            Self::Overall => "health",
            Self::Broker => "health/broker",
            Self::Ready => "health/ready",
        }
    }
}

/// Health endpoint answer; unhealthy answers are not errors
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for a single Audit-Keeper instance
#[derive(Debug, Clone)]
pub struct ReplayClient {
    base: Url,
    http: reqwest::Client,
}

impl ReplayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CliError> {
        let mut base = Url::parse(base_url).map_err(|e| invalid_url(base_url, e))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, route: &str) -> Result<Url, CliError> {
        self.base
            .join(route)
            .map_err(|e| invalid_url(self.base.as_str(), e))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CliError> {
        let response = request.send().await?;
        debug!(url = %response.url(), status = %response.status(), "Service responded");
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(CliError::Api { status, message })
    }

    // ========================================================================
    // Single replay
    // ========================================================================

    /// Create a replay, optionally starting it, and return its id
    pub async fn create(
        &self,
        path_uri: &str,
        send_rate: i64,
        replay_unfinished_files: bool,
        start: bool,
    ) -> Result<String, CliError> {
        let route = if start {
            "v1/replay/createAndStart"
        } else {
            "v1/replay/create"
        };
        let form = [
            ("pathUri", path_uri.to_string()),
            ("sendRate", send_rate.to_string()),
            ("replayUnfinishedFiles", replay_unfinished_files.to_string()),
        ];

        let response = self
            .send(self.http.post(self.endpoint(route)?).form(&form))
            .await?;
        Ok(response.text().await?.trim().to_string())
    }

    pub async fn control(&self, id: &str, action: ControlAction) -> Result<(), CliError> {
        let route = format!("v1/replay/{}/{}", id, action.as_str());
        self.send(self.http.put(self.endpoint(&route)?)).await?;
        Ok(())
    }

    pub async fn update(&self, id: &str, send_rate: i64) -> Result<(), CliError> {
        let route = format!("v1/replay/{}/update", id);
        let form = [("sendRate", send_rate.to_string())];
        self.send(self.http.put(self.endpoint(&route)?).form(&form))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), CliError> {
        let route = format!("v1/replay/{}/delete", id);
        self.send(self.http.delete(self.endpoint(&route)?)).await?;
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<ReplayStatus, CliError> {
        let route = format!("v1/replay/{}/status", id);
        let response = self.send(self.http.get(self.endpoint(&route)?)).await?;
        Ok(response.json().await?)
    }

    // ========================================================================
    // Every replay
    // ========================================================================

    pub async fn control_all(&self, action: ControlAction) -> Result<BulkOutcome, CliError> {
        let response = self
            .send(self.http.put(self.endpoint(action.bulk_route())?))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn update_all(&self, send_rate: i64) -> Result<BulkOutcome, CliError> {
        let form = [("sendRate", send_rate.to_string())];
        let response = self
            .send(self.http.put(self.endpoint("v1/replay/updateAll")?).form(&form))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn delete_all(&self) -> Result<BulkOutcome, CliError> {
        let response = self
            .send(self.http.delete(self.endpoint("v1/replay/deleteAll")?))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn status_all(&self) -> Result<Vec<ReplayStatus>, CliError> {
        let response = self
            .send(self.http.get(self.endpoint("v1/replay/statusAll")?))
            .await?;
        Ok(response.json().await?)
    }

    // ========================================================================
    // Health
    // ========================================================================

    pub async fn health(&self, component: HealthComponent) -> Result<HealthReport, CliError> {
        let response = self
            .http
            .get(self.endpoint(component.route())?)
            .send()
            .await?;

        let status = response.status();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        Ok(HealthReport {
            healthy: status.is_success(),
            status: status.as_u16(),
            body,
        })
    }
}

fn invalid_url(url: &str, error: url::ParseError) -> CliError {
    CliError::InvalidArgument {
        arg: "url".to_string(),
        message: format!("{}: {}", url, error),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
