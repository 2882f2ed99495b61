//! # RabbitMQ Management API Client
//!
//! [`BrokerAdmin`] over the RabbitMQ management plugin's HTTP API, using
//! basic authentication. All operations are scoped to one virtual host.

use super::{
    BindingDestination, BindingSpec, BrokerAdmin, BrokerConnector, BrokerError, ExchangeSpec,
    NodeInfo, QueueInfo, QueueSpec,
};
use crate::retry::duration_millis;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for the management API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementApiConfig {
    /// Base URL of the management plugin, e.g. `http://rabbit:15672`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the RabbitMQ management API
#[derive(Debug, Clone)]
pub struct ManagementApiClient {
    http: reqwest::Client,
    base_url: Url,
    config: ManagementApiConfig,
}

impl ManagementApiClient {
    /// Build a client. No request is made until the first call.
    pub fn new(config: ManagementApiConfig) -> Result<Self, BrokerError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| BrokerError::InvalidResponse {
            message: format!("Invalid management URL '{}': {}", config.base_url, e),
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::Unreachable {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn vhost(&self) -> &str {
        &self.config.vhost
    }

    /// Build `<base>/api/<segments...>`; each segment is percent-encoded so
    /// the default vhost `/` becomes `%2F`
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BrokerError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BrokerError::InvalidResponse {
                    message: format!("Management URL '{}' cannot be a base", self.base_url),
                })?;
            path.pop_if_empty().push("api");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, BrokerError> {
        debug!(method = %method, url = %url, "Management API request");

        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| BrokerError::Unreachable {
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(BrokerError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, BrokerError> {
        let url = self.endpoint(segments)?;
        let response = self.request(Method::GET, url, None).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::InvalidResponse {
                message: e.to_string(),
            })
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
    ) -> Result<(), BrokerError> {
        let url = self.endpoint(segments)?;
        self.request(method, url, body).await.map(|_| ())
    }

    /// Publish a message through `POST /api/exchanges/{vhost}/{exchange}/publish`.
    /// Returns whether the broker routed it to at least one queue.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
        correlation_id: Option<&str>,
    ) -> Result<bool, BrokerError> {
        let mut properties = serde_json::Map::new();
        properties.insert("delivery_mode".to_string(), serde_json::json!(2));
        properties.insert(
            "content_type".to_string(),
            serde_json::json!("application/json"),
        );
        if let Some(id) = correlation_id {
            properties.insert("correlation_id".to_string(), serde_json::json!(id));
        }

        let body = serde_json::json!({
            "properties": properties,
            "routing_key": routing_key,
            "payload": payload,
            "payload_encoding": "string",
        });

        let url = self.endpoint(&["exchanges", &self.config.vhost, exchange, "publish"])?;
        let response = self.request(Method::POST, url, Some(body)).await?;
        let result: PublishResponse =
            response
                .json()
                .await
                .map_err(|e| BrokerError::InvalidResponse {
                    message: e.to_string(),
                })?;
        Ok(result.routed)
    }

    /// `GET /api/overview`, used to verify credentials and reachability
    pub async fn overview(&self) -> Result<serde_json::Value, BrokerError> {
        self.get_json(&["overview"]).await
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    routed: bool,
}

fn binding_segment(destination_type: BindingDestination) -> &'static str {
    match destination_type {
        BindingDestination::Queue => "q",
        BindingDestination::Exchange => "e",
    }
}

/// Properties key the management API assigns to a binding without arguments
fn properties_key(binding: &BindingSpec) -> String {
    if binding.routing_key.is_empty() {
        "~".to_string()
    } else {
        binding.routing_key.clone()
    }
}

#[async_trait]
impl BrokerAdmin for ManagementApiClient {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, BrokerError> {
        self.get_json(&["nodes"]).await
    }

    async fn exchanges(&self) -> Result<Vec<ExchangeSpec>, BrokerError> {
        self.get_json(&["exchanges", &self.config.vhost]).await
    }

    async fn queues(&self) -> Result<Vec<QueueInfo>, BrokerError> {
        self.get_json(&["queues", &self.config.vhost]).await
    }

    async fn queue(&self, name: &str) -> Result<Option<QueueInfo>, BrokerError> {
        match self.get_json(&["queues", &self.config.vhost, name]).await {
            Ok(queue) => Ok(Some(queue)),
            Err(BrokerError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn bindings(&self) -> Result<Vec<BindingSpec>, BrokerError> {
        self.get_json(&["bindings", &self.config.vhost]).await
    }

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let body = serde_json::json!({
            "type": exchange.exchange_type,
            "durable": exchange.durable,
            "auto_delete": exchange.auto_delete,
            "internal": exchange.internal,
            "arguments": exchange.arguments,
        });
        self.send(
            Method::PUT,
            &["exchanges", &self.config.vhost, &exchange.name],
            Some(body),
        )
        .await
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.send(Method::DELETE, &["exchanges", &self.config.vhost, name], None)
            .await
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        let body = serde_json::json!({
            "durable": queue.durable,
            "auto_delete": queue.auto_delete,
            "exclusive": queue.exclusive,
            "arguments": queue.arguments,
        });
        self.send(
            Method::PUT,
            &["queues", &self.config.vhost, &queue.name],
            Some(body),
        )
        .await
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.send(Method::DELETE, &["queues", &self.config.vhost, name], None)
            .await
    }

    async fn bind(&self, binding: &BindingSpec) -> Result<(), BrokerError> {
        let body = serde_json::json!({
            "routing_key": binding.routing_key,
            "arguments": binding.arguments,
        });
        self.send(
            Method::POST,
            &[
                "bindings",
                &self.config.vhost,
                "e",
                &binding.source,
                binding_segment(binding.destination_type),
                &binding.destination,
            ],
            Some(body),
        )
        .await
    }

    async fn unbind(&self, binding: &BindingSpec) -> Result<(), BrokerError> {
        let key = properties_key(binding);
        self.send(
            Method::DELETE,
            &[
                "bindings",
                &self.config.vhost,
                "e",
                &binding.source,
                binding_segment(binding.destination_type),
                &binding.destination,
                &key,
            ],
            None,
        )
        .await
    }
}

/// Connector that builds a [`ManagementApiClient`] and verifies it with
/// `GET /api/overview` before handing it out
#[derive(Debug, Clone)]
pub struct ManagementApiConnector {
    config: ManagementApiConfig,
}

impl ManagementApiConnector {
    pub fn new(config: ManagementApiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for ManagementApiConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerAdmin>, BrokerError> {
        let client = ManagementApiClient::new(self.config.clone())?;
        client.overview().await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[path = "management_tests.rs"]
mod tests;
