//! HTTP transport for provider requests.
//!
//! Adapters only produce and consume [`WireRequest`] / [`WireResponse`]
//! values, so they can be tested without a network. [`ReqwestTransport`]
//! moves those values over HTTP.

use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A JSON POST request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl WireRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response status and decoded body.
///
/// Non-JSON error bodies are kept as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    pub body: Value,
}

impl WireResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends wire requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request. Resolves to [`ProviderError::Cancelled`] as soon as
    /// `cancel` fires.
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<WireResponse>;
}

/// [`HttpTransport`] backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: WireRequest) -> ProviderResult<WireResponse> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let builder = builder.json(&request.body);

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(status, bytes = text.len(), "Provider response received");

        let body = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) if (200..300).contains(&status) => {
                return Err(ProviderError::invalid_response(format!(
                    "response body is not JSON: {e}"
                )))
            }
            Err(_) => Value::String(text),
        };

        Ok(WireResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<WireResponse> {
        debug!(url = %request.url, "Sending provider request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.execute(request) => result,
        }
    }
}
