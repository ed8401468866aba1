//! Transport seam between the streaming client and the network
//!
//! [`ChatTransport`] opens one streaming request and hands back the raw body as
//! a byte stream. [`HttpTransport`] implements it for OpenAI-compatible Chat
//! Completions endpoints.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::types::{ChatRequest, ErrorBody};
use super::LlmError;
use crate::config::LlmConfig;

/// Raw response body, chunked however the network delivered it
pub type ByteStream = BoxStream<'static, Result<Bytes, LlmError>>;

/// Opens streaming chat requests
///
/// Non-success responses are reported as [`LlmError::ApiError`] carrying a
/// human-readable message; success yields the body stream.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, LlmError>;
}

/// HTTP transport for OpenAI-compatible endpoints
pub struct HttpTransport {
    endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// The API key is read from the environment variable named by the config;
    /// when it is unset, requests go out without an Authorization header.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(endpoint = %config.endpoint, "HttpTransport::from_config: called");
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "HttpTransport::from_config: API key variable not set");
        }

        let mut builder = Client::builder();
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        let http = builder.build().map_err(LlmError::Network)?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            http,
        })
    }

    /// Create a transport for `endpoint` with an explicit key
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        debug!(endpoint = %self.endpoint, model = %request.model, "open: called");

        let mut builder = self.http.post(&self.endpoint).header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.json(request).send().await.map_err(LlmError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, "open: API error");
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        debug!("open: streaming body");
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(LlmError::Network)).boxed())
    }
}

/// Pick the most useful message for a failed response
///
/// A JSON body's `error.message` wins; JSON without it falls back to the status
/// reason; a non-JSON body gives `HTTP <status>: <reason>`.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown Status");
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .error
            .and_then(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| reason.to_string()),
        Err(_) => format!("HTTP {}: {}", status.as_u16(), reason),
    }
}
