//! Outbound POST of relayed payloads.
//!
//! The body is always a single urlencoded form field named `payload`, sent
//! with `X-GitHub-Event: push`. Receivers such as Jenkins' GitHub plugin
//! inspect that header and field regardless of the actual event type.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::{debug, error, info};
use url::form_urlencoded;

use crate::config::RelayConfig;

/// Content type of the forwarded body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// Event header expected by the downstream receiver.
pub const GITHUB_EVENT_HEADER: &str = "X-GitHub-Event";
/// Event name sent for every relayed message.
pub const GITHUB_EVENT: &str = "push";
/// Form field holding the raw message body.
pub const PAYLOAD_FIELD: &str = "payload";

/// Errors from a single forward attempt.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("do request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("received non-2xx status: {0}")]
    Status(StatusCode),

    #[error("read body: {0}")]
    ReadBody(#[source] reqwest::Error),
}

/// Successful response from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
}

/// Destination for relayed message bodies.
///
/// Forwarding outcomes are terminal: implementations log failures and never
/// hand them back to the consume loop.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn forward(&self, payload: &[u8], relay: &RelayConfig);
}

/// Encode a raw body as the `payload` form field.
pub fn encode_payload(payload: &[u8]) -> String {
    let value: String = form_urlencoded::byte_serialize(payload).collect();
    format!("{}={}", PAYLOAD_FIELD, value)
}

/// HTTP forwarder.
///
/// Posts each payload once; there are no retries.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Create a forwarder whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { client })
    }

    /// Post `payload` to `target_url` and read the reply.
    pub async fn post(&self, payload: &[u8], target_url: &str) -> Result<Reply, ForwardError> {
        let encoded = encode_payload(payload);

        debug!("====Payload Begin====");
        debug!("{}", encoded);
        debug!("====Payload End====");

        let response = self
            .client
            .post(target_url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(CONTENT_LENGTH, encoded.len())
            .header(GITHUB_EVENT_HEADER, GITHUB_EVENT)
            .body(encoded)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status));
        }

        let body = response.text().await.map_err(ForwardError::ReadBody)?;
        Ok(Reply { status, body })
    }
}

#[async_trait]
impl PayloadSink for Forwarder {
    async fn forward(&self, payload: &[u8], relay: &RelayConfig) {
        match self.post(payload, &relay.target_url).await {
            Ok(reply) => {
                info!(
                    target_url = %relay.target_url,
                    status = %reply.status,
                    "Server replied:\n{}",
                    reply.body
                );
            }
            Err(e) => {
                error!(target_url = %relay.target_url, error = %e, "Forwarding failed");
            }
        }
    }
}
