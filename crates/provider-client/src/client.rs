//! Upstream SMS provider HTTP client.

use crate::error::ProviderError;
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound send operations offered by the provider.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Send one message to one recipient.
    async fn send_single(&self, request: &SingleMessage) -> Result<SendReceipt, ProviderError>;

    /// Send the same content to every recipient.
    async fn send_bulk(&self, request: &BulkMessage) -> Result<SendReceipt, ProviderError>;

    /// Send an individual message to each recipient in one call.
    async fn send_bulk_multi(
        &self,
        messages: &[SingleMessage],
    ) -> Result<SendReceipt, ProviderError>;

    /// Look up the current status of a previously sent message.
    async fn message_status(&self, message_id: &str) -> Result<SendReceipt, ProviderError>;
}

/// Provider REST API client.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl ProviderClient {
    /// Create a client with the default timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Create a client whose calls fail with `Timeout` after `timeout`.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Check if the provider API is reachable.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<SendReceipt, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle HTTP response, converting errors appropriately.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<SendReceipt, ProviderError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            debug!("Response body: {}", body.chars().take(200).collect::<String>());
            serde_json::from_str(&body).map_err(ProviderError::from)
        } else {
            Err(self.extract_error(response).await)
        }
    }

    /// Extract error information from a failed response.
    async fn extract_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("Provider authentication failed");
                ProviderError::Unauthorized
            }
            _ => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".into());
                warn!(status = status.as_u16(), "Provider rejected request: {}", message);
                ProviderError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }
}

#[async_trait]
impl SmsProvider for ProviderClient {
    #[instrument(skip(self, request), fields(recipient = %request.recipient))]
    async fn send_single(&self, request: &SingleMessage) -> Result<SendReceipt, ProviderError> {
        let receipt = self.post("/v1/messages", request).await?;
        debug!(message_id = %receipt.message_id, "Sent single message");
        Ok(receipt)
    }

    #[instrument(skip(self, request), fields(recipients = request.recipients.len()))]
    async fn send_bulk(&self, request: &BulkMessage) -> Result<SendReceipt, ProviderError> {
        let receipt = self.post("/v1/messages/bulk", request).await?;
        debug!(message_id = %receipt.message_id, "Sent bulk message");
        Ok(receipt)
    }

    #[instrument(skip(self, messages), fields(recipients = messages.len()))]
    async fn send_bulk_multi(
        &self,
        messages: &[SingleMessage],
    ) -> Result<SendReceipt, ProviderError> {
        let receipt = self.post("/v1/messages/bulk-multi", messages).await?;
        debug!(message_id = %receipt.message_id, "Sent bulk-multi message");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    async fn message_status(&self, message_id: &str) -> Result<SendReceipt, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/messages/{}", self.base_url, encode(message_id)))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await?;

        self.handle_response(response).await
    }
}
