//! Push delivery of routed inbound messages to tenant endpoints.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use sms_store::{InboundMessage, Tenant, TenantId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of body>`.
pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Tenant {0} has no forwarding endpoint")]
    NoEndpoint(TenantId),

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint answered {0}")]
    Status(u16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Body POSTed to the tenant endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPayload {
    pub tenant_id: TenantId,
    pub from: String,
    pub receiver: String,
    pub business: Option<String>,
    pub message: String,
    pub status: String,
    #[serde(rename = "usedmodem")]
    pub used_modem: Option<String>,
    pub port: Option<String>,
    pub timestamp: String,
    /// Provider's message id.
    pub message_id: String,
}

impl ForwardPayload {
    pub fn new(tenant_id: &str, message: &InboundMessage) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            from: message.sender.clone(),
            receiver: message.receiver.clone(),
            business: message.business_label.clone(),
            message: message.body.clone(),
            status: "received".into(),
            used_modem: message.used_modem.clone(),
            port: message.port.clone(),
            timestamp: message.timestamp.to_rfc3339(),
            message_id: message.external_id.clone(),
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, ForwardError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ForwardError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Single-attempt forwarder. Delivery failures are logged, never retried.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POST the message to the tenant's endpoint once.
    #[instrument(skip(self, tenant, message), fields(tenant_id = %tenant.id, message_id = %message.id))]
    pub async fn forward(&self, tenant: &Tenant, message: &InboundMessage) -> Result<(), ForwardError> {
        let url = tenant
            .forward_url
            .as_deref()
            .ok_or_else(|| ForwardError::NoEndpoint(tenant.id.clone()))?;

        let body = serde_json::to_vec(&ForwardPayload::new(&tenant.id, message))?;

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = tenant.signing_secret.as_deref() {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, &body)?));
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(ForwardError::Status(response.status().as_u16()));
        }

        debug!("Forwarded inbound message");
        Ok(())
    }

    /// Forward in the background; the caller never waits on delivery.
    pub fn spawn(
        self: &Arc<Self>,
        tenant: Tenant,
        message: InboundMessage,
    ) -> tokio::task::JoinHandle<()> {
        let forwarder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = forwarder.forward(&tenant, &message).await {
                warn!(
                    tenant_id = %tenant.id,
                    message_id = %message.id,
                    "Forwarding failed: {}",
                    e
                );
            }
        })
    }
}
