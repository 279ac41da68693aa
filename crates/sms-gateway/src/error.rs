//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use credit_ledger::LedgerError;
use provider_client::ProviderError;
use serde::Serialize;
use sms_store::StoreError;
use thiserror::Error;

/// Gateway error types.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed input. Rejected before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No recipient survived normalization.
    #[error("No valid recipients")]
    InvalidRecipients { rejected: Vec<String> },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// The provider refused the gateway's own credentials.
    #[error("Provider rejected gateway credentials")]
    ProviderUnauthorized,

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl GatewayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            GatewayError::InvalidRecipients { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_RECIPIENTS")
            }
            GatewayError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            GatewayError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            GatewayError::InsufficientCredits { .. } => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS")
            }
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            GatewayError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            GatewayError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            GatewayError::ProviderUnauthorized => (StatusCode::BAD_GATEWAY, "PROVIDER_UNAUTHORIZED"),
            GatewayError::Provider(ProviderError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "PROVIDER_TIMEOUT")
            }
            GatewayError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            GatewayError::Store(StoreError::Timeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_TIMEOUT")
            }
            GatewayError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            rejected: match &self {
                GatewayError::InvalidRecipients { rejected } => Some(rejected.clone()),
                _ => None,
            },
            retryable: match &self {
                GatewayError::Provider(e) => Some(e.is_retryable()),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => GatewayError::NotFound(what),
            StoreError::Duplicate(what) => GatewayError::Conflict(format!("{} already exists", what)),
            StoreError::Conflict(what) => GatewayError::Conflict(what),
            StoreError::AlreadyCharged(id) => {
                GatewayError::Conflict(format!("message {} is already charged", id))
            }
            other => GatewayError::Store(other),
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => GatewayError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::TenantNotFound(id) => GatewayError::NotFound(format!("tenant {}", id)),
            LedgerError::InvalidAmount(msg) => GatewayError::Validation(msg),
            LedgerError::Forbidden(msg) => GatewayError::Forbidden(msg),
            LedgerError::Contention(what) => {
                GatewayError::Conflict(format!("balance of {} is busy, retry", what))
            }
            LedgerError::AlreadyCharged(id) => {
                GatewayError::Conflict(format!("message {} is already charged", id))
            }
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unauthorized => GatewayError::ProviderUnauthorized,
            other => GatewayError::Provider(other),
        }
    }
}
