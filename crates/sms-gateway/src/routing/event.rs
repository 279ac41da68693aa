//! Inbound push payload and the validated event derived from it.

use crate::error::GatewayError;
use crate::phone::normalize_or_trim;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use sms_store::{InboundMessage, TenantId};

/// Body of a provider push, as received.
///
/// Every field is optional here so that missing fields surface as
/// validation errors rather than deserialization failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundPayload {
    pub from: Option<String>,
    pub message: Option<String>,
    pub receiver: Option<String>,
    pub timestamp: Option<serde_json::Value>,
    #[serde(rename = "messageId")]
    pub message_id: Option<serde_json::Value>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub business: Option<String>,
    #[serde(rename = "matchedBlockWord")]
    pub matched_block_word: Option<String>,
    pub usedmodem: Option<String>,
    pub port: Option<String>,
}

/// A validated inbound event ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub sender: String,
    pub receiver: String,
    /// Receiver before alias rewriting, when an alias applied.
    pub original_receiver: Option<String>,
    pub business_label: Option<String>,
    pub body: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub matched_block_word: Option<String>,
    pub used_modem: Option<String>,
    pub port: Option<String>,
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
}

fn required(value: Option<String>, field: &str) -> Result<String, GatewayError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(GatewayError::Validation(format!("missing {}", field))),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Message ids arrive as strings or numbers.
fn external_id(value: Option<serde_json::Value>) -> Result<String, GatewayError> {
    let id = match value {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if id.is_empty() {
        return Err(GatewayError::Validation("missing messageId".into()));
    }
    Ok(id)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or Unix seconds/milliseconds.
fn parse_timestamp(value: Option<serde_json::Value>) -> Result<DateTime<Utc>, GatewayError> {
    let invalid = |v: &dyn std::fmt::Display| {
        GatewayError::Validation(format!("invalid timestamp: {}", v))
    };

    match value {
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(GatewayError::Validation("missing timestamp".into()));
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(Utc.from_utc_datetime(&naive));
            }
            match s.parse::<i64>() {
                Ok(n) => from_epoch(n).ok_or_else(|| invalid(&s)),
                Err(_) => Err(invalid(&s)),
            }
        }
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(from_epoch)
            .ok_or_else(|| invalid(&n)),
        _ => Err(GatewayError::Validation("missing timestamp".into())),
    }
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Values this large are milliseconds.
    if n.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

impl InboundEvent {
    /// Validate a payload. Sender and receiver are normalized with
    /// `default_dial` when they parse as phone numbers.
    pub fn from_payload(payload: InboundPayload, default_dial: &str) -> Result<Self, GatewayError> {
        let sender = required(payload.from, "from")?;
        let receiver = required(payload.receiver, "receiver")?;
        let body = payload
            .message
            .ok_or_else(|| GatewayError::Validation("missing message".into()))?;
        let external_id = external_id(payload.message_id)?;
        let timestamp = parse_timestamp(payload.timestamp)?;

        Ok(Self {
            sender: normalize_or_trim(&sender, default_dial),
            receiver: normalize_or_trim(&receiver, default_dial),
            original_receiver: None,
            business_label: optional(payload.business),
            body,
            first_name: optional(payload.firstname),
            last_name: optional(payload.lastname),
            matched_block_word: optional(payload.matched_block_word),
            used_modem: optional(payload.usedmodem),
            port: optional(payload.port),
            external_id,
            timestamp,
        })
    }

    /// Build the stored record for this event.
    pub fn into_message(self, tenant_id: Option<TenantId>, routed_by: Option<String>) -> InboundMessage {
        InboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            sender: self.sender,
            receiver: self.receiver,
            original_receiver: self.original_receiver,
            business_label: self.business_label,
            body: self.body,
            first_name: self.first_name,
            last_name: self.last_name,
            matched_block_word: self.matched_block_word,
            used_modem: self.used_modem,
            port: self.port,
            external_id: self.external_id,
            timestamp: self.timestamp,
            routed_by,
            is_read: false,
            is_deleted: false,
            received_at: Utc::now(),
        }
    }
}
