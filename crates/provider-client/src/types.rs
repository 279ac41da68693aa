//! Provider wire types.

use serde::{Deserialize, Serialize};

/// Single-recipient send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMessage {
    pub recipient: String,
    pub message: String,
}

/// Same content to many recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMessage {
    pub recipients: Vec<String>,
    pub content: String,
}

/// Provider acknowledgement for a send or a status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    pub status: String,
    /// Units billed upstream, when the provider reports them.
    #[serde(default)]
    pub units: Option<u64>,
}
