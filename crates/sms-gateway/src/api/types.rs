//! API request and response types.

use crate::routing::RoutingSnapshot;
use serde::{Deserialize, Serialize};
use sms_store::{DeliveryMode, InboundMessage, LedgerTransaction, OutboundMessageRecord, Role, TenantId};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query string accepted on the webhook.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub secret: Option<String>,
}

/// Acknowledgement of a provider push.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub id: String,
    pub tenant_id: Option<TenantId>,
    pub routed_by: Option<String>,
    /// The external id had been seen before.
    pub duplicate: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub messages: Vec<InboundMessage>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct OutboundListResponse {
    pub messages: Vec<OutboundMessageRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub tenant_id: TenantId,
    pub balance: u64,
    /// Cached pool the caller heads: its group for a group-lead, the
    /// operator pool for an operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<LedgerTransaction>,
    pub total: usize,
}

/// Operator top-up.
#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub tenant_id: TenantId,
    pub amount: u64,
    pub note: Option<String>,
}

/// Operator signed correction.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub tenant_id: TenantId,
    pub delta: i64,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceChangeResponse {
    pub tenant_id: TenantId,
    pub balance: u64,
}

/// Group-lead to client transfer.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to: TenantId,
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub report: credit_ledger::ReconciliationReport,
    pub pools: Vec<credit_ledger::PoolCorrection>,
}

/// Assignment repair; `null` unassigns.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
pub struct RoutingRecentResponse {
    pub events: Vec<RoutingSnapshot>,
}

/// Set an alias, or remove it with `to: null`.
#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub from: String,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AliasEntry {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct AliasesResponse {
    pub aliases: Vec<AliasEntry>,
}

/// Operator tenant creation.
#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub id: TenantId,
    pub role: Role,
    pub group_id: Option<String>,
    #[serde(default)]
    pub initial_balance: u64,
    pub business_label: Option<String>,
    #[serde(default)]
    pub receiving_numbers: Vec<String>,
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    pub forward_url: Option<String>,
    pub signing_secret: Option<String>,
    /// Stored hashed.
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: TenantId,
    pub role: Role,
    pub group_id: Option<String>,
    pub balance: u64,
    pub receiving_numbers: Vec<String>,
    pub business_label: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub disabled: bool,
}

impl From<sms_store::Tenant> for TenantResponse {
    fn from(t: sms_store::Tenant) -> Self {
        Self {
            id: t.id,
            role: t.role,
            group_id: t.group_id,
            balance: t.balance,
            receiving_numbers: t.receiving_numbers,
            business_label: t.business_label,
            delivery_mode: t.delivery_mode,
            disabled: t.disabled,
        }
    }
}
