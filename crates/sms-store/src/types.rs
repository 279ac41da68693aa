//! Tenant, message and ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a tenant.
pub type TenantId = String;

/// Role of a tenant in the reseller hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Owns the upstream provider account.
    Operator,
    /// Manages a group of client tenants and funds them from its own balance.
    GroupLead,
    /// End customer.
    Client,
}

impl Role {
    /// Whether this role may send without a managed target ("direct").
    pub fn can_send_direct(&self) -> bool {
        matches!(self, Role::Operator | Role::GroupLead)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Operator => write!(f, "operator"),
            Role::GroupLead => write!(f, "group-lead"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// How a tenant receives its inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Tenant polls the stored inbox.
    #[default]
    Poll,
    /// Messages are pushed to the tenant's endpoint.
    Push,
    /// Both of the above.
    Both,
}

impl DeliveryMode {
    pub fn wants_push(&self) -> bool {
        matches!(self, DeliveryMode::Push | DeliveryMode::Both)
    }
}

/// A billed account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub role: Role,
    /// Group this tenant belongs to (group-leads own the group they lead).
    pub group_id: Option<String>,
    /// Prepaid credits. One credit buys one outbound unit.
    pub balance: u64,
    /// Balance at creation; the ledger sums against this.
    pub initial_balance: u64,
    /// Receiving numbers assigned to this tenant, in canonical form.
    pub receiving_numbers: Vec<String>,
    /// Unique (case-insensitive) business label.
    pub business_label: Option<String>,
    /// Outbound units per minute; 0 disables the limit.
    pub rate_limit: u32,
    pub delivery_mode: DeliveryMode,
    /// Endpoint for pushed inbound messages.
    pub forward_url: Option<String>,
    /// Secret used to sign pushed payloads.
    pub signing_secret: Option<String>,
    /// SHA-256 hex of the tenant's API key.
    pub api_key_hash: Option<String>,
    /// Soft-disable flag; tenants are never hard-deleted.
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new tenant with the given opening balance.
    pub fn new(id: impl Into<TenantId>, role: Role, initial_balance: u64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role,
            group_id: None,
            balance: initial_balance,
            initial_balance,
            receiving_numbers: Vec::new(),
            business_label: None,
            rate_limit: 0,
            delivery_mode: DeliveryMode::Poll,
            forward_url: None,
            signing_secret: None,
            api_key_hash: None,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_business_label(mut self, label: impl Into<String>) -> Self {
        self.business_label = Some(label.into());
        self
    }

    pub fn with_receiving_number(mut self, number: impl Into<String>) -> Self {
        let number = number.into();
        if !self.receiving_numbers.contains(&number) {
            self.receiving_numbers.push(number);
        }
        self
    }

    pub fn with_api_key_hash(mut self, hash: impl Into<String>) -> Self {
        self.api_key_hash = Some(hash.into());
        self
    }

    pub fn with_forwarding(
        mut self,
        mode: DeliveryMode,
        url: impl Into<String>,
        secret: Option<String>,
    ) -> Self {
        self.delivery_mode = mode;
        self.forward_url = Some(url.into());
        self.signing_secret = secret;
        self
    }

    pub fn with_rate_limit(mut self, units_per_minute: u32) -> Self {
        self.rate_limit = units_per_minute;
        self
    }

    /// Case-insensitive, trimmed comparison against the business label.
    pub fn label_matches(&self, label: &str) -> bool {
        self.business_label
            .as_deref()
            .is_some_and(|own| normalize_label(own) == normalize_label(label))
    }
}

/// Canonical form used for business-label comparison.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// An inbound message delivered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Resolved owner; `None` means unassigned.
    pub tenant_id: Option<TenantId>,
    pub sender: String,
    /// Receiver after alias rewriting.
    pub receiver: String,
    /// Receiver as delivered, when an alias rewrote it.
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
    /// Name of the strategy that assigned the tenant.
    pub routed_by: Option<String>,
    pub is_read: bool,
    pub is_deleted: bool,
    pub received_at: DateTime<Utc>,
}

/// Outbound send endpoint that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendEndpoint {
    Single,
    Bulk,
    BulkMulti,
}

/// How the send was authorised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendMode {
    /// A client sending for itself.
    Own,
    /// Operator or group-lead sending on its own account, audit only.
    Direct,
    /// Operator or group-lead sending for a managed tenant.
    OnBehalf,
}

/// Lifecycle status of an outbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundStatus {
    /// Accepted upstream, charged.
    Sent,
    /// Queued upstream.
    Queued,
    /// Confirmed delivered by a status check.
    Delivered,
    /// Upstream reported a failure after acceptance.
    Failed,
    /// Accepted upstream but the local charge did not go through.
    ChargeFailed,
    /// Upstream outcome unknown (timed out).
    Unknown,
}

impl OutboundStatus {
    /// Statuses that consume credits.
    pub fn is_chargeable(&self) -> bool {
        matches!(
            self,
            OutboundStatus::Sent
                | OutboundStatus::Queued
                | OutboundStatus::Delivered
                | OutboundStatus::ChargeFailed
        )
    }

    /// Map a provider status string onto a local status.
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "sent" | "accepted" | "success" | "ok" => OutboundStatus::Sent,
            "queued" | "pending" | "scheduled" => OutboundStatus::Queued,
            "delivered" => OutboundStatus::Delivered,
            "failed" | "undelivered" | "rejected" | "error" => OutboundStatus::Failed,
            _ => OutboundStatus::Unknown,
        }
    }
}

impl std::fmt::Display for OutboundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutboundStatus::Sent => "sent",
            OutboundStatus::Queued => "queued",
            OutboundStatus::Delivered => "delivered",
            OutboundStatus::Failed => "failed",
            OutboundStatus::ChargeFailed => "charge-failed",
            OutboundStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A monetary price pair in micro-units of the billing currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingPair {
    /// What the provider charges the operator per unit.
    pub cost_per_unit: u64,
    /// What the tenant is charged per unit.
    pub charge_per_unit: u64,
}

/// Record of one outbound send call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessageRecord {
    pub id: String,
    /// Tenant whose balance pays for the send.
    pub tenant_id: TenantId,
    /// Tenant that issued the call.
    pub actor_id: TenantId,
    pub mode: SendMode,
    pub endpoint: SendEndpoint,
    pub external_id: Option<String>,
    pub recipients: Vec<String>,
    pub body: String,
    pub units: u64,
    pub status: OutboundStatus,
    pub provider_status: Option<String>,
    /// Pricing captured at send time.
    pub pricing: PricingPair,
    /// Reason the local charge failed, if it did.
    pub charge_error: Option<String>,
    pub request_snapshot: serde_json::Value,
    pub response_snapshot: Option<serde_json::Value>,
    /// Synthetic demo data, ignored by reconciliation.
    pub is_example: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundMessageRecord {
    /// Whether `address` is one of this record's recipients.
    pub fn has_recipient(&self, address: &str) -> bool {
        self.recipients.iter().any(|r| r == address)
    }
}

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Debit,
    Credit,
    Adjustment,
    Reconciliation,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionKind::Debit => "debit",
            TransactionKind::Credit => "credit",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Reconciliation => "reconciliation",
        };
        f.write_str(s)
    }
}

/// Append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub tenant_id: TenantId,
    /// Signed change in credits.
    pub amount: i64,
    pub kind: TransactionKind,
    pub balance_before: u64,
    pub balance_after: u64,
    /// Linked outbound record.
    pub message_id: Option<String>,
    /// Other side of a transfer.
    pub counterparty: Option<TenantId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Create an entry from a before/after snapshot.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        kind: TransactionKind,
        balance_before: u64,
        balance_after: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            amount: balance_after as i64 - balance_before as i64,
            kind,
            balance_before,
            balance_after,
            message_id: None,
            counterparty: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_counterparty(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.counterparty = Some(tenant_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether this entry charged for outbound messages.
    pub fn is_message_charge(&self) -> bool {
        match self.kind {
            TransactionKind::Debit => self.message_id.is_some(),
            TransactionKind::Reconciliation => self.amount < 0,
            _ => false,
        }
    }

    /// The outbound message this entry pays for, if it is a charge linked
    /// to one. A message is charged at most once.
    pub fn charged_message(&self) -> Option<&str> {
        if self.is_message_charge() {
            self.message_id.as_deref()
        } else {
            None
        }
    }
}

/// Key of a cached aggregate balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "id")]
pub enum PoolKey {
    Group(String),
    Operator,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKey::Group(id) => write!(f, "group:{}", id),
            PoolKey::Operator => write!(f, "operator"),
        }
    }
}

/// Signed change to a pool, applied with a floor of zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAdjustment {
    pub key: PoolKey,
    pub delta: i64,
}

/// One tenant's part of a balance change.
#[derive(Debug, Clone)]
pub struct BalanceEntry {
    pub tenant_id: TenantId,
    /// Balance the caller read; the commit fails if it has moved.
    pub expected_balance: u64,
    pub new_balance: u64,
    pub transaction: LedgerTransaction,
}

/// A set of balance writes, their ledger entries and pool updates,
/// committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct BalanceChange {
    pub entries: Vec<BalanceEntry>,
    pub pool_adjustments: Vec<PoolAdjustment>,
}

impl BalanceChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: BalanceEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn adjust_pool(mut self, key: PoolKey, delta: i64) -> Self {
        if delta != 0 {
            self.pool_adjustments.push(PoolAdjustment { key, delta });
        }
        self
    }
}

/// Scope of a configuration scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "id")]
pub enum ConfigScope {
    Global,
    Group(String),
    Tenant(TenantId),
}

/// Filter for inbound listings.
#[derive(Debug, Clone, Default)]
pub struct InboundFilter {
    pub tenant_id: Option<TenantId>,
    pub unassigned_only: bool,
    pub unread_only: bool,
    pub include_deleted: bool,
}
