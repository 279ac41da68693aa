//! The persistent store contract.

use crate::error::StoreError;
use crate::types::*;
use async_trait::async_trait;

/// Durable keyed storage for tenants, messages, ledger entries, pools and
/// configuration scalars.
///
/// Implementations must apply [`BalanceChange`] atomically: either every
/// entry, transaction and pool adjustment is written, or none is.
#[async_trait]
pub trait Store: Send + Sync {
    // Tenants

    /// Insert a tenant. Fails with `Duplicate` if the id or business label is taken.
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError>;

    /// Update administrative fields. Balance fields are left untouched.
    async fn update_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError>;

    /// Enabled tenant whose business label matches, case-insensitively.
    async fn find_tenant_by_business_label(
        &self,
        label: &str,
    ) -> Result<Option<Tenant>, StoreError>;

    /// Enabled tenant that has `number` among its receiving numbers.
    async fn find_tenant_by_receiving_number(
        &self,
        number: &str,
    ) -> Result<Option<Tenant>, StoreError>;

    async fn find_tenant_by_api_key_hash(&self, hash: &str)
        -> Result<Option<Tenant>, StoreError>;

    // Balances and ledger

    /// Apply a balance change as one unit. Returns the updated tenants in
    /// entry order, or `Conflict` if any expected balance is stale.
    async fn commit_balance_change(&self, change: BalanceChange)
        -> Result<Vec<Tenant>, StoreError>;

    async fn list_transactions(&self, tenant_id: &str)
        -> Result<Vec<LedgerTransaction>, StoreError>;

    // Pools

    async fn get_pool(&self, key: &PoolKey) -> Result<u64, StoreError>;

    async fn set_pool(&self, key: &PoolKey, value: u64) -> Result<(), StoreError>;

    // Inbound messages

    /// Store an inbound message. If one with the same external id exists,
    /// it is returned unchanged with `false`.
    async fn insert_inbound(
        &self,
        message: InboundMessage,
    ) -> Result<(InboundMessage, bool), StoreError>;

    async fn get_inbound(&self, id: &str) -> Result<Option<InboundMessage>, StoreError>;

    async fn find_inbound_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<InboundMessage>, StoreError>;

    async fn list_inbound(&self, filter: &InboundFilter)
        -> Result<Vec<InboundMessage>, StoreError>;

    /// Set the owning tenant. An existing assignment is only replaced when
    /// `force` is set; otherwise this fails with `Conflict`.
    async fn assign_inbound(
        &self,
        id: &str,
        tenant_id: Option<TenantId>,
        routed_by: Option<String>,
        force: bool,
    ) -> Result<InboundMessage, StoreError>;

    async fn mark_inbound_read(&self, id: &str) -> Result<InboundMessage, StoreError>;

    async fn delete_inbound(&self, id: &str) -> Result<(), StoreError>;

    // Outbound records

    async fn insert_outbound(&self, record: OutboundMessageRecord) -> Result<(), StoreError>;

    async fn update_outbound(&self, record: OutboundMessageRecord) -> Result<(), StoreError>;

    async fn get_outbound(&self, id: &str) -> Result<Option<OutboundMessageRecord>, StoreError>;

    /// Records owned by `tenant_id`, or all records when `None`.
    async fn list_outbound(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<OutboundMessageRecord>, StoreError>;

    /// Most recent record whose recipients include `address`.
    async fn latest_outbound_to(
        &self,
        address: &str,
    ) -> Result<Option<OutboundMessageRecord>, StoreError>;

    // Configuration scalars

    async fn get_config(&self, scope: &ConfigScope, key: &str)
        -> Result<Option<String>, StoreError>;

    async fn set_config(&self, scope: &ConfigScope, key: &str, value: &str)
        -> Result<(), StoreError>;

    async fn remove_config(&self, scope: &ConfigScope, key: &str) -> Result<(), StoreError>;

    /// All `(key, value)` pairs in `scope` whose key starts with `prefix`.
    async fn list_config(
        &self,
        scope: &ConfigScope,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StoreError>;
}
