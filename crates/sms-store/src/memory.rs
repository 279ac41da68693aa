//! In-memory store with optional JSON snapshot persistence.

use crate::error::StoreError;
use crate::store::Store;
use crate::types::*;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// Everything the store holds, in the shape written to the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    pub version: u32,
    pub tenants: HashMap<TenantId, Tenant>,
    /// Append-only ledger.
    pub transactions: Vec<LedgerTransaction>,
    /// Pool values keyed by `PoolKey` display form.
    pub pools: HashMap<String, u64>,
    pub inbound: HashMap<String, InboundMessage>,
    /// External id -> inbound id.
    pub inbound_by_external_id: HashMap<String, String>,
    pub outbound: HashMap<String, OutboundMessageRecord>,
    /// Config values keyed by `scope/key`.
    pub config: HashMap<String, String>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            tenants: HashMap::new(),
            transactions: Vec::new(),
            pools: HashMap::new(),
            inbound: HashMap::new(),
            inbound_by_external_id: HashMap::new(),
            outbound: HashMap::new(),
            config: HashMap::new(),
        }
    }
}

fn scope_prefix(scope: &ConfigScope) -> String {
    match scope {
        ConfigScope::Global => "global/".to_string(),
        ConfigScope::Group(id) => format!("group:{}/", id),
        ConfigScope::Tenant(id) => format!("tenant:{}/", id),
    }
}

fn config_key(scope: &ConfigScope, key: &str) -> String {
    format!("{}{}", scope_prefix(scope), key)
}

/// Apply a validated change, returning the updated tenants.
fn apply_balance_change(data: &mut StoreData, change: BalanceChange) -> Vec<Tenant> {
    let now = Utc::now();
    let mut updated = Vec::with_capacity(change.entries.len());
    for entry in change.entries {
        if let Some(tenant) = data.tenants.get_mut(&entry.tenant_id) {
            tenant.balance = entry.new_balance;
            tenant.updated_at = now;
            updated.push(tenant.clone());
        }
        data.transactions.push(entry.transaction);
    }

    for adjustment in change.pool_adjustments {
        let slot = data.pools.entry(adjustment.key.to_string()).or_insert(0);
        *slot = if adjustment.delta >= 0 {
            slot.saturating_add(adjustment.delta as u64)
        } else {
            slot.saturating_sub(adjustment.delta.unsigned_abs())
        };
    }

    updated
}

/// Store backed by process memory.
///
/// With a snapshot path, the full data set is loaded at start-up and
/// rewritten after every mutation.
pub struct MemoryStore {
    data: RwLock<StoreData>,
    snapshot_path: Option<PathBuf>,
    /// Serialises snapshot writes.
    persist_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            snapshot_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a store persisted to `path`, loading existing data if present.
    pub async fn with_snapshot(path: PathBuf) -> Result<Self, StoreError> {
        let store = Self {
            data: RwLock::new(StoreData::default()),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        };
        store.load().await?;
        Ok(store)
    }

    async fn load(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        if !path.exists() {
            info!("Store snapshot not found at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        if bytes.is_empty() {
            warn!("Store snapshot at {:?} is empty, starting fresh", path);
            return Ok(());
        }

        let data: StoreData = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded store snapshot: {} tenants, {} transactions, {} inbound, {} outbound",
            data.tenants.len(),
            data.transactions.len(),
            data.inbound.len(),
            data.outbound.len()
        );

        *self.data.write().await = data;
        Ok(())
    }

    /// Write the snapshot file, if one is configured.
    pub async fn persist(&self) -> Result<(), StoreError> {
        if self.snapshot_path.is_none() {
            return Ok(());
        }

        let _guard = self.persist_lock.lock().await;
        let bytes = {
            let data = self.data.read().await;
            serde_json::to_vec(&*data)?
        };
        self.write_snapshot(&bytes).await
    }

    /// Replace the snapshot file with `bytes`. Callers hold `persist_lock`.
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved store snapshot ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }

    /// Copy of the full data set.
    pub async fn snapshot(&self) -> StoreData {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        {
            let mut data = self.data.write().await;

            if data.tenants.contains_key(&tenant.id) {
                return Err(StoreError::Duplicate(format!("tenant {}", tenant.id)));
            }

            if let Some(label) = tenant.business_label.as_deref() {
                if data.tenants.values().any(|t| t.label_matches(label)) {
                    return Err(StoreError::Duplicate(format!("business label {}", label)));
                }
            }

            data.tenants.insert(tenant.id.clone(), tenant.clone());
        }

        self.persist().await?;
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self.data.read().await.tenants.get(tenant_id).cloned())
    }

    async fn update_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        let updated = {
            let mut data = self.data.write().await;

            if let Some(label) = tenant.business_label.as_deref() {
                let taken = data
                    .tenants
                    .values()
                    .any(|t| t.id != tenant.id && t.label_matches(label));
                if taken {
                    return Err(StoreError::Duplicate(format!("business label {}", label)));
                }
            }

            let stored = data
                .tenants
                .get_mut(&tenant.id)
                .ok_or_else(|| StoreError::NotFound(format!("tenant {}", tenant.id)))?;

            let balance = stored.balance;
            let initial_balance = stored.initial_balance;
            let created_at = stored.created_at;

            *stored = tenant;
            stored.balance = balance;
            stored.initial_balance = initial_balance;
            stored.created_at = created_at;
            stored.updated_at = Utc::now();
            stored.clone()
        };

        self.persist().await?;
        Ok(updated)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let data = self.data.read().await;
        let mut tenants: Vec<Tenant> = data.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }

    async fn find_tenant_by_business_label(
        &self,
        label: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .tenants
            .values()
            .find(|t| !t.disabled && t.label_matches(label))
            .cloned())
    }

    async fn find_tenant_by_receiving_number(
        &self,
        number: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        let data = self.data.read().await;
        let mut matches: Vec<&Tenant> = data
            .tenants
            .values()
            .filter(|t| !t.disabled && t.receiving_numbers.iter().any(|n| n == number))
            .collect();
        // Deterministic when a number is (mis)assigned twice.
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matches.first().map(|t| (*t).clone()))
    }

    async fn find_tenant_by_api_key_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .tenants
            .values()
            .find(|t| !t.disabled && t.api_key_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn commit_balance_change(
        &self,
        change: BalanceChange,
    ) -> Result<Vec<Tenant>, StoreError> {
        // Lock order matches `persist`: snapshot first, then data.
        let _persist = self.persist_lock.lock().await;
        let mut data = self.data.write().await;

        // Validate everything before touching anything.
        for entry in &change.entries {
            let tenant = data
                .tenants
                .get(&entry.tenant_id)
                .ok_or_else(|| StoreError::NotFound(format!("tenant {}", entry.tenant_id)))?;
            if tenant.balance != entry.expected_balance {
                return Err(StoreError::Conflict(format!(
                    "balance of {} (expected {}, found {})",
                    entry.tenant_id, entry.expected_balance, tenant.balance
                )));
            }
            if let Some(message_id) = entry.transaction.charged_message() {
                if data
                    .transactions
                    .iter()
                    .any(|tx| tx.charged_message() == Some(message_id))
                {
                    return Err(StoreError::AlreadyCharged(message_id.to_string()));
                }
            }
        }

        if self.snapshot_path.is_none() {
            return Ok(apply_balance_change(&mut data, change));
        }

        // Nothing becomes visible unless the snapshot holding it was written.
        let mut next = data.clone();
        let updated = apply_balance_change(&mut next, change);
        self.write_snapshot(&serde_json::to_vec(&next)?).await?;
        *data = next;
        Ok(updated)
    }

    async fn list_transactions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_pool(&self, key: &PoolKey) -> Result<u64, StoreError> {
        let data = self.data.read().await;
        Ok(data.pools.get(&key.to_string()).copied().unwrap_or(0))
    }

    async fn set_pool(&self, key: &PoolKey, value: u64) -> Result<(), StoreError> {
        self.data.write().await.pools.insert(key.to_string(), value);
        self.persist().await
    }

    async fn insert_inbound(
        &self,
        message: InboundMessage,
    ) -> Result<(InboundMessage, bool), StoreError> {
        {
            let mut data = self.data.write().await;

            if let Some(existing) = data
                .inbound_by_external_id
                .get(&message.external_id)
                .and_then(|id| data.inbound.get(id))
            {
                return Ok((existing.clone(), false));
            }

            data.inbound_by_external_id
                .insert(message.external_id.clone(), message.id.clone());
            data.inbound.insert(message.id.clone(), message.clone());
        }

        self.persist().await?;
        Ok((message, true))
    }

    async fn get_inbound(&self, id: &str) -> Result<Option<InboundMessage>, StoreError> {
        Ok(self.data.read().await.inbound.get(id).cloned())
    }

    async fn find_inbound_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<InboundMessage>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .inbound_by_external_id
            .get(external_id)
            .and_then(|id| data.inbound.get(id))
            .cloned())
    }

    async fn list_inbound(
        &self,
        filter: &InboundFilter,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        let data = self.data.read().await;
        let mut messages: Vec<InboundMessage> = data
            .inbound
            .values()
            .filter(|m| filter.include_deleted || !m.is_deleted)
            .filter(|m| !filter.unassigned_only || m.tenant_id.is_none())
            .filter(|m| !filter.unread_only || !m.is_read)
            .filter(|m| match &filter.tenant_id {
                Some(id) => m.tenant_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(messages)
    }

    async fn assign_inbound(
        &self,
        id: &str,
        tenant_id: Option<TenantId>,
        routed_by: Option<String>,
        force: bool,
    ) -> Result<InboundMessage, StoreError> {
        let updated = {
            let mut data = self.data.write().await;
            let message = data
                .inbound
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("inbound {}", id)))?;

            if let Some(current) = &message.tenant_id {
                if !force && tenant_id.as_deref() != Some(current.as_str()) {
                    return Err(StoreError::Conflict(format!(
                        "inbound {} already assigned to {}",
                        id, current
                    )));
                }
            }

            message.tenant_id = tenant_id;
            message.routed_by = routed_by;
            message.clone()
        };

        self.persist().await?;
        Ok(updated)
    }

    async fn mark_inbound_read(&self, id: &str) -> Result<InboundMessage, StoreError> {
        let updated = {
            let mut data = self.data.write().await;
            let message = data
                .inbound
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("inbound {}", id)))?;
            message.is_read = true;
            message.clone()
        };

        self.persist().await?;
        Ok(updated)
    }

    async fn delete_inbound(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().await;
            let message = data
                .inbound
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("inbound {}", id)))?;
            message.is_deleted = true;
        }

        self.persist().await
    }

    async fn insert_outbound(&self, record: OutboundMessageRecord) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().await;
            if data.outbound.contains_key(&record.id) {
                return Err(StoreError::Duplicate(format!("outbound {}", record.id)));
            }
            data.outbound.insert(record.id.clone(), record);
        }

        self.persist().await
    }

    async fn update_outbound(&self, mut record: OutboundMessageRecord) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().await;
            let stored = data
                .outbound
                .get_mut(&record.id)
                .ok_or_else(|| StoreError::NotFound(format!("outbound {}", record.id)))?;
            record.updated_at = Utc::now();
            *stored = record;
        }

        self.persist().await
    }

    async fn get_outbound(&self, id: &str) -> Result<Option<OutboundMessageRecord>, StoreError> {
        Ok(self.data.read().await.outbound.get(id).cloned())
    }

    async fn list_outbound(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<OutboundMessageRecord>, StoreError> {
        let data = self.data.read().await;
        let mut records: Vec<OutboundMessageRecord> = data
            .outbound
            .values()
            .filter(|r| tenant_id.map_or(true, |id| r.tenant_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn latest_outbound_to(
        &self,
        address: &str,
    ) -> Result<Option<OutboundMessageRecord>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .outbound
            .values()
            .filter(|r| r.has_recipient(address))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn get_config(
        &self,
        scope: &ConfigScope,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let data = self.data.read().await;
        Ok(data.config.get(&config_key(scope, key)).cloned())
    }

    async fn set_config(
        &self,
        scope: &ConfigScope,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.data
            .write()
            .await
            .config
            .insert(config_key(scope, key), value.to_string());
        self.persist().await
    }

    async fn remove_config(&self, scope: &ConfigScope, key: &str) -> Result<(), StoreError> {
        self.data.write().await.config.remove(&config_key(scope, key));
        self.persist().await
    }

    async fn list_config(
        &self,
        scope: &ConfigScope,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let data = self.data.read().await;
        let scope_prefix = scope_prefix(scope);
        let mut pairs: Vec<(String, String)> = data
            .config
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&scope_prefix)
                    .filter(|key| key.starts_with(prefix))
                    .map(|key| (key.to_string(), v.clone()))
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inbound(external_id: &str) -> InboundMessage {
        InboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: None,
            sender: "+15551234567".into(),
            receiver: "+15550000001".into(),
            original_receiver: None,
            business_label: None,
            body: "hello".into(),
            first_name: None,
            last_name: None,
            matched_block_word: None,
            used_modem: None,
            port: None,
            external_id: external_id.into(),
            timestamp: Utc::now(),
            routed_by: None,
            is_read: false,
            is_deleted: false,
            received_at: Utc::now(),
        }
    }

    fn outbound(id: &str, recipient: &str, created_at: chrono::DateTime<Utc>) -> OutboundMessageRecord {
        OutboundMessageRecord {
            id: id.into(),
            tenant_id: "a".into(),
            actor_id: "a".into(),
            mode: SendMode::Own,
            endpoint: SendEndpoint::Single,
            external_id: None,
            recipients: vec![recipient.into()],
            body: "hi".into(),
            units: 1,
            status: OutboundStatus::Sent,
            provider_status: None,
            pricing: PricingPair::default(),
            charge_error: None,
            request_snapshot: serde_json::Value::Null,
            response_snapshot: None,
            is_example: false,
            created_at,
            updated_at: created_at,
        }
    }

    fn debit_entry(tenant: &str, before: u64, after: u64) -> BalanceEntry {
        BalanceEntry {
            tenant_id: tenant.into(),
            expected_balance: before,
            new_balance: after,
            transaction: LedgerTransaction::new(tenant, TransactionKind::Debit, before, after),
        }
    }

    #[tokio::test]
    async fn test_duplicate_business_label_is_case_insensitive() {
        let store = MemoryStore::new();
        store
            .insert_tenant(Tenant::new("a", Role::Client, 0).with_business_label("Acme"))
            .await
            .unwrap();

        let result = store
            .insert_tenant(Tenant::new("b", Role::Client, 0).with_business_label("  ACME "))
            .await;

        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_find_skips_disabled_tenants() {
        let store = MemoryStore::new();
        let mut tenant = Tenant::new("a", Role::Client, 0)
            .with_business_label("Acme")
            .with_receiving_number("+15550000001");
        store.insert_tenant(tenant.clone()).await.unwrap();

        assert!(store.find_tenant_by_business_label("acme").await.unwrap().is_some());

        tenant.disabled = true;
        store.update_tenant(tenant).await.unwrap();

        assert!(store.find_tenant_by_business_label("acme").await.unwrap().is_none());
        assert!(store
            .find_tenant_by_receiving_number("+15550000001")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_tenant_keeps_balance() {
        let store = MemoryStore::new();
        store.insert_tenant(Tenant::new("a", Role::Client, 10)).await.unwrap();

        let mut edited = Tenant::new("a", Role::Client, 999);
        edited.rate_limit = 60;
        let updated = store.update_tenant(edited).await.unwrap();

        assert_eq!(updated.balance, 10);
        assert_eq!(updated.initial_balance, 10);
        assert_eq!(updated.rate_limit, 60);
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_balance() {
        let store = MemoryStore::new();
        store.insert_tenant(Tenant::new("a", Role::Client, 5)).await.unwrap();

        let result = store
            .commit_balance_change(BalanceChange::new().entry(debit_entry("a", 4, 3)))
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.get_tenant("a").await.unwrap().unwrap().balance, 5);
        assert!(store.list_transactions("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert_tenant(Tenant::new("a", Role::GroupLead, 5)).await.unwrap();
        store.insert_tenant(Tenant::new("b", Role::Client, 0)).await.unwrap();

        // Second entry is stale, so the first must not be applied either.
        let change = BalanceChange::new()
            .entry(debit_entry("a", 5, 3))
            .entry(debit_entry("b", 1, 3));
        assert!(store.commit_balance_change(change).await.is_err());

        assert_eq!(store.get_tenant("a").await.unwrap().unwrap().balance, 5);
        assert!(store.list_transactions("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pool_adjustment_clamps_at_zero() {
        let store = MemoryStore::new();
        store.insert_tenant(Tenant::new("a", Role::Client, 5)).await.unwrap();
        store.set_pool(&PoolKey::Operator, 2).await.unwrap();

        let change = BalanceChange::new()
            .entry(debit_entry("a", 5, 0))
            .adjust_pool(PoolKey::Operator, -5)
            .adjust_pool(PoolKey::Group("g1".into()), -5);
        store.commit_balance_change(change).await.unwrap();

        assert_eq!(store.get_pool(&PoolKey::Operator).await.unwrap(), 0);
        assert_eq!(store.get_pool(&PoolKey::Group("g1".into())).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_inbound_is_idempotent_by_external_id() {
        let store = MemoryStore::new();

        let (first, created) = store.insert_inbound(inbound("ext-1")).await.unwrap();
        assert!(created);

        let (second, created) = store.insert_inbound(inbound("ext-1")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_assignment_is_set_once_unless_forced() {
        let store = MemoryStore::new();
        let (msg, _) = store.insert_inbound(inbound("ext-1")).await.unwrap();

        store
            .assign_inbound(&msg.id, Some("a".into()), Some("business-label".into()), false)
            .await
            .unwrap();

        let result = store
            .assign_inbound(&msg.id, Some("b".into()), None, false)
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let repaired = store
            .assign_inbound(&msg.id, Some("b".into()), Some("repair".into()), true)
            .await
            .unwrap();
        assert_eq!(repaired.tenant_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_list_config_by_prefix() {
        let store = MemoryStore::new();
        store
            .set_config(&ConfigScope::Global, "alias:+15550000009", "+15550000001")
            .await
            .unwrap();
        store
            .set_config(&ConfigScope::Global, "default_tenant_label", "Acme")
            .await
            .unwrap();
        store
            .set_config(&ConfigScope::Group("g1".into()), "alias:x", "y")
            .await
            .unwrap();

        let aliases = store.list_config(&ConfigScope::Global, "alias:").await.unwrap();
        assert_eq!(
            aliases,
            vec![("alias:+15550000009".to_string(), "+15550000001".to_string())]
        );
    }

    #[tokio::test]
    async fn test_snapshot_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");

        {
            let store = MemoryStore::with_snapshot(path.clone()).await.unwrap();
            store
                .insert_tenant(Tenant::new("a", Role::Client, 7).with_business_label("Acme"))
                .await
                .unwrap();
            store.set_pool(&PoolKey::Operator, 7).await.unwrap();
        }

        let store = MemoryStore::with_snapshot(path).await.unwrap();
        let tenant = store.get_tenant("a").await.unwrap().unwrap();
        assert_eq!(tenant.balance, 7);
        assert_eq!(store.get_pool(&PoolKey::Operator).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_message_is_charged_once() {
        let store = MemoryStore::new();
        store.insert_tenant(Tenant::new("a", Role::Client, 10)).await.unwrap();

        let mut first = debit_entry("a", 10, 8);
        first.transaction = first.transaction.with_message("m1");
        store
            .commit_balance_change(BalanceChange::new().entry(first))
            .await
            .unwrap();

        let mut again = debit_entry("a", 8, 6);
        again.transaction = again.transaction.with_message("m1");
        let result = store.commit_balance_change(BalanceChange::new().entry(again)).await;
        assert!(matches!(result, Err(StoreError::AlreadyCharged(id)) if id == "m1"));

        // Corrections count as charges too.
        let mut correction = debit_entry("a", 8, 6);
        correction.transaction =
            LedgerTransaction::new("a", TransactionKind::Reconciliation, 8, 6).with_message("m1");
        let result = store
            .commit_balance_change(BalanceChange::new().entry(correction))
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyCharged(_))));

        assert_eq!(store.get_tenant("a").await.unwrap().unwrap().balance, 8);
        assert_eq!(store.list_transactions("a").await.unwrap().len(), 1);

        // Unlinked debits are unaffected.
        store
            .commit_balance_change(BalanceChange::new().entry(debit_entry("a", 8, 7)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_leaves_balance_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");

        let store = MemoryStore::with_snapshot(path.clone()).await.unwrap();
        store.insert_tenant(Tenant::new("a", Role::Client, 5)).await.unwrap();

        // A non-empty directory where the snapshot lives makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();

        let result = store
            .commit_balance_change(BalanceChange::new().entry(debit_entry("a", 5, 2)))
            .await;
        assert!(matches!(result, Err(StoreError::Io(_))));

        assert_eq!(store.get_tenant("a").await.unwrap().unwrap().balance, 5);
        assert!(store.list_transactions("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_outbound_breaks_ties_by_id() {
        let store = MemoryStore::new();
        let at = Utc::now();
        for id in ["rec-b", "rec-c", "rec-a"] {
            store.insert_outbound(outbound(id, "+15551230001", at)).await.unwrap();
        }

        for _ in 0..5 {
            let latest = store.latest_outbound_to("+15551230001").await.unwrap().unwrap();
            assert_eq!(latest.id, "rec-c");
        }
    }
}
