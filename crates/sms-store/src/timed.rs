//! Store decorator that bounds every call with a timeout.

use crate::error::StoreError;
use crate::store::Store;
use crate::types::*;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Wraps another [`Store`] and fails any call that exceeds `timeout`.
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: Store> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "Store call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for TimedStore<S> {
    async fn insert_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        self.bounded("insert_tenant", self.inner.insert_tenant(tenant)).await
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError> {
        self.bounded("get_tenant", self.inner.get_tenant(tenant_id)).await
    }

    async fn update_tenant(&self, tenant: Tenant) -> Result<Tenant, StoreError> {
        self.bounded("update_tenant", self.inner.update_tenant(tenant)).await
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        self.bounded("list_tenants", self.inner.list_tenants()).await
    }

    async fn find_tenant_by_business_label(
        &self,
        label: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        self.bounded(
            "find_tenant_by_business_label",
            self.inner.find_tenant_by_business_label(label),
        )
        .await
    }

    async fn find_tenant_by_receiving_number(
        &self,
        number: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        self.bounded(
            "find_tenant_by_receiving_number",
            self.inner.find_tenant_by_receiving_number(number),
        )
        .await
    }

    async fn find_tenant_by_api_key_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        self.bounded(
            "find_tenant_by_api_key_hash",
            self.inner.find_tenant_by_api_key_hash(hash),
        )
        .await
    }

    async fn commit_balance_change(
        &self,
        change: BalanceChange,
    ) -> Result<Vec<Tenant>, StoreError> {
        self.bounded(
            "commit_balance_change",
            self.inner.commit_balance_change(change),
        )
        .await
    }

    async fn list_transactions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        self.bounded("list_transactions", self.inner.list_transactions(tenant_id))
            .await
    }

    async fn get_pool(&self, key: &PoolKey) -> Result<u64, StoreError> {
        self.bounded("get_pool", self.inner.get_pool(key)).await
    }

    async fn set_pool(&self, key: &PoolKey, value: u64) -> Result<(), StoreError> {
        self.bounded("set_pool", self.inner.set_pool(key, value)).await
    }

    async fn insert_inbound(
        &self,
        message: InboundMessage,
    ) -> Result<(InboundMessage, bool), StoreError> {
        self.bounded("insert_inbound", self.inner.insert_inbound(message))
            .await
    }

    async fn get_inbound(&self, id: &str) -> Result<Option<InboundMessage>, StoreError> {
        self.bounded("get_inbound", self.inner.get_inbound(id)).await
    }

    async fn find_inbound_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<InboundMessage>, StoreError> {
        self.bounded(
            "find_inbound_by_external_id",
            self.inner.find_inbound_by_external_id(external_id),
        )
        .await
    }

    async fn list_inbound(
        &self,
        filter: &InboundFilter,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        self.bounded("list_inbound", self.inner.list_inbound(filter)).await
    }

    async fn assign_inbound(
        &self,
        id: &str,
        tenant_id: Option<TenantId>,
        routed_by: Option<String>,
        force: bool,
    ) -> Result<InboundMessage, StoreError> {
        self.bounded(
            "assign_inbound",
            self.inner.assign_inbound(id, tenant_id, routed_by, force),
        )
        .await
    }

    async fn mark_inbound_read(&self, id: &str) -> Result<InboundMessage, StoreError> {
        self.bounded("mark_inbound_read", self.inner.mark_inbound_read(id))
            .await
    }

    async fn delete_inbound(&self, id: &str) -> Result<(), StoreError> {
        self.bounded("delete_inbound", self.inner.delete_inbound(id)).await
    }

    async fn insert_outbound(&self, record: OutboundMessageRecord) -> Result<(), StoreError> {
        self.bounded("insert_outbound", self.inner.insert_outbound(record))
            .await
    }

    async fn update_outbound(&self, record: OutboundMessageRecord) -> Result<(), StoreError> {
        self.bounded("update_outbound", self.inner.update_outbound(record))
            .await
    }

    async fn get_outbound(&self, id: &str) -> Result<Option<OutboundMessageRecord>, StoreError> {
        self.bounded("get_outbound", self.inner.get_outbound(id)).await
    }

    async fn list_outbound(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<OutboundMessageRecord>, StoreError> {
        self.bounded("list_outbound", self.inner.list_outbound(tenant_id))
            .await
    }

    async fn latest_outbound_to(
        &self,
        address: &str,
    ) -> Result<Option<OutboundMessageRecord>, StoreError> {
        self.bounded("latest_outbound_to", self.inner.latest_outbound_to(address))
            .await
    }

    async fn get_config(
        &self,
        scope: &ConfigScope,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        self.bounded("get_config", self.inner.get_config(scope, key)).await
    }

    async fn set_config(
        &self,
        scope: &ConfigScope,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.bounded("set_config", self.inner.set_config(scope, key, value))
            .await
    }

    async fn remove_config(&self, scope: &ConfigScope, key: &str) -> Result<(), StoreError> {
        self.bounded("remove_config", self.inner.remove_config(scope, key))
            .await
    }

    async fn list_config(
        &self,
        scope: &ConfigScope,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StoreError> {
        self.bounded("list_config", self.inner.list_config(scope, prefix))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    /// Store whose tenant lookup never completes.
    struct StalledStore(MemoryStore);

    #[async_trait]
    impl Store for StalledStore {
        async fn insert_tenant(&self, t: Tenant) -> Result<Tenant, StoreError> {
            self.0.insert_tenant(t).await
        }
        async fn get_tenant(&self, _: &str) -> Result<Option<Tenant>, StoreError> {
            futures_pending().await
        }
        async fn update_tenant(&self, t: Tenant) -> Result<Tenant, StoreError> {
            self.0.update_tenant(t).await
        }
        async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
            self.0.list_tenants().await
        }
        async fn find_tenant_by_business_label(
            &self,
            l: &str,
        ) -> Result<Option<Tenant>, StoreError> {
            self.0.find_tenant_by_business_label(l).await
        }
        async fn find_tenant_by_receiving_number(
            &self,
            n: &str,
        ) -> Result<Option<Tenant>, StoreError> {
            self.0.find_tenant_by_receiving_number(n).await
        }
        async fn find_tenant_by_api_key_hash(
            &self,
            h: &str,
        ) -> Result<Option<Tenant>, StoreError> {
            self.0.find_tenant_by_api_key_hash(h).await
        }
        async fn commit_balance_change(
            &self,
            c: BalanceChange,
        ) -> Result<Vec<Tenant>, StoreError> {
            self.0.commit_balance_change(c).await
        }
        async fn list_transactions(
            &self,
            id: &str,
        ) -> Result<Vec<LedgerTransaction>, StoreError> {
            self.0.list_transactions(id).await
        }
        async fn get_pool(&self, k: &PoolKey) -> Result<u64, StoreError> {
            self.0.get_pool(k).await
        }
        async fn set_pool(&self, k: &PoolKey, v: u64) -> Result<(), StoreError> {
            self.0.set_pool(k, v).await
        }
        async fn insert_inbound(
            &self,
            m: InboundMessage,
        ) -> Result<(InboundMessage, bool), StoreError> {
            self.0.insert_inbound(m).await
        }
        async fn get_inbound(&self, id: &str) -> Result<Option<InboundMessage>, StoreError> {
            self.0.get_inbound(id).await
        }
        async fn find_inbound_by_external_id(
            &self,
            id: &str,
        ) -> Result<Option<InboundMessage>, StoreError> {
            self.0.find_inbound_by_external_id(id).await
        }
        async fn list_inbound(
            &self,
            f: &InboundFilter,
        ) -> Result<Vec<InboundMessage>, StoreError> {
            self.0.list_inbound(f).await
        }
        async fn assign_inbound(
            &self,
            id: &str,
            t: Option<TenantId>,
            r: Option<String>,
            force: bool,
        ) -> Result<InboundMessage, StoreError> {
            self.0.assign_inbound(id, t, r, force).await
        }
        async fn mark_inbound_read(&self, id: &str) -> Result<InboundMessage, StoreError> {
            self.0.mark_inbound_read(id).await
        }
        async fn delete_inbound(&self, id: &str) -> Result<(), StoreError> {
            self.0.delete_inbound(id).await
        }
        async fn insert_outbound(&self, r: OutboundMessageRecord) -> Result<(), StoreError> {
            self.0.insert_outbound(r).await
        }
        async fn update_outbound(&self, r: OutboundMessageRecord) -> Result<(), StoreError> {
            self.0.update_outbound(r).await
        }
        async fn get_outbound(
            &self,
            id: &str,
        ) -> Result<Option<OutboundMessageRecord>, StoreError> {
            self.0.get_outbound(id).await
        }
        async fn list_outbound(
            &self,
            t: Option<&str>,
        ) -> Result<Vec<OutboundMessageRecord>, StoreError> {
            self.0.list_outbound(t).await
        }
        async fn latest_outbound_to(
            &self,
            a: &str,
        ) -> Result<Option<OutboundMessageRecord>, StoreError> {
            self.0.latest_outbound_to(a).await
        }
        async fn get_config(
            &self,
            s: &ConfigScope,
            k: &str,
        ) -> Result<Option<String>, StoreError> {
            self.0.get_config(s, k).await
        }
        async fn set_config(&self, s: &ConfigScope, k: &str, v: &str) -> Result<(), StoreError> {
            self.0.set_config(s, k, v).await
        }
        async fn remove_config(&self, s: &ConfigScope, k: &str) -> Result<(), StoreError> {
            self.0.remove_config(s, k).await
        }
        async fn list_config(
            &self,
            s: &ConfigScope,
            p: &str,
        ) -> Result<Vec<(String, String)>, StoreError> {
            self.0.list_config(s, p).await
        }
    }

    async fn futures_pending<T>() -> T {
        std::future::pending().await
    }

    #[tokio::test]
    async fn test_stalled_call_times_out() {
        let store = TimedStore::new(StalledStore(MemoryStore::new()), Duration::from_millis(20));

        let result = store.get_tenant("a").await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let store = TimedStore::new(MemoryStore::new(), Duration::from_secs(1));
        store
            .insert_tenant(Tenant::new("a", Role::Client, 3))
            .await
            .unwrap();

        let tenant = store.get_tenant("a").await.unwrap().unwrap();
        assert_eq!(tenant.balance, 3);
    }
}
