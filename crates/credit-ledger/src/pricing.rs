//! Monetary pricing lookup.
//!
//! Pricing is informational: one unit always costs one credit. The pair is
//! snapshotted onto each outbound record for reporting.

use crate::error::LedgerError;
use sms_store::{ConfigScope, PricingPair, Store};
use std::sync::Arc;
use tracing::warn;

/// Config key for the provider cost per unit.
pub const COST_PER_UNIT_KEY: &str = "pricing.cost_per_unit";

/// Config key for the tenant charge per unit.
pub const CHARGE_PER_UNIT_KEY: &str = "pricing.charge_per_unit";

/// Resolves the pricing pair for a group: group override, then global, then
/// the configured default. Each field falls back independently.
pub struct PricingResolver {
    store: Arc<dyn Store>,
    default: PricingPair,
}

impl PricingResolver {
    pub fn new(store: Arc<dyn Store>, default: PricingPair) -> Self {
        Self { store, default }
    }

    pub async fn resolve(&self, group_id: Option<&str>) -> Result<PricingPair, LedgerError> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(group_id) = group_id {
            scopes.push(ConfigScope::Group(group_id.to_string()));
        }
        scopes.push(ConfigScope::Global);

        Ok(PricingPair {
            cost_per_unit: self
                .lookup(&scopes, COST_PER_UNIT_KEY)
                .await?
                .unwrap_or(self.default.cost_per_unit),
            charge_per_unit: self
                .lookup(&scopes, CHARGE_PER_UNIT_KEY)
                .await?
                .unwrap_or(self.default.charge_per_unit),
        })
    }

    /// First parseable value for `key` across `scopes`.
    async fn lookup(&self, scopes: &[ConfigScope], key: &str) -> Result<Option<u64>, LedgerError> {
        for scope in scopes {
            if let Some(raw) = self.store.get_config(scope, key).await? {
                match raw.trim().parse::<u64>() {
                    Ok(value) => return Ok(Some(value)),
                    Err(_) => warn!(?scope, key, value = %raw, "Ignoring unparseable price"),
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_store::MemoryStore;

    fn default_pair() -> PricingPair {
        PricingPair {
            cost_per_unit: 10,
            charge_per_unit: 20,
        }
    }

    #[tokio::test]
    async fn test_default_when_unset() {
        let store = Arc::new(MemoryStore::new());
        let resolver = PricingResolver::new(store, default_pair());

        assert_eq!(resolver.resolve(Some("g1")).await.unwrap(), default_pair());
        assert_eq!(resolver.resolve(None).await.unwrap(), default_pair());
    }

    #[tokio::test]
    async fn test_group_overrides_global() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_config(&ConfigScope::Global, CHARGE_PER_UNIT_KEY, "30")
            .await
            .unwrap();
        store
            .set_config(&ConfigScope::Global, COST_PER_UNIT_KEY, "12")
            .await
            .unwrap();
        store
            .set_config(&ConfigScope::Group("g1".into()), CHARGE_PER_UNIT_KEY, "25")
            .await
            .unwrap();

        let resolver = PricingResolver::new(store, default_pair());

        let g1 = resolver.resolve(Some("g1")).await.unwrap();
        assert_eq!(g1.charge_per_unit, 25);
        assert_eq!(g1.cost_per_unit, 12);

        let g2 = resolver.resolve(Some("g2")).await.unwrap();
        assert_eq!(g2.charge_per_unit, 30);
    }

    #[tokio::test]
    async fn test_unparseable_value_falls_through() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_config(&ConfigScope::Group("g1".into()), COST_PER_UNIT_KEY, "cheap")
            .await
            .unwrap();

        let resolver = PricingResolver::new(store, default_pair());
        assert_eq!(resolver.resolve(Some("g1")).await.unwrap().cost_per_unit, 10);
    }
}
