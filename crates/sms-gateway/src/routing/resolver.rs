//! Ordered tenant resolution with receiver aliasing.

use super::diagnostics::{RoutingDiagnostics, RoutingSnapshot};
use super::event::InboundEvent;
use super::strategy::{default_chain, RoutingStrategy};
use chrono::Utc;
use sms_store::{ConfigScope, Store, StoreError, TenantId};
use std::sync::Arc;
use tracing::{debug, info};

/// Global config key prefix for receiver aliases (`alias:<from>` -> `<to>`).
pub const ALIAS_PREFIX: &str = "alias:";

/// Outcome of running the strategy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// `None` means unassigned, which is a valid outcome.
    pub tenant_id: Option<TenantId>,
    pub strategy: Option<&'static str>,
}

impl Resolution {
    pub fn unassigned() -> Self {
        Self {
            tenant_id: None,
            strategy: None,
        }
    }
}

/// Decides which tenant owns an inbound event.
pub struct TenantResolver {
    store: Arc<dyn Store>,
    strategies: Vec<Arc<dyn RoutingStrategy>>,
    diagnostics: Arc<RoutingDiagnostics>,
}

impl TenantResolver {
    /// Resolver with the standard strategy chain.
    pub fn new(store: Arc<dyn Store>, diagnostics: Arc<RoutingDiagnostics>) -> Self {
        let strategies = default_chain(store.clone());
        Self::with_strategies(store, strategies, diagnostics)
    }

    pub fn with_strategies(
        store: Arc<dyn Store>,
        strategies: Vec<Arc<dyn RoutingStrategy>>,
        diagnostics: Arc<RoutingDiagnostics>,
    ) -> Self {
        Self {
            store,
            strategies,
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &Arc<RoutingDiagnostics> {
        &self.diagnostics
    }

    /// Rewrite the receiver through the alias table.
    pub async fn apply_alias(&self, mut event: InboundEvent) -> Result<InboundEvent, StoreError> {
        let key = format!("{}{}", ALIAS_PREFIX, event.receiver);
        if let Some(target) = self.store.get_config(&ConfigScope::Global, &key).await? {
            if target != event.receiver {
                debug!(from = %event.receiver, to = %target, "Receiver aliased");
                event.original_receiver = Some(std::mem::replace(&mut event.receiver, target));
            }
        }
        Ok(event)
    }

    /// Run the strategy chain; the first match wins.
    pub async fn resolve(&self, event: &InboundEvent) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::unassigned();

        for strategy in &self.strategies {
            if let Some(tenant_id) = strategy.resolve(event).await? {
                resolution = Resolution {
                    tenant_id: Some(tenant_id),
                    strategy: Some(strategy.name()),
                };
                break;
            }
        }

        match (&resolution.tenant_id, resolution.strategy) {
            (Some(tenant_id), Some(strategy)) => info!(
                external_id = %event.external_id,
                tenant_id = %tenant_id,
                strategy,
                "Inbound message routed"
            ),
            _ => info!(
                external_id = %event.external_id,
                sender = %event.sender,
                receiver = %event.receiver,
                "Inbound message unassigned"
            ),
        }

        self.diagnostics
            .record(RoutingSnapshot {
                external_id: event.external_id.clone(),
                sender: event.sender.clone(),
                receiver: event.receiver.clone(),
                original_receiver: event.original_receiver.clone(),
                business_label: event.business_label.clone(),
                tenant_id: resolution.tenant_id.clone(),
                strategy: resolution.strategy.map(str::to_string),
                at: Utc::now(),
            })
            .await;

        Ok(resolution)
    }

    /// Alias, then resolve.
    pub async fn route(&self, event: InboundEvent) -> Result<(InboundEvent, Resolution), StoreError> {
        let event = self.apply_alias(event).await?;
        let resolution = self.resolve(&event).await?;
        Ok((event, resolution))
    }

    /// Set or, with `None`, remove an alias.
    pub async fn set_alias(&self, from: &str, to: Option<&str>) -> Result<(), StoreError> {
        let key = format!("{}{}", ALIAS_PREFIX, from);
        match to {
            Some(to) => self.store.set_config(&ConfigScope::Global, &key, to).await,
            None => self.store.remove_config(&ConfigScope::Global, &key).await,
        }
    }

    /// All aliases as `(from, to)` pairs.
    pub async fn aliases(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .store
            .list_config(&ConfigScope::Global, ALIAS_PREFIX)
            .await?
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(ALIAS_PREFIX).map(|from| (from.to_string(), v)))
            .collect())
    }
}
