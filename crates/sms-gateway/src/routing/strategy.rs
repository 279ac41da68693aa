//! Tenant resolution strategies.
//!
//! Each strategy answers one question about an inbound event and either
//! names a tenant or passes. The resolver runs them in order.

use super::event::InboundEvent;
use async_trait::async_trait;
use sms_store::{ConfigScope, Store, StoreError, TenantId};
use std::sync::Arc;
use tracing::debug;

/// Global config key holding the business label of the fallback tenant.
pub const DEFAULT_TENANT_KEY: &str = "default_tenant_label";

#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    /// Name recorded as `routed_by` when this strategy matches.
    fn name(&self) -> &'static str;

    async fn resolve(&self, event: &InboundEvent) -> Result<Option<TenantId>, StoreError>;
}

/// Tenant whose business label equals the event's label.
pub struct BusinessLabelStrategy {
    store: Arc<dyn Store>,
}

impl BusinessLabelStrategy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoutingStrategy for BusinessLabelStrategy {
    fn name(&self) -> &'static str {
        "business-label"
    }

    async fn resolve(&self, event: &InboundEvent) -> Result<Option<TenantId>, StoreError> {
        let Some(label) = event.business_label.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_tenant_by_business_label(label)
            .await?
            .map(|t| t.id))
    }
}

/// Tenant that most recently sent to the event's sender.
pub struct RecentRecipientStrategy {
    store: Arc<dyn Store>,
}

impl RecentRecipientStrategy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoutingStrategy for RecentRecipientStrategy {
    fn name(&self) -> &'static str {
        "recent-recipient"
    }

    async fn resolve(&self, event: &InboundEvent) -> Result<Option<TenantId>, StoreError> {
        let Some(record) = self.store.latest_outbound_to(&event.sender).await? else {
            return Ok(None);
        };

        // The conversation belongs to a tenant that has since been disabled.
        match self.store.get_tenant(&record.tenant_id).await? {
            Some(tenant) if !tenant.disabled => Ok(Some(tenant.id)),
            _ => {
                debug!(tenant_id = %record.tenant_id, "Skipping disabled recent sender");
                Ok(None)
            }
        }
    }
}

/// Tenant that owns the receiving number.
pub struct AssignedReceiverStrategy {
    store: Arc<dyn Store>,
}

impl AssignedReceiverStrategy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoutingStrategy for AssignedReceiverStrategy {
    fn name(&self) -> &'static str {
        "assigned-receiver"
    }

    async fn resolve(&self, event: &InboundEvent) -> Result<Option<TenantId>, StoreError> {
        Ok(self
            .store
            .find_tenant_by_receiving_number(&event.receiver)
            .await?
            .map(|t| t.id))
    }
}

/// Operator-configured fallback tenant.
pub struct DefaultTenantStrategy {
    store: Arc<dyn Store>,
}

impl DefaultTenantStrategy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoutingStrategy for DefaultTenantStrategy {
    fn name(&self) -> &'static str {
        "default-tenant"
    }

    async fn resolve(&self, _event: &InboundEvent) -> Result<Option<TenantId>, StoreError> {
        let Some(label) = self
            .store
            .get_config(&ConfigScope::Global, DEFAULT_TENANT_KEY)
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_tenant_by_business_label(&label)
            .await?
            .map(|t| t.id))
    }
}

/// The standard chain: business label, recent recipient, assigned
/// receiver, default tenant.
pub fn default_chain(store: Arc<dyn Store>) -> Vec<Arc<dyn RoutingStrategy>> {
    vec![
        Arc::new(BusinessLabelStrategy::new(store.clone())),
        Arc::new(RecentRecipientStrategy::new(store.clone())),
        Arc::new(AssignedReceiverStrategy::new(store.clone())),
        Arc::new(DefaultTenantStrategy::new(store)),
    ]
}
