//! Inbound pipeline: validate, deduplicate, route, store, forward.

use crate::error::GatewayError;
use crate::forwarder::Forwarder;
use crate::routing::{verify_webhook_secret, InboundEvent, InboundPayload, TenantResolver};
use secrecy::SecretString;
use sms_store::{InboundFilter, InboundMessage, Role, Store, Tenant, TenantId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// `routed_by` marker for operator repairs.
pub const MANUAL_REPAIR: &str = "manual-repair";

/// Result of accepting a provider push.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub message: InboundMessage,
    /// `false` when the external id had already been stored.
    pub created: bool,
    /// Whether a push delivery was started.
    pub forwarded: bool,
}

/// Accepts provider pushes and serves tenant inboxes.
pub struct InboundService {
    store: Arc<dyn Store>,
    resolver: Arc<TenantResolver>,
    forwarder: Arc<Forwarder>,
    default_dial: String,
    webhook_secret: Option<SecretString>,
}

impl InboundService {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<TenantResolver>,
        forwarder: Arc<Forwarder>,
        default_dial: impl Into<String>,
        webhook_secret: Option<SecretString>,
    ) -> Self {
        Self {
            store,
            resolver,
            forwarder,
            default_dial: default_dial.into(),
            webhook_secret,
        }
    }

    pub fn resolver(&self) -> &Arc<TenantResolver> {
        &self.resolver
    }

    /// Check the secret presented with a push against the configured one.
    pub fn verify_secret(&self, presented: Option<&str>) -> Result<(), GatewayError> {
        verify_webhook_secret(self.webhook_secret.as_ref(), presented)
    }

    /// Validate, route and store one push.
    ///
    /// A push whose external id is already stored returns the stored record
    /// and is neither routed nor forwarded again.
    #[instrument(skip(self, payload))]
    pub async fn ingest(&self, payload: InboundPayload) -> Result<IngestOutcome, GatewayError> {
        let event = InboundEvent::from_payload(payload, &self.default_dial)?;

        if let Some(existing) = self
            .store
            .find_inbound_by_external_id(&event.external_id)
            .await?
        {
            debug!(external_id = %event.external_id, "Duplicate push ignored");
            return Ok(IngestOutcome {
                message: existing,
                created: false,
                forwarded: false,
            });
        }

        let (event, resolution) = self.resolver.route(event).await?;
        let message = event.into_message(
            resolution.tenant_id,
            resolution.strategy.map(str::to_string),
        );

        // A concurrent duplicate may still win the insert.
        let (message, created) = self.store.insert_inbound(message).await?;

        let forwarded = created && self.forward_if_wanted(&message).await;

        Ok(IngestOutcome {
            message,
            created,
            forwarded,
        })
    }

    async fn forward_if_wanted(&self, message: &InboundMessage) -> bool {
        let Some(tenant_id) = message.tenant_id.as_deref() else {
            return false;
        };

        let tenant = match self.store.get_tenant(tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return false,
            Err(e) => {
                warn!(tenant_id = %tenant_id, "Skipping push delivery, tenant lookup failed: {}", e);
                return false;
            }
        };

        if !tenant.delivery_mode.wants_push() || tenant.forward_url.is_none() {
            return false;
        }

        self.forwarder.spawn(tenant, message.clone());
        true
    }

    /// A tenant's inbox, oldest first.
    pub async fn list(
        &self,
        tenant: &Tenant,
        unread_only: bool,
    ) -> Result<Vec<InboundMessage>, GatewayError> {
        let filter = InboundFilter {
            tenant_id: Some(tenant.id.clone()),
            unread_only,
            ..Default::default()
        };
        Ok(self.store.list_inbound(&filter).await?)
    }

    /// Messages no strategy could assign.
    pub async fn unassigned(&self) -> Result<Vec<InboundMessage>, GatewayError> {
        let filter = InboundFilter {
            unassigned_only: true,
            ..Default::default()
        };
        Ok(self.store.list_inbound(&filter).await?)
    }

    /// Load a message the tenant owns. Other tenants' messages look missing.
    async fn owned(&self, tenant: &Tenant, id: &str) -> Result<InboundMessage, GatewayError> {
        match self.store.get_inbound(id).await? {
            Some(message)
                if !message.is_deleted && message.tenant_id.as_deref() == Some(&tenant.id) =>
            {
                Ok(message)
            }
            _ => Err(GatewayError::NotFound(format!("inbound message {}", id))),
        }
    }

    pub async fn mark_read(&self, tenant: &Tenant, id: &str) -> Result<InboundMessage, GatewayError> {
        self.owned(tenant, id).await?;
        Ok(self.store.mark_inbound_read(id).await?)
    }

    /// Soft delete.
    pub async fn delete(&self, tenant: &Tenant, id: &str) -> Result<(), GatewayError> {
        self.owned(tenant, id).await?;
        Ok(self.store.delete_inbound(id).await?)
    }

    /// Operator reassignment. Overwrites any existing owner and never
    /// forwards.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn repair_assignment(
        &self,
        actor: &Tenant,
        id: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<InboundMessage, GatewayError> {
        if actor.role != Role::Operator {
            return Err(GatewayError::Forbidden(
                "only operators may reassign inbound messages".into(),
            ));
        }

        if let Some(target) = tenant_id.as_deref() {
            if self.store.get_tenant(target).await?.is_none() {
                return Err(GatewayError::NotFound(format!("tenant {}", target)));
            }
        }

        let routed_by = tenant_id.as_ref().map(|_| MANUAL_REPAIR.to_string());
        let message = self
            .store
            .assign_inbound(id, tenant_id, routed_by, true)
            .await?;

        info!(
            message_id = %id,
            tenant_id = ?message.tenant_id,
            "Inbound assignment repaired"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingDiagnostics;
    use sms_store::{DeliveryMode, MemoryStore};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(store: Arc<MemoryStore>, secret: Option<&str>) -> InboundService {
        let resolver = Arc::new(TenantResolver::new(
            store.clone(),
            Arc::new(RoutingDiagnostics::new(10)),
        ));
        let forwarder = Arc::new(Forwarder::new(Duration::from_secs(2)).unwrap());
        InboundService::new(
            store,
            resolver,
            forwarder,
            "1",
            secret.map(|s| SecretString::new(s.to_string())),
        )
    }

    fn payload(external_id: &str, business: Option<&str>) -> InboundPayload {
        InboundPayload {
            from: Some("+15551234567".into()),
            message: Some("Hi there".into()),
            receiver: Some("+19998887777".into()),
            timestamp: Some(serde_json::json!("2024-05-01T10:30:00Z")),
            message_id: Some(serde_json::json!(external_id)),
            business: business.map(str::to_string),
            ..Default::default()
        }
    }

    async fn acme(store: &MemoryStore) -> Tenant {
        store
            .insert_tenant(
                Tenant::new("acme", Role::Client, 5)
                    .with_business_label("Acme")
                    .with_receiving_number("+15550000001"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_routes_and_stores() {
        let store = Arc::new(MemoryStore::new());
        let tenant = acme(&store).await;
        let service = service(store.clone(), None);

        let outcome = service.ingest(payload("ext-1", Some("acme "))).await.unwrap();

        assert!(outcome.created);
        assert!(!outcome.forwarded);
        assert_eq!(outcome.message.tenant_id.as_deref(), Some("acme"));
        assert_eq!(outcome.message.routed_by.as_deref(), Some("business-label"));

        let inbox = service.list(&tenant, false).await.unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_push_is_not_rerouted() {
        let store = Arc::new(MemoryStore::new());
        acme(&store).await;
        let service = service(store.clone(), None);

        let first = service.ingest(payload("ext-1", Some("Acme"))).await.unwrap();
        let second = service.ingest(payload("ext-1", None)).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.message.id, first.message.id);
        assert_eq!(service.resolver().diagnostics().recent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unassigned_is_stored() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), None);

        let outcome = service.ingest(payload("ext-9", None)).await.unwrap();

        assert!(outcome.created);
        assert!(outcome.message.tenant_id.is_none());
        assert_eq!(service.unassigned().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_push_stores_nothing() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), None);

        let mut bad = payload("ext-1", None);
        bad.message = None;

        assert!(matches!(
            service.ingest(bad).await,
            Err(GatewayError::Validation(_))
        ));
        assert!(service.unassigned().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secret_check() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, Some("s3cret"));

        assert!(service.verify_secret(Some("s3cret")).is_ok());
        assert!(matches!(
            service.verify_secret(Some("nope")),
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(service.verify_secret(None).is_err());
    }

    #[tokio::test]
    async fn test_mark_read_requires_ownership() {
        let store = Arc::new(MemoryStore::new());
        let owner = acme(&store).await;
        let other = store
            .insert_tenant(Tenant::new("other", Role::Client, 0))
            .await
            .unwrap();
        let service = service(store.clone(), None);

        let id = service
            .ingest(payload("ext-1", Some("Acme")))
            .await
            .unwrap()
            .message
            .id;

        assert!(matches!(
            service.mark_read(&other, &id).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(service.mark_read(&owner, &id).await.unwrap().is_read);
        assert!(service.list(&owner, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repair_assignment() {
        let store = Arc::new(MemoryStore::new());
        let operator = store
            .insert_tenant(Tenant::new("op", Role::Operator, 0))
            .await
            .unwrap();
        let client = acme(&store).await;
        let service = service(store.clone(), None);

        let id = service.ingest(payload("ext-1", None)).await.unwrap().message.id;

        assert!(matches!(
            service.repair_assignment(&client, &id, Some("acme".into())).await,
            Err(GatewayError::Forbidden(_))
        ));

        let repaired = service
            .repair_assignment(&operator, &id, Some("acme".into()))
            .await
            .unwrap();
        assert_eq!(repaired.tenant_id.as_deref(), Some("acme"));
        assert_eq!(repaired.routed_by.as_deref(), Some(MANUAL_REPAIR));

        assert!(matches!(
            service.repair_assignment(&operator, &id, Some("ghost".into())).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_push_tenant_receives_forward() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inbox"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store
            .insert_tenant(
                Tenant::new("acme", Role::Client, 0)
                    .with_business_label("Acme")
                    .with_forwarding(
                        DeliveryMode::Both,
                        format!("{}/inbox", mock_server.uri()),
                        Some("k".into()),
                    ),
            )
            .await
            .unwrap();
        let service = service(store.clone(), None);

        let outcome = service.ingest(payload("ext-1", Some("Acme"))).await.unwrap();
        assert!(outcome.forwarded);

        let mut delivered = 0;
        for _ in 0..50 {
            delivered = mock_server
                .received_requests()
                .await
                .map(|r| r.len())
                .unwrap_or(0);
            if delivered > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(delivered, 1);
    }
}
