//! Inbound routing: validation, aliasing and the tenant resolution chain.

mod diagnostics;
mod event;
mod resolver;
mod secret;
mod strategy;

pub use diagnostics::{RoutingDiagnostics, RoutingSnapshot};
pub use event::{InboundEvent, InboundPayload};
pub use resolver::{Resolution, TenantResolver, ALIAS_PREFIX};
pub use secret::verify_webhook_secret;
pub use strategy::{
    default_chain, AssignedReceiverStrategy, BusinessLabelStrategy, DefaultTenantStrategy,
    RecentRecipientStrategy, RoutingStrategy, DEFAULT_TENANT_KEY,
};

#[cfg(test)]
pub(crate) mod test_support {
    use super::InboundEvent;
    use chrono::Utc;
    use sms_store::{
        OutboundMessageRecord, OutboundStatus, PricingPair, SendEndpoint, SendMode,
    };

    pub fn event(sender: &str, receiver: &str) -> InboundEvent {
        InboundEvent {
            sender: sender.into(),
            receiver: receiver.into(),
            original_receiver: None,
            business_label: None,
            body: "hello".into(),
            first_name: None,
            last_name: None,
            matched_block_word: None,
            used_modem: None,
            port: None,
            external_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn outbound_to(tenant: &str, recipient: &str) -> OutboundMessageRecord {
        let now = Utc::now();
        OutboundMessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant.into(),
            actor_id: tenant.into(),
            mode: SendMode::Own,
            endpoint: SendEndpoint::Single,
            external_id: Some("ext".into()),
            recipients: vec![recipient.into()],
            body: "hi".into(),
            units: 1,
            status: OutboundStatus::Sent,
            provider_status: Some("sent".into()),
            pricing: PricingPair::default(),
            charge_error: None,
            request_snapshot: serde_json::Value::Null,
            response_snapshot: None,
            is_example: false,
            created_at: now,
            updated_at: now,
        }
    }
}
