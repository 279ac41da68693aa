//! Bounded buffer of recent routing decisions for operator troubleshooting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sms_store::TenantId;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// One routing decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSnapshot {
    pub external_id: String,
    pub sender: String,
    pub receiver: String,
    pub original_receiver: Option<String>,
    pub business_label: Option<String>,
    pub tenant_id: Option<TenantId>,
    /// Strategy that matched; `None` when unassigned.
    pub strategy: Option<String>,
    pub at: DateTime<Utc>,
}

/// Last-N routing decisions, newest first. Carries no correctness contract.
pub struct RoutingDiagnostics {
    capacity: usize,
    events: RwLock<VecDeque<RoutingSnapshot>>,
}

impl RoutingDiagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub async fn record(&self, snapshot: RoutingSnapshot) {
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_back();
        }
        events.push_front(snapshot);
    }

    pub async fn recent(&self) -> Vec<RoutingSnapshot> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<RoutingSnapshot> {
        self.events.read().await.front().cloned()
    }
}
