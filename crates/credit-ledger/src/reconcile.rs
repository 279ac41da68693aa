//! Reconciliation of the ledger against message history, and of the pool
//! caches against tenant balances.

use crate::error::LedgerError;
use crate::ledger::{CreditLedger, EntryMeta};
use serde::Serialize;
use sms_store::{OutboundMessageRecord, PoolKey, Role, TenantId, TransactionKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-tenant result of a reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct TenantDrift {
    pub tenant_id: TenantId,
    /// Units that message history says should have been charged.
    pub expected_units: u64,
    /// Units actually charged by message debits and earlier corrections.
    pub charged_units: u64,
    /// Units debited by this pass.
    pub corrected: u64,
    /// Under-charge left over because the balance could not cover it.
    pub outstanding: u64,
    /// Units charged beyond what history explains. Reported, not refunded.
    pub overcharged: u64,
}

/// Result of [`CreditLedger::reconcile`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub tenants_checked: usize,
    /// Only tenants with drift in either direction.
    pub drifts: Vec<TenantDrift>,
}

impl ReconciliationReport {
    pub fn total_corrected(&self) -> u64 {
        self.drifts.iter().map(|d| d.corrected).sum()
    }

    pub fn total_outstanding(&self) -> u64 {
        self.drifts.iter().map(|d| d.outstanding).sum()
    }
}

/// A pool whose cached value was rewritten.
#[derive(Debug, Clone, Serialize)]
pub struct PoolCorrection {
    pub key: PoolKey,
    pub previous: u64,
    pub recomputed: u64,
}

impl CreditLedger {
    /// Compare every tenant's message history with its charges and charge
    /// each chargeable record that has no linked charge yet with a
    /// `reconciliation` transaction carrying the record id.
    ///
    /// Corrections never drive a balance negative; what cannot be covered is
    /// reported as outstanding. A record charged concurrently by the sender
    /// is left alone, since the store accepts one charge per message.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, LedgerError> {
        let tenants = self.store().list_tenants().await?;
        let mut report = ReconciliationReport {
            tenants_checked: tenants.len(),
            drifts: Vec::new(),
        };

        for tenant in tenants {
            let records: Vec<OutboundMessageRecord> = self
                .store()
                .list_outbound(Some(&tenant.id))
                .await?
                .into_iter()
                .filter(|r| r.status.is_chargeable() && !r.is_example)
                .collect();
            let transactions = self.store().list_transactions(&tenant.id).await?;

            let mut charged_units = 0u64;
            let mut charged_by_message: HashMap<&str, u64> = HashMap::new();
            for tx in transactions.iter().filter(|tx| tx.is_message_charge()) {
                charged_units += tx.amount.unsigned_abs();
                if let Some(message_id) = tx.charged_message() {
                    *charged_by_message.entry(message_id).or_insert(0) += tx.amount.unsigned_abs();
                }
            }
            let expected_units: u64 = records.iter().map(|r| r.units).sum();

            let mut drift = TenantDrift {
                tenant_id: tenant.id.clone(),
                expected_units,
                charged_units,
                corrected: 0,
                outstanding: 0,
                overcharged: charged_units.saturating_sub(expected_units),
            };

            for record in &records {
                match charged_by_message.get(record.id.as_str()) {
                    Some(charged) => drift.outstanding += record.units.saturating_sub(*charged),
                    None => match self.charge_missing(record).await? {
                        Some(corrected) => {
                            drift.corrected += corrected;
                            drift.outstanding += record.units - corrected;
                        }
                        None => debug!(record_id = %record.id, "Charged concurrently, skipping"),
                    },
                }
            }

            if drift.corrected == 0 && drift.outstanding == 0 && drift.overcharged == 0 {
                continue;
            }

            if drift.corrected > 0 {
                info!(
                    tenant_id = %tenant.id,
                    expected_units,
                    charged_units,
                    corrected = drift.corrected,
                    "Reconciliation drift corrected"
                );
            }
            if drift.outstanding > 0 {
                warn!(
                    tenant_id = %tenant.id,
                    outstanding = drift.outstanding,
                    "Reconciliation drift exceeds balance"
                );
            }
            if drift.overcharged > 0 {
                warn!(
                    tenant_id = %tenant.id,
                    expected_units,
                    charged_units,
                    "Ledger charged more than message history explains"
                );
            }

            report.drifts.push(drift);
        }

        Ok(report)
    }

    /// Charge an uncharged record as far as the balance allows, returning
    /// the units taken. `None` when another charge for it landed first.
    async fn charge_missing(
        &self,
        record: &OutboundMessageRecord,
    ) -> Result<Option<u64>, LedgerError> {
        let units = record.units;
        let taken = AtomicU64::new(0);
        let meta = EntryMeta {
            message_id: Some(record.id.clone()),
            note: Some(format!("uncharged record, {} units", units)),
            ..Default::default()
        };

        let result = self
            .apply_delta(&record.tenant_id, TransactionKind::Reconciliation, meta, |balance| {
                let take = units.min(balance);
                taken.store(take, Ordering::Relaxed);
                Ok(-(take as i64))
            })
            .await;

        match result {
            Ok(_) => Ok(Some(taken.load(Ordering::Relaxed))),
            Err(LedgerError::AlreadyCharged(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Recompute every pool from tenant balances and rewrite the ones that
    /// drifted.
    pub async fn reconcile_pools(&self) -> Result<Vec<PoolCorrection>, LedgerError> {
        let tenants = self.store().list_tenants().await?;

        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        let mut operator_total = 0u64;
        for tenant in &tenants {
            if let Some(group_id) = &tenant.group_id {
                *totals.entry(group_id.clone()).or_insert(0) += tenant.balance;
            }
            if tenant.role != Role::Operator {
                operator_total += tenant.balance;
            }
        }

        let mut expected: Vec<(PoolKey, u64)> = totals
            .into_iter()
            .map(|(group_id, total)| (PoolKey::Group(group_id), total))
            .collect();
        expected.push((PoolKey::Operator, operator_total));

        let mut corrections = Vec::new();
        for (key, recomputed) in expected {
            let previous = self.store().get_pool(&key).await?;
            if previous != recomputed {
                self.store().set_pool(&key, recomputed).await?;
                info!(pool = %key, previous, recomputed, "Pool reconciled");
                corrections.push(PoolCorrection {
                    key,
                    previous,
                    recomputed,
                });
            }
        }

        Ok(corrections)
    }
}

/// Periodically runs both reconciliation passes.
pub struct Reconciler {
    ledger: Arc<CreditLedger>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(ledger: Arc<CreditLedger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    /// Run one ledger pass followed by one pool pass.
    pub async fn run_once(&self) {
        match self.ledger.reconcile().await {
            Ok(report) if report.drifts.is_empty() => {
                debug!("No ledger drift across {} tenants", report.tenants_checked);
            }
            Ok(report) => {
                info!(
                    "Ledger reconciliation: {} drifting tenants, {} units corrected, {} outstanding",
                    report.drifts.len(),
                    report.total_corrected(),
                    report.total_outstanding()
                );
            }
            Err(e) => error!("Ledger reconciliation failed: {}", e),
        }

        match self.ledger.reconcile_pools().await {
            Ok(corrections) if corrections.is_empty() => debug!("Pools consistent"),
            Ok(corrections) => info!("Rewrote {} pools", corrections.len()),
            Err(e) => error!("Pool reconciliation failed: {}", e),
        }
    }

    /// Run until the task is dropped, sleeping `interval` between passes.
    pub async fn run(&self) {
        info!("Starting reconciler, interval: {:?}", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_once().await;
        }
    }
}

/// Spawn the reconciler as a background task.
pub fn spawn_reconciler(
    ledger: Arc<CreditLedger>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let reconciler = Reconciler::new(ledger, interval);

    tokio::spawn(async move {
        reconciler.run().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chrono::Utc;
    use sms_store::{
        MemoryStore, OutboundStatus, PricingPair, SendEndpoint, SendMode,
        Store, Tenant,
    };

    fn record(tenant: &str, units: u64, status: OutboundStatus) -> OutboundMessageRecord {
        let now = Utc::now();
        OutboundMessageRecord {
            id: next_record_id(),
            tenant_id: tenant.into(),
            actor_id: tenant.into(),
            mode: SendMode::Own,
            endpoint: SendEndpoint::Bulk,
            external_id: None,
            recipients: vec![],
            body: "x".into(),
            units,
            status,
            provider_status: None,
            pricing: PricingPair::default(),
            charge_error: None,
            request_snapshot: serde_json::Value::Null,
            response_snapshot: None,
            is_example: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn next_record_id() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(0);
        format!("rec-{}", NEXT.fetch_add(1, Ordering::Relaxed))
    }

    async fn setup(tenants: Vec<Tenant>) -> (Arc<MemoryStore>, Arc<CreditLedger>) {
        let store = Arc::new(MemoryStore::new());
        for tenant in tenants {
            store.insert_tenant(tenant).await.unwrap();
        }
        let ledger = Arc::new(CreditLedger::new(store.clone(), LedgerConfig::default()));
        (store, ledger)
    }

    #[tokio::test]
    async fn test_reconcile_charges_missing_debit() {
        let (store, ledger) = setup(vec![Tenant::new("a", Role::Client, 10)]).await;

        let charged = record("a", 3, OutboundStatus::Sent);
        store.insert_outbound(charged.clone()).await.unwrap();
        ledger.debit("a", 3, Some(&charged.id)).await.unwrap();

        store
            .insert_outbound(record("a", 2, OutboundStatus::ChargeFailed))
            .await
            .unwrap();
        // Not chargeable, ignored.
        store
            .insert_outbound(record("a", 4, OutboundStatus::Failed))
            .await
            .unwrap();
        let mut example = record("a", 9, OutboundStatus::Sent);
        example.is_example = true;
        store.insert_outbound(example).await.unwrap();

        let report = ledger.reconcile().await.unwrap();
        assert_eq!(report.drifts.len(), 1);
        assert_eq!(report.drifts[0].expected_units, 5);
        assert_eq!(report.drifts[0].charged_units, 3);
        assert_eq!(report.drifts[0].corrected, 2);
        assert_eq!(report.drifts[0].outstanding, 0);

        assert_eq!(ledger.balance("a").await.unwrap(), 5);
        let last = ledger.history("a").await.unwrap().pop().unwrap();
        assert_eq!(last.kind, TransactionKind::Reconciliation);

        // Second pass finds nothing.
        let report = ledger.reconcile().await.unwrap();
        assert!(report.drifts.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_never_goes_negative() {
        let (store, ledger) = setup(vec![Tenant::new("a", Role::Client, 1)]).await;
        store
            .insert_outbound(record("a", 4, OutboundStatus::ChargeFailed))
            .await
            .unwrap();

        let report = ledger.reconcile().await.unwrap();
        assert_eq!(report.drifts[0].corrected, 1);
        assert_eq!(report.drifts[0].outstanding, 3);
        assert_eq!(ledger.balance("a").await.unwrap(), 0);
        assert!(ledger.verify_completeness("a").await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_reconcile_before_sender_debit_charges_once() {
        let (store, ledger) = setup(vec![Tenant::new("a", Role::Client, 5)]).await;

        // Record stored as sent, sender's debit not yet applied.
        let sent = record("a", 2, OutboundStatus::Sent);
        store.insert_outbound(sent.clone()).await.unwrap();

        let report = ledger.reconcile().await.unwrap();
        assert_eq!(report.total_corrected(), 2);

        let err = ledger.debit("a", 2, Some(&sent.id)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyCharged(_)));

        assert_eq!(ledger.balance("a").await.unwrap(), 3);
        let charges: Vec<_> = ledger
            .history("a")
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.charged_message() == Some(sent.id.as_str()))
            .collect();
        assert_eq!(charges.len(), 1);
        assert!(ledger.reconcile().await.unwrap().drifts.is_empty());
    }

    #[tokio::test]
    async fn test_partially_corrected_record_stays_outstanding() {
        let (store, ledger) = setup(vec![Tenant::new("a", Role::Client, 1)]).await;
        store
            .insert_outbound(record("a", 3, OutboundStatus::ChargeFailed))
            .await
            .unwrap();
        ledger.reconcile().await.unwrap();

        ledger.credit("a", 10, None).await.unwrap();

        // The record already carries its one charge, nothing more is taken.
        let report = ledger.reconcile().await.unwrap();
        assert_eq!(report.drifts[0].corrected, 0);
        assert_eq!(report.drifts[0].outstanding, 2);
        assert_eq!(ledger.balance("a").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_reconcile_reports_overcharge() {
        let (_, ledger) = setup(vec![Tenant::new("a", Role::Client, 5)]).await;
        ledger.debit("a", 2, Some("orphan")).await.unwrap();

        let report = ledger.reconcile().await.unwrap();
        assert_eq!(report.drifts[0].overcharged, 2);
        assert_eq!(report.drifts[0].corrected, 0);
        assert_eq!(ledger.balance("a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_pools() {
        let (store, ledger) = setup(vec![
            Tenant::new("op", Role::Operator, 100),
            Tenant::new("lead", Role::GroupLead, 20).with_group("g1"),
            Tenant::new("c1", Role::Client, 5).with_group("g1"),
            Tenant::new("c2", Role::Client, 7),
        ])
        .await;
        store.set_pool(&PoolKey::Group("g1".into()), 3).await.unwrap();

        let corrections = ledger.reconcile_pools().await.unwrap();
        assert_eq!(corrections.len(), 2);

        assert_eq!(store.get_pool(&PoolKey::Group("g1".into())).await.unwrap(), 25);
        assert_eq!(store.get_pool(&PoolKey::Operator).await.unwrap(), 32);

        assert!(ledger.reconcile_pools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconciler_run_once() {
        let (store, ledger) = setup(vec![Tenant::new("a", Role::Client, 4)]).await;
        store
            .insert_outbound(record("a", 1, OutboundStatus::ChargeFailed))
            .await
            .unwrap();

        Reconciler::new(ledger.clone(), Duration::from_secs(60))
            .run_once()
            .await;

        assert_eq!(ledger.balance("a").await.unwrap(), 3);
        assert_eq!(store.get_pool(&PoolKey::Operator).await.unwrap(), 3);
    }
}
