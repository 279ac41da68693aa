//! Tenant balances and the append-only transaction ledger.

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use serde::Serialize;
use sms_store::{
    BalanceChange, BalanceEntry, LedgerTransaction, PoolKey, Role, Store, StoreError, Tenant,
    TenantId, TransactionKind,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of a group-lead to client transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub from_balance: u64,
    pub to_balance: u64,
}

/// Outcome of a ledger completeness check for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct CompletenessCheck {
    pub tenant_id: TenantId,
    pub balance: u64,
    pub initial_balance: u64,
    /// Signed sum of every transaction amount.
    pub ledger_total: i64,
}

impl CompletenessCheck {
    pub fn is_complete(&self) -> bool {
        self.initial_balance as i64 + self.ledger_total == self.balance as i64
    }
}

/// Extra fields attached to a ledger entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntryMeta {
    pub message_id: Option<String>,
    pub counterparty: Option<TenantId>,
    pub note: Option<String>,
}

impl EntryMeta {
    fn apply(&self, mut tx: LedgerTransaction) -> LedgerTransaction {
        if let Some(id) = &self.message_id {
            tx = tx.with_message(id.clone());
        }
        if let Some(id) = &self.counterparty {
            tx = tx.with_counterparty(id.clone());
        }
        if let Some(note) = &self.note {
            tx = tx.with_note(note.clone());
        }
        tx
    }
}

/// Add the pool adjustments that mirror a balance delta on `tenant`.
///
/// Group pools track member balances; the operator pool tracks every
/// non-operator balance.
pub(crate) fn mirror_pools(change: BalanceChange, tenant: &Tenant, delta: i64) -> BalanceChange {
    let mut change = change;
    if let Some(group_id) = &tenant.group_id {
        change = change.adjust_pool(PoolKey::Group(group_id.clone()), delta);
    }
    if tenant.role != Role::Operator {
        change = change.adjust_pool(PoolKey::Operator, delta);
    }
    change
}

/// Prepaid credit ledger.
///
/// Every mutation reads the current balance, builds a [`BalanceChange`]
/// conditioned on that balance and commits it; a conflicting concurrent
/// write causes a re-read and retry.
pub struct CreditLedger {
    store: Arc<dyn Store>,
    config: LedgerConfig,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn load(&self, tenant_id: &str) -> Result<Tenant, LedgerError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LedgerError::TenantNotFound(tenant_id.to_string()))
    }

    /// Commit a change, mapping a stale read to `None`.
    async fn try_commit(&self, change: BalanceChange) -> Result<Option<Vec<Tenant>>, LedgerError> {
        match self.store.commit_balance_change(change).await {
            Ok(updated) => Ok(Some(updated)),
            Err(StoreError::Conflict(what)) => {
                debug!("Balance commit conflicted on {}, retrying", what);
                Ok(None)
            }
            Err(StoreError::AlreadyCharged(id)) => Err(LedgerError::AlreadyCharged(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a signed delta computed from the freshly read balance.
    ///
    /// `delta_for` sees the current balance and returns the delta to apply,
    /// or an error to abort without writing. A zero delta writes nothing.
    pub(crate) async fn apply_delta<F>(
        &self,
        tenant_id: &str,
        kind: TransactionKind,
        meta: EntryMeta,
        delta_for: F,
    ) -> Result<u64, LedgerError>
    where
        F: Fn(u64) -> Result<i64, LedgerError>,
    {
        for _ in 0..=self.config.max_retries {
            let tenant = self.load(tenant_id).await?;
            let before = tenant.balance;
            let delta = delta_for(before)?;

            if delta == 0 {
                return Ok(before);
            }

            let after = if delta < 0 {
                before.checked_sub(delta.unsigned_abs()).ok_or(
                    LedgerError::InsufficientCredits {
                        required: delta.unsigned_abs(),
                        available: before,
                    },
                )?
            } else {
                before.saturating_add(delta as u64)
            };

            let transaction = meta.apply(LedgerTransaction::new(&tenant.id, kind, before, after));
            let change = BalanceChange::new().entry(BalanceEntry {
                tenant_id: tenant.id.clone(),
                expected_balance: before,
                new_balance: after,
                transaction,
            });
            let change = mirror_pools(change, &tenant, delta);

            if self.try_commit(change).await?.is_some() {
                return Ok(after);
            }
        }

        warn!(tenant_id = %tenant_id, "Balance mutation gave up after {} retries", self.config.max_retries);
        Err(LedgerError::Contention(tenant_id.to_string()))
    }

    /// Current balance of a tenant.
    pub async fn balance(&self, tenant_id: &str) -> Result<u64, LedgerError> {
        Ok(self.load(tenant_id).await?.balance)
    }

    /// Transaction history of a tenant, oldest first.
    pub async fn history(&self, tenant_id: &str) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self.store.list_transactions(tenant_id).await?)
    }

    /// Charge `units` credits, linked to an outbound record when given.
    ///
    /// Fails with `InsufficientCredits` without writing anything when the
    /// balance is too low, and with `AlreadyCharged` when the record has
    /// been charged before. Group and operator pools are decremented in the
    /// same commit.
    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        tenant_id: &str,
        units: u64,
        message_id: Option<&str>,
    ) -> Result<u64, LedgerError> {
        if units == 0 {
            return Err(LedgerError::InvalidAmount("debit of zero units".into()));
        }
        let delta = i64::try_from(units)
            .map_err(|_| LedgerError::InvalidAmount(format!("{} units", units)))?;

        let meta = EntryMeta {
            message_id: message_id.map(str::to_string),
            ..Default::default()
        };

        let new_balance = self
            .apply_delta(tenant_id, TransactionKind::Debit, meta, |balance| {
                if balance < units {
                    Err(LedgerError::InsufficientCredits {
                        required: units,
                        available: balance,
                    })
                } else {
                    Ok(-delta)
                }
            })
            .await?;

        debug!(tenant_id = %tenant_id, units, new_balance, "Debited credits");
        Ok(new_balance)
    }

    /// Add `amount` credits.
    #[instrument(skip(self, note))]
    pub async fn credit(
        &self,
        tenant_id: &str,
        amount: u64,
        note: Option<&str>,
    ) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("credit of zero".into()));
        }
        let delta = i64::try_from(amount)
            .map_err(|_| LedgerError::InvalidAmount(format!("{} credits", amount)))?;

        let meta = EntryMeta {
            note: note.map(str::to_string),
            ..Default::default()
        };

        let new_balance = self
            .apply_delta(tenant_id, TransactionKind::Credit, meta, |_| Ok(delta))
            .await?;

        info!(tenant_id = %tenant_id, amount, new_balance, "Credited tenant");
        Ok(new_balance)
    }

    /// Apply a manual signed correction.
    ///
    /// A negative adjustment larger than the balance is refused with
    /// `InsufficientCredits`.
    #[instrument(skip(self, note))]
    pub async fn adjust(
        &self,
        tenant_id: &str,
        delta: i64,
        note: Option<&str>,
    ) -> Result<u64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidAmount("adjustment of zero".into()));
        }

        let meta = EntryMeta {
            note: note.map(str::to_string),
            ..Default::default()
        };

        let new_balance = self
            .apply_delta(tenant_id, TransactionKind::Adjustment, meta, |_| Ok(delta))
            .await?;

        info!(tenant_id = %tenant_id, delta, new_balance, "Adjusted balance");
        Ok(new_balance)
    }

    /// Move credit from a group-lead to a client in its group.
    ///
    /// Both ledger entries and the group pool decrement commit together.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        lead_id: &str,
        client_id: &str,
        amount: u64,
    ) -> Result<TransferReceipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("transfer of zero".into()));
        }
        if lead_id == client_id {
            return Err(LedgerError::InvalidAmount("transfer to self".into()));
        }
        let delta = i64::try_from(amount)
            .map_err(|_| LedgerError::InvalidAmount(format!("{} credits", amount)))?;

        for _ in 0..=self.config.max_retries {
            let lead = self.load(lead_id).await?;
            let client = self.load(client_id).await?;

            if lead.role != Role::GroupLead {
                return Err(LedgerError::Forbidden(format!("{} is not a group-lead", lead_id)));
            }
            let group_id = match (&lead.group_id, &client.group_id) {
                (Some(lead_group), Some(client_group)) if lead_group == client_group => {
                    lead_group.clone()
                }
                _ => {
                    return Err(LedgerError::Forbidden(format!(
                        "{} is not in the group led by {}",
                        client_id, lead_id
                    )))
                }
            };

            let lead_after =
                lead.balance
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientCredits {
                        required: amount,
                        available: lead.balance,
                    })?;
            let client_after = client.balance.saturating_add(amount);

            let change = BalanceChange::new()
                .entry(BalanceEntry {
                    tenant_id: lead.id.clone(),
                    expected_balance: lead.balance,
                    new_balance: lead_after,
                    transaction: LedgerTransaction::new(
                        &lead.id,
                        TransactionKind::Debit,
                        lead.balance,
                        lead_after,
                    )
                    .with_counterparty(&client.id)
                    .with_note("transfer"),
                })
                .entry(BalanceEntry {
                    tenant_id: client.id.clone(),
                    expected_balance: client.balance,
                    new_balance: client_after,
                    transaction: LedgerTransaction::new(
                        &client.id,
                        TransactionKind::Credit,
                        client.balance,
                        client_after,
                    )
                    .with_counterparty(&lead.id)
                    .with_note("transfer"),
                })
                .adjust_pool(PoolKey::Group(group_id), -delta);

            if self.try_commit(change).await?.is_some() {
                info!(
                    from = %lead_id,
                    to = %client_id,
                    amount,
                    "Transferred credits"
                );
                return Ok(TransferReceipt {
                    from_balance: lead_after,
                    to_balance: client_after,
                });
            }
        }

        Err(LedgerError::Contention(format!("{}/{}", lead_id, client_id)))
    }

    /// Check that the balance equals the opening balance plus every
    /// transaction amount.
    pub async fn verify_completeness(
        &self,
        tenant_id: &str,
    ) -> Result<CompletenessCheck, LedgerError> {
        let tenant = self.load(tenant_id).await?;
        let ledger_total = self
            .store
            .list_transactions(tenant_id)
            .await?
            .iter()
            .map(|tx| tx.amount)
            .sum();

        let check = CompletenessCheck {
            tenant_id: tenant.id,
            balance: tenant.balance,
            initial_balance: tenant.initial_balance,
            ledger_total,
        };

        if !check.is_complete() {
            warn!(
                tenant_id = %check.tenant_id,
                balance = check.balance,
                initial = check.initial_balance,
                ledger_total = check.ledger_total,
                "Ledger is incomplete"
            );
        }

        Ok(check)
    }
}
