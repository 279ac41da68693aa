//! Outbound dispatch: authorize, normalize, send upstream, charge, record.

use crate::config::DispatchConfig;
use crate::error::GatewayError;
use crate::phone::{normalize, normalize_many};
use chrono::Utc;
use credit_ledger::{CreditLedger, LedgerError, PricingResolver};
use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use provider_client::{BulkMessage, ProviderError, SendReceipt, SingleMessage, SmsProvider};
use serde::{Deserialize, Serialize};
use sms_store::{
    OutboundMessageRecord, OutboundStatus, PricingPair, Role, SendEndpoint, SendMode, Store,
    Tenant, TenantId,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Per-tenant outbound limiter, in units per minute.
type TenantLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Same body to one or more recipients.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    /// Tenant to charge instead of the caller.
    #[serde(default)]
    pub on_behalf_of: Option<TenantId>,
    pub recipients: Vec<String>,
    pub message: String,
    /// Dial code for numbers without one; the configured default otherwise.
    #[serde(default)]
    pub country_code: Option<String>,
}

/// One recipient of a bulk-multi send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiRecipient {
    pub recipient: String,
    pub message: String,
}

/// Individual bodies per recipient in one upstream call.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiSendRequest {
    #[serde(default)]
    pub on_behalf_of: Option<TenantId>,
    pub messages: Vec<MultiRecipient>,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// Outcome of a timed-out send, as confirmed with the provider out of band.
#[derive(Debug, Clone, Deserialize)]
pub struct UnknownResolution {
    pub status: OutboundStatus,
    /// Provider message id, so later status refreshes can reach it.
    #[serde(default)]
    pub external_id: Option<String>,
}

/// What happened to a send that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DispatchOutcome {
    /// Accepted upstream and charged.
    Sent { new_balance: u64 },
    /// Accepted upstream, local charge failed. Left for reconciliation.
    ChargeFailed { reason: String },
    /// Provider did not answer in time; it may or may not have sent.
    Unknown,
    /// Provider answered with a failure status. Not charged.
    Failed { provider_status: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
    pub record: OutboundMessageRecord,
    /// Raw inputs that failed normalization.
    pub rejected: Vec<String>,
}

/// Everything about a send that is known before the provider call.
struct PendingSend {
    payer: Tenant,
    actor_id: TenantId,
    mode: SendMode,
    endpoint: SendEndpoint,
    recipients: Vec<String>,
    body: String,
    units: u64,
    pricing: PricingPair,
    request_snapshot: serde_json::Value,
    rejected: Vec<String>,
}

impl PendingSend {
    fn into_record(self, status: OutboundStatus, receipt: Option<&SendReceipt>) -> (OutboundMessageRecord, Vec<String>) {
        let now = Utc::now();
        let record = OutboundMessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: self.payer.id,
            actor_id: self.actor_id,
            mode: self.mode,
            endpoint: self.endpoint,
            external_id: receipt.map(|r| r.message_id.clone()),
            recipients: self.recipients,
            body: self.body,
            units: self.units,
            status,
            provider_status: receipt.map(|r| r.status.clone()),
            pricing: self.pricing,
            charge_error: None,
            request_snapshot: self.request_snapshot,
            response_snapshot: receipt.and_then(|r| serde_json::to_value(r).ok()),
            is_example: false,
            created_at: now,
            updated_at: now,
        };
        (record, self.rejected)
    }
}

/// Coordinates outbound sends against the provider and the ledger.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    ledger: Arc<CreditLedger>,
    provider: Arc<dyn SmsProvider>,
    pricing: PricingResolver,
    config: DispatchConfig,
    default_dial: String,
    limiters: DashMap<TenantId, (u32, Arc<TenantLimiter>)>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<CreditLedger>,
        provider: Arc<dyn SmsProvider>,
        config: DispatchConfig,
        default_dial: impl Into<String>,
    ) -> Self {
        let pricing = PricingResolver::new(store.clone(), ledger.config().default_pricing);
        Self {
            store,
            ledger,
            provider,
            pricing,
            config,
            default_dial: default_dial.into(),
            limiters: DashMap::new(),
        }
    }

    async fn load_tenant(&self, tenant_id: &str) -> Result<Tenant, GatewayError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("tenant {}", tenant_id)))
    }

    /// Decide who pays and in which mode.
    async fn authorize(
        &self,
        actor: &Tenant,
        on_behalf_of: Option<&str>,
    ) -> Result<(Tenant, SendMode), GatewayError> {
        let (payer, mode) = match on_behalf_of.filter(|id| *id != actor.id) {
            None if actor.role.can_send_direct() => (actor.clone(), SendMode::Direct),
            None => (actor.clone(), SendMode::Own),
            Some(target_id) => match actor.role {
                Role::Client => {
                    return Err(GatewayError::Forbidden(
                        "clients may only send for themselves".into(),
                    ))
                }
                Role::Operator => (self.load_tenant(target_id).await?, SendMode::OnBehalf),
                Role::GroupLead => {
                    let target = self.load_tenant(target_id).await?;
                    if actor.group_id.is_none() || target.group_id != actor.group_id {
                        return Err(GatewayError::Forbidden(format!(
                            "{} is not in the group led by {}",
                            target_id, actor.id
                        )));
                    }
                    (target, SendMode::OnBehalf)
                }
            },
        };

        if payer.disabled {
            return Err(GatewayError::Forbidden(format!("tenant {} is disabled", payer.id)));
        }
        Ok((payer, mode))
    }

    /// Consume `units` from the payer's per-minute allowance.
    fn check_rate(&self, payer: &Tenant, units: u64) -> Result<(), GatewayError> {
        let Some(quota) = NonZeroU32::new(payer.rate_limit) else {
            return Ok(());
        };

        let limiter = {
            let mut entry = self
                .limiters
                .entry(payer.id.clone())
                .or_insert_with(|| (quota.get(), Arc::new(RateLimiter::direct(Quota::per_minute(quota)))));
            if entry.0 != quota.get() {
                *entry = (quota.get(), Arc::new(RateLimiter::direct(Quota::per_minute(quota))));
            }
            entry.1.clone()
        };

        let cells = u32::try_from(units)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(GatewayError::RateLimited)?;

        match limiter.check_n(cells) {
            Ok(Ok(())) => Ok(()),
            _ => {
                warn!(tenant_id = %payer.id, units, "Tenant rate limit exceeded");
                Err(GatewayError::RateLimited)
            }
        }
    }

    /// Batch cap, rate limit and balance, in that order.
    async fn preflight(&self, payer: &Tenant, units: u64) -> Result<(), GatewayError> {
        if units > self.config.max_batch_units {
            return Err(GatewayError::Validation(format!(
                "{} units exceeds the limit of {} per call",
                units, self.config.max_batch_units
            )));
        }

        self.check_rate(payer, units)?;

        let available = self.ledger.balance(&payer.id).await?;
        if available < units {
            return Err(GatewayError::InsufficientCredits {
                required: units,
                available,
            });
        }
        Ok(())
    }

    /// Pricing snapshot for the record. Direct sends are audit-only.
    async fn pricing_for(&self, payer: &Tenant, mode: SendMode) -> Result<PricingPair, GatewayError> {
        let mut pricing = self.pricing.resolve(payer.group_id.as_deref()).await?;
        if mode == SendMode::Direct {
            pricing.charge_per_unit = 0;
        }
        Ok(pricing)
    }

    async fn call_provider<F>(&self, call: F) -> Result<SendReceipt, ProviderError>
    where
        F: Future<Output = Result<SendReceipt, ProviderError>>,
    {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    /// Send one body to every recipient.
    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn send(
        &self,
        actor: &Tenant,
        request: SendRequest,
    ) -> Result<DispatchResult, GatewayError> {
        let body = request.message.trim().to_string();
        if body.is_empty() {
            return Err(GatewayError::Validation("message is empty".into()));
        }

        let (payer, mode) = self.authorize(actor, request.on_behalf_of.as_deref()).await?;

        let dial = request.country_code.as_deref().unwrap_or(&self.default_dial);
        let batch = normalize_many(&request.recipients, dial);
        if batch.accepted.is_empty() {
            return Err(GatewayError::InvalidRecipients {
                rejected: batch.rejected,
            });
        }

        let units = batch.accepted.len() as u64;
        self.preflight(&payer, units).await?;
        let pricing = self.pricing_for(&payer, mode).await?;

        let (endpoint, request_snapshot, result) = if let [recipient] = batch.accepted.as_slice() {
            let message = SingleMessage {
                recipient: recipient.clone(),
                message: body.clone(),
            };
            let snapshot = serde_json::to_value(&message).unwrap_or_default();
            let result = self.call_provider(self.provider.send_single(&message)).await;
            (SendEndpoint::Single, snapshot, result)
        } else {
            let message = BulkMessage {
                recipients: batch.accepted.clone(),
                content: body.clone(),
            };
            let snapshot = serde_json::to_value(&message).unwrap_or_default();
            let result = self.call_provider(self.provider.send_bulk(&message)).await;
            (SendEndpoint::Bulk, snapshot, result)
        };

        let pending = PendingSend {
            actor_id: actor.id.clone(),
            payer,
            mode,
            endpoint,
            recipients: batch.accepted,
            body,
            units,
            pricing,
            request_snapshot,
            rejected: batch.rejected,
        };
        self.settle(pending, result).await
    }

    /// Send an individual body to each recipient in one upstream call.
    ///
    /// Repeated recipients keep their first body.
    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn send_multi(
        &self,
        actor: &Tenant,
        request: MultiSendRequest,
    ) -> Result<DispatchResult, GatewayError> {
        if request.messages.iter().any(|m| m.message.trim().is_empty()) {
            return Err(GatewayError::Validation("message is empty".into()));
        }

        let (payer, mode) = self.authorize(actor, request.on_behalf_of.as_deref()).await?;
        let dial = request.country_code.as_deref().unwrap_or(&self.default_dial);

        let mut accepted: Vec<SingleMessage> = Vec::with_capacity(request.messages.len());
        let mut rejected = Vec::new();
        for entry in request.messages {
            match normalize(&entry.recipient, dial) {
                Ok(number) if accepted.iter().any(|m| m.recipient == number) => {}
                Ok(number) => accepted.push(SingleMessage {
                    recipient: number,
                    message: entry.message.trim().to_string(),
                }),
                Err(_) => rejected.push(entry.recipient),
            }
        }
        if accepted.is_empty() {
            return Err(GatewayError::InvalidRecipients { rejected });
        }

        let units = accepted.len() as u64;
        self.preflight(&payer, units).await?;
        let pricing = self.pricing_for(&payer, mode).await?;

        let request_snapshot = serde_json::to_value(&accepted).unwrap_or_default();
        let result = self
            .call_provider(self.provider.send_bulk_multi(&accepted))
            .await;

        let pending = PendingSend {
            actor_id: actor.id.clone(),
            payer,
            mode,
            endpoint: SendEndpoint::BulkMulti,
            recipients: accepted.iter().map(|m| m.recipient.clone()).collect(),
            body: accepted[0].message.clone(),
            units,
            pricing,
            request_snapshot,
            rejected,
        };
        self.settle(pending, result).await
    }

    /// Record and charge according to the provider's answer.
    async fn settle(
        &self,
        pending: PendingSend,
        result: Result<SendReceipt, ProviderError>,
    ) -> Result<DispatchResult, GatewayError> {
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(ProviderError::Timeout) => {
                let (record, rejected) = pending.into_record(OutboundStatus::Unknown, None);
                warn!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    "Provider timed out, send outcome unknown"
                );
                self.store.insert_outbound(record.clone()).await?;
                return Ok(DispatchResult {
                    outcome: DispatchOutcome::Unknown,
                    record,
                    rejected,
                });
            }
            Err(e) => {
                warn!(tenant_id = %pending.payer.id, "Provider refused send: {}", e);
                return Err(e.into());
            }
        };

        let status = match OutboundStatus::from_provider(&receipt.status) {
            OutboundStatus::Unknown => OutboundStatus::Sent,
            status => status,
        };

        if status == OutboundStatus::Failed {
            let (record, rejected) = pending.into_record(status, Some(&receipt));
            self.store.insert_outbound(record.clone()).await?;
            return Ok(DispatchResult {
                outcome: DispatchOutcome::Failed {
                    provider_status: receipt.status,
                },
                record,
                rejected,
            });
        }

        let mut pending = pending;
        if let Some(units) = receipt.units.filter(|u| *u > 0) {
            pending.units = units;
        }
        let (mut record, rejected) = pending.into_record(status, Some(&receipt));

        if let Err(e) = self.store.insert_outbound(record.clone()).await {
            error!(
                external_id = %receipt.message_id,
                tenant_id = %record.tenant_id,
                "Provider accepted a send that could not be recorded: {}",
                e
            );
            return Err(e.into());
        }

        let outcome = match self.charge(&record).await {
            Ok(new_balance) => {
                info!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    units = record.units,
                    new_balance,
                    "Outbound send charged"
                );
                DispatchOutcome::Sent { new_balance }
            }
            Err(e) => {
                warn!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    "Send accepted upstream but charge failed: {}",
                    e
                );
                let reason = e.to_string();
                record.status = OutboundStatus::ChargeFailed;
                record.charge_error = Some(reason.clone());
                record.updated_at = Utc::now();
                self.store.update_outbound(record.clone()).await?;
                DispatchOutcome::ChargeFailed { reason }
            }
        };

        Ok(DispatchResult {
            outcome,
            record,
            rejected,
        })
    }

    /// Ask the provider for a record's current status and charge it if it
    /// has newly become chargeable.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn refresh_status(
        &self,
        actor: &Tenant,
        record_id: &str,
    ) -> Result<OutboundMessageRecord, GatewayError> {
        let mut record = self.get_record(actor, record_id).await?;

        let external_id = record.external_id.clone().ok_or_else(|| {
            GatewayError::Validation(format!(
                "record {} has no provider message id; an operator must resolve it",
                record_id
            ))
        })?;

        let receipt = self
            .call_provider(self.provider.message_status(&external_id))
            .await?;

        let previous = record.status;
        let reported = OutboundStatus::from_provider(&receipt.status);

        record.provider_status = Some(receipt.status.clone());
        record.response_snapshot = serde_json::to_value(&receipt).ok();
        record.updated_at = Utc::now();
        if previous != OutboundStatus::ChargeFailed && reported != OutboundStatus::Unknown {
            record.status = reported;
        }

        if !previous.is_chargeable() && record.status.is_chargeable() {
            match self.charge(&record).await {
                Ok(new_balance) => info!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    new_balance,
                    "Charged on status refresh"
                ),
                Err(e) => {
                    warn!(record_id = %record.id, "Charge on status refresh failed: {}", e);
                    record.status = OutboundStatus::ChargeFailed;
                    record.charge_error = Some(e.to_string());
                }
            }
        }

        self.store.update_outbound(record.clone()).await?;
        info!(record_id = %record.id, from = %previous, to = %record.status, "Status refreshed");
        Ok(record)
    }

    /// Settle a record left `unknown` by a provider timeout. Operators only.
    ///
    /// The record takes the confirmed status and, when that status is
    /// chargeable, is charged. A record that is no longer unknown is a
    /// conflict.
    #[instrument(skip(self, actor, resolution), fields(actor = %actor.id))]
    pub async fn resolve_unknown(
        &self,
        actor: &Tenant,
        record_id: &str,
        resolution: UnknownResolution,
    ) -> Result<OutboundMessageRecord, GatewayError> {
        if actor.role != Role::Operator {
            return Err(GatewayError::Forbidden(
                "only operators can resolve unknown sends".into(),
            ));
        }
        if matches!(
            resolution.status,
            OutboundStatus::Unknown | OutboundStatus::ChargeFailed
        ) {
            return Err(GatewayError::Validation(format!(
                "cannot resolve to {}",
                resolution.status
            )));
        }

        let mut record = self
            .store
            .get_outbound(record_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("message {}", record_id)))?;
        if record.status != OutboundStatus::Unknown {
            return Err(GatewayError::Conflict(format!(
                "message {} is {}, not unknown",
                record_id, record.status
            )));
        }

        if let Some(external_id) = resolution.external_id.filter(|id| !id.trim().is_empty()) {
            record.external_id = Some(external_id.trim().to_string());
        }
        record.status = resolution.status;
        record.updated_at = Utc::now();

        if record.status.is_chargeable() {
            match self.charge(&record).await {
                Ok(new_balance) => info!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    new_balance,
                    "Charged on manual resolution"
                ),
                Err(e) => {
                    warn!(record_id = %record.id, "Charge on manual resolution failed: {}", e);
                    record.status = OutboundStatus::ChargeFailed;
                    record.charge_error = Some(e.to_string());
                }
            }
        }

        self.store.update_outbound(record.clone()).await?;
        info!(record_id = %record.id, to = %record.status, "Unknown send resolved");
        Ok(record)
    }

    /// Debit the payer for `record`. A charge already in the ledger for it
    /// counts as paid and reports the current balance.
    async fn charge(&self, record: &OutboundMessageRecord) -> Result<u64, LedgerError> {
        match self
            .ledger
            .debit(&record.tenant_id, record.units, Some(&record.id))
            .await
        {
            Err(LedgerError::AlreadyCharged(_)) => {
                debug!(record_id = %record.id, "Record already charged");
                self.ledger.balance(&record.tenant_id).await
            }
            other => other,
        }
    }

    /// A record visible to `actor`: its payer, its sender, or any operator.
    pub async fn get_record(
        &self,
        actor: &Tenant,
        record_id: &str,
    ) -> Result<OutboundMessageRecord, GatewayError> {
        match self.store.get_outbound(record_id).await? {
            Some(record)
                if actor.role == Role::Operator
                    || record.tenant_id == actor.id
                    || record.actor_id == actor.id =>
            {
                Ok(record)
            }
            _ => Err(GatewayError::NotFound(format!("message {}", record_id))),
        }
    }

    /// Records paid for by `tenant`.
    pub async fn history(&self, tenant: &Tenant) -> Result<Vec<OutboundMessageRecord>, GatewayError> {
        Ok(self.store.list_outbound(Some(&tenant.id)).await?)
    }
}
