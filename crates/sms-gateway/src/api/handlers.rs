//! HTTP request handlers.

use super::auth::{hash_api_key, AuthenticatedTenant};
use super::types::*;
use super::AppState;
use crate::dispatch::{DispatchResult, MultiSendRequest, SendRequest, UnknownResolution};
use crate::error::GatewayError;
use crate::phone::normalize;
use crate::routing::InboundPayload;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use sms_store::{InboundMessage, OutboundMessageRecord, PoolKey, Role, Tenant};
use tracing::info;

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Provider push. The secret may come as a header or a `secret` query
/// parameter.
pub async fn receive_inbound(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    Json(payload): Json<InboundPayload>,
) -> Result<Json<IngestResponse>, GatewayError> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.secret.as_deref());
    state.inbound.verify_secret(presented)?;

    let outcome = state.inbound.ingest(payload).await?;

    Ok(Json(IngestResponse {
        id: outcome.message.id,
        tenant_id: outcome.message.tenant_id,
        routed_by: outcome.message.routed_by,
        duplicate: !outcome.created,
    }))
}

/// Tenant inbox poll.
pub async fn list_inbound(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Query(query): Query<InboxQuery>,
) -> Result<Json<InboxResponse>, GatewayError> {
    let messages = state.inbound.list(&tenant, query.unread).await?;
    let total = messages.len();
    Ok(Json(InboxResponse { messages, total }))
}

pub async fn mark_inbound_read(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
) -> Result<Json<InboundMessage>, GatewayError> {
    Ok(Json(state.inbound.mark_read(&tenant, &id).await?))
}

pub async fn delete_inbound(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    state.inbound.delete(&tenant, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send one body to one or more recipients.
pub async fn send_message(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<SendRequest>,
) -> Result<Json<DispatchResult>, GatewayError> {
    Ok(Json(state.dispatcher.send(&tenant, request).await?))
}

/// Send individual bodies in one upstream call.
pub async fn send_multi(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<MultiSendRequest>,
) -> Result<Json<DispatchResult>, GatewayError> {
    Ok(Json(state.dispatcher.send_multi(&tenant, request).await?))
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
) -> Result<Json<OutboundListResponse>, GatewayError> {
    let messages = state.dispatcher.history(&tenant).await?;
    let total = messages.len();
    Ok(Json(OutboundListResponse { messages, total }))
}

pub async fn get_message(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
) -> Result<Json<OutboundMessageRecord>, GatewayError> {
    Ok(Json(state.dispatcher.get_record(&tenant, &id).await?))
}

/// Post-hoc provider status check.
pub async fn refresh_message(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
) -> Result<Json<OutboundMessageRecord>, GatewayError> {
    Ok(Json(state.dispatcher.refresh_status(&tenant, &id).await?))
}

pub async fn get_balance(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
) -> Result<Json<BalanceResponse>, GatewayError> {
    let balance = state.ledger.balance(&tenant.id).await?;

    let pool_key = match (tenant.role, &tenant.group_id) {
        (Role::Operator, _) => Some(PoolKey::Operator),
        (Role::GroupLead, Some(group_id)) => Some(PoolKey::Group(group_id.clone())),
        _ => None,
    };
    let pool = match pool_key {
        Some(key) => Some(state.store.get_pool(&key).await?),
        None => None,
    };

    Ok(Json(BalanceResponse {
        tenant_id: tenant.id,
        balance,
        pool,
    }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
) -> Result<Json<TransactionsResponse>, GatewayError> {
    let transactions = state.ledger.history(&tenant.id).await?;
    let total = transactions.len();
    Ok(Json(TransactionsResponse {
        transactions,
        total,
    }))
}

// Administration

/// Create a tenant. Receiving numbers are normalized; a group-lead without
/// a group leads a group named after itself.
pub async fn create_tenant(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<TenantResponse>), GatewayError> {
    auth.require_operator()?;

    let id = request.id.trim().to_string();
    if id.is_empty() || request.api_key.trim().is_empty() {
        return Err(GatewayError::Validation("id and api_key are required".into()));
    }

    let mut tenant = Tenant::new(id, request.role, request.initial_balance)
        .with_api_key_hash(hash_api_key(request.api_key.trim()))
        .with_rate_limit(request.rate_limit);

    tenant.group_id = match (request.role, request.group_id) {
        (_, Some(group_id)) => Some(group_id),
        (Role::GroupLead, None) => Some(tenant.id.clone()),
        _ => None,
    };
    if let Some(label) = request.business_label.filter(|l| !l.trim().is_empty()) {
        tenant = tenant.with_business_label(label.trim());
    }
    for raw in &request.receiving_numbers {
        let number = normalize(raw, &state.default_dial)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        tenant = tenant.with_receiving_number(number);
    }
    tenant.delivery_mode = request.delivery_mode;
    tenant.forward_url = request.forward_url;
    tenant.signing_secret = request.signing_secret;

    if tenant.delivery_mode.wants_push() && tenant.forward_url.is_none() {
        return Err(GatewayError::Validation(
            "push delivery needs a forward_url".into(),
        ));
    }

    let tenant = state.store.insert_tenant(tenant).await?;
    if tenant.balance > 0 {
        state.ledger.reconcile_pools().await?;
    }

    info!(tenant_id = %tenant.id, role = %tenant.role, "Tenant created");
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

pub async fn admin_credit(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
    Json(request): Json<CreditRequest>,
) -> Result<Json<BalanceChangeResponse>, GatewayError> {
    auth.require_operator()?;

    let balance = state
        .ledger
        .credit(&request.tenant_id, request.amount, request.note.as_deref())
        .await?;

    Ok(Json(BalanceChangeResponse {
        tenant_id: request.tenant_id,
        balance,
    }))
}

pub async fn admin_adjust(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<BalanceChangeResponse>, GatewayError> {
    auth.require_operator()?;

    let balance = state
        .ledger
        .adjust(&request.tenant_id, request.delta, request.note.as_deref())
        .await?;

    Ok(Json(BalanceChangeResponse {
        tenant_id: request.tenant_id,
        balance,
    }))
}

/// Group-lead funds a client in its group.
pub async fn admin_transfer(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(request): Json<TransferRequest>,
) -> Result<Json<credit_ledger::TransferReceipt>, GatewayError> {
    Ok(Json(
        state
            .ledger
            .transfer(&tenant.id, &request.to, request.amount)
            .await?,
    ))
}

/// Run both reconciliation passes now.
pub async fn admin_reconcile(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
) -> Result<Json<ReconcileResponse>, GatewayError> {
    auth.require_operator()?;

    let report = state.ledger.reconcile().await?;
    let pools = state.ledger.reconcile_pools().await?;

    Ok(Json(ReconcileResponse { report, pools }))
}

pub async fn admin_completeness(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
    Path(tenant_id): Path<String>,
) -> Result<Json<credit_ledger::CompletenessCheck>, GatewayError> {
    auth.require_operator()?;
    Ok(Json(state.ledger.verify_completeness(&tenant_id).await?))
}

pub async fn admin_unassigned(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
) -> Result<Json<InboxResponse>, GatewayError> {
    auth.require_operator()?;

    let messages = state.inbound.unassigned().await?;
    let total = messages.len();
    Ok(Json(InboxResponse { messages, total }))
}

pub async fn admin_assign_inbound(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<InboundMessage>, GatewayError> {
    Ok(Json(
        state
            .inbound
            .repair_assignment(&tenant, &id, request.tenant_id)
            .await?,
    ))
}

/// Settle a timed-out send with the outcome confirmed at the provider.
pub async fn admin_resolve_message(
    State(state): State<AppState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Path(id): Path<String>,
    Json(resolution): Json<UnknownResolution>,
) -> Result<Json<OutboundMessageRecord>, GatewayError> {
    Ok(Json(
        state
            .dispatcher
            .resolve_unknown(&tenant, &id, resolution)
            .await?,
    ))
}

/// Recent routing decisions, newest first.
pub async fn admin_routing_recent(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
) -> Result<Json<RoutingRecentResponse>, GatewayError> {
    auth.require_operator()?;

    let events = state.inbound.resolver().diagnostics().recent().await;
    Ok(Json(RoutingRecentResponse { events }))
}

pub async fn admin_list_aliases(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
) -> Result<Json<AliasesResponse>, GatewayError> {
    auth.require_operator()?;

    let aliases = state
        .inbound
        .resolver()
        .aliases()
        .await?
        .into_iter()
        .map(|(from, to)| AliasEntry { from, to })
        .collect();
    Ok(Json(AliasesResponse { aliases }))
}

/// Alias endpoints are normalized like inbound receivers.
pub async fn admin_set_alias(
    State(state): State<AppState>,
    auth: AuthenticatedTenant,
    Json(request): Json<AliasRequest>,
) -> Result<StatusCode, GatewayError> {
    auth.require_operator()?;

    let from = crate::phone::normalize_or_trim(&request.from, &state.default_dial);
    if from.is_empty() {
        return Err(GatewayError::Validation("alias source is empty".into()));
    }
    let to = request
        .to
        .as_deref()
        .map(|to| crate::phone::normalize_or_trim(to, &state.default_dial))
        .filter(|to| !to.is_empty());

    state
        .inbound
        .resolver()
        .set_alias(&from, to.as_deref())
        .await?;

    info!(from = %from, to = ?to, "Routing alias updated");
    Ok(StatusCode::NO_CONTENT)
}
