//! HTTP API for the gateway.

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{hash_api_key, AuthenticatedTenant};
pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
pub use types::*;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::forwarder::Forwarder;
use crate::inbound::InboundService;
use crate::routing::{RoutingDiagnostics, TenantResolver};
use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use credit_ledger::CreditLedger;
use provider_client::SmsProvider;
use sms_store::Store;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<CreditLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub inbound: Arc<InboundService>,
    /// Dial code for numbers entered through the admin endpoints
    pub default_dial: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<CreditLedger>,
        dispatcher: Dispatcher,
        inbound: InboundService,
        default_dial: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher: Arc::new(dispatcher),
            inbound: Arc::new(inbound),
            default_dial: default_dial.into(),
        }
    }

    /// Wire every service from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        provider: Arc<dyn SmsProvider>,
    ) -> Result<Self, GatewayError> {
        let dial = config.routing.default_dial_code.clone();

        let ledger = Arc::new(CreditLedger::new(store.clone(), config.ledger.clone()));

        let diagnostics = Arc::new(RoutingDiagnostics::new(
            config.routing.diagnostics_capacity,
        ));
        let resolver = Arc::new(TenantResolver::new(store.clone(), diagnostics));
        let forwarder = Forwarder::new(config.forwarder.timeout)
            .map_err(|e| GatewayError::Internal(format!("forwarder: {}", e)))?;
        let inbound = InboundService::new(
            store.clone(),
            resolver,
            Arc::new(forwarder),
            dial.clone(),
            config.routing.webhook_secret.clone(),
        );

        let dispatcher = Dispatcher::new(
            store.clone(),
            ledger.clone(),
            provider,
            config.dispatch.clone(),
            dial.clone(),
        );

        Ok(Self::new(store, ledger, dispatcher, inbound, dial))
    }
}

/// Create the API router with the default global rate limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(600))
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let api = Router::new()
        // Provider webhook
        .route("/v1/inbound", post(handlers::receive_inbound).get(handlers::list_inbound))
        .route("/v1/inbound/:id", delete(handlers::delete_inbound))
        .route("/v1/inbound/:id/read", post(handlers::mark_inbound_read))
        // Outbound
        .route("/v1/messages", post(handlers::send_message).get(handlers::list_messages))
        .route("/v1/messages/multi", post(handlers::send_multi))
        .route("/v1/messages/:id", get(handlers::get_message))
        .route("/v1/messages/:id/refresh", post(handlers::refresh_message))
        // Ledger
        .route("/v1/balance", get(handlers::get_balance))
        .route("/v1/transactions", get(handlers::list_transactions))
        // Administration
        .route("/v1/admin/tenants", post(handlers::create_tenant))
        .route(
            "/v1/admin/tenants/:id/completeness",
            get(handlers::admin_completeness),
        )
        .route("/v1/admin/credit", post(handlers::admin_credit))
        .route("/v1/admin/adjust", post(handlers::admin_adjust))
        .route("/v1/admin/transfer", post(handlers::admin_transfer))
        .route("/v1/admin/reconcile", post(handlers::admin_reconcile))
        .route("/v1/admin/inbound/unassigned", get(handlers::admin_unassigned))
        .route(
            "/v1/admin/inbound/:id/assign",
            post(handlers::admin_assign_inbound),
        )
        .route(
            "/v1/admin/messages/:id/resolve",
            post(handlers::admin_resolve_message),
        )
        .route("/v1/admin/routing/recent", get(handlers::admin_routing_recent))
        .route(
            "/v1/admin/aliases",
            put(handlers::admin_set_alias).get(handlers::admin_list_aliases),
        )
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
