//! Shared setup for the API integration suites.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use provider_client::ProviderClient;
use secrecy::SecretString;
use sms_gateway::{
    api::{create_router_with_rate_limit, hash_api_key, AppState, RateLimitState},
    Config,
};
use sms_store::{MemoryStore, Store, Tenant};
use std::sync::Arc;
use std::time::Duration;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

pub struct TestOptions {
    pub provider_url: String,
    pub webhook_secret: Option<String>,
    pub rate_limit: RateLimitState,
}

impl TestOptions {
    /// Provider pointed at a closed port; sends fail with a transport error.
    pub fn offline() -> Self {
        Self::with_provider("http://127.0.0.1:9")
    }

    pub fn with_provider(url: impl Into<String>) -> Self {
        Self {
            provider_url: url.into(),
            webhook_secret: None,
            rate_limit: RateLimitState::permissive(),
        }
    }
}

pub fn test_app(options: TestOptions) -> TestApp {
    let mut config = Config::default();
    config.routing.webhook_secret = options.webhook_secret.map(SecretString::new);
    config.dispatch.provider_timeout = Duration::from_secs(2);
    config.forwarder.timeout = Duration::from_secs(1);

    let store = Arc::new(MemoryStore::new());
    let provider = ProviderClient::with_timeout(
        options.provider_url,
        SecretString::new("provider-key".to_string()),
        Duration::from_secs(2),
    )
    .unwrap();

    let state = AppState::from_config(&config, store.clone(), Arc::new(provider)).unwrap();
    let router = create_router_with_rate_limit(state.clone(), options.rate_limit);

    TestApp {
        router,
        store,
        state,
    }
}

/// Insert `tenant` with `api_key` as its credential.
pub async fn seed(app: &TestApp, tenant: Tenant, api_key: &str) -> Tenant {
    app.store
        .insert_tenant(tenant.with_api_key_hash(hash_api_key(api_key)))
        .await
        .unwrap()
}

pub fn get(uri: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = api_key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json(method: &str, uri: &str, api_key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// A provider push body.
pub fn push(message_id: &str, from: &str, receiver: &str, business: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "from": from,
        "message": "Hello",
        "receiver": receiver,
        "timestamp": "2024-05-01 10:30:00",
        "messageId": message_id,
    });
    if let Some(business) = business {
        body["business"] = serde_json::json!(business);
    }
    body
}
