//! Tenant authentication by bearer API key.

use super::AppState;
use crate::error::GatewayError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sms_store::{Role, Tenant};

/// Hash an API key using SHA-256. Only the hash is stored.
pub fn hash_api_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// The tenant whose API key authenticated the request.
#[derive(Debug, Clone)]
pub struct AuthenticatedTenant(pub Tenant);

impl AuthenticatedTenant {
    /// Fail unless the caller is an operator.
    pub fn require_operator(&self) -> Result<&Tenant, GatewayError> {
        if self.0.role == Role::Operator {
            Ok(&self.0)
        } else {
            Err(GatewayError::Forbidden("operator only".into()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedTenant {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::Unauthorized("missing bearer API key".into()))?;

        // Disabled tenants are not returned.
        let tenant = state
            .store
            .find_tenant_by_api_key_hash(&hash_api_key(key))
            .await?
            .ok_or_else(|| GatewayError::Unauthorized("invalid API key".into()))?;

        Ok(AuthenticatedTenant(tenant))
    }
}
