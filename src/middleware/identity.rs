//! Owner identity for the token-management API.
//!
//! Owners authenticate with an HS256 JWT issued elsewhere. Only verification
//! lives here; the owner id is the `user_id` claim, falling back to `sub`.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: i64,
}

impl OwnerClaims {
    pub fn owner_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct OwnerKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl OwnerKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify signature and expiry, returning the owner id.
    pub fn verify(&self, jwt: &str) -> Result<String, AppError> {
        let data = decode::<OwnerClaims>(jwt, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!("owner JWT rejected: {}", e);
            AppError::Unauthorized
        })?;
        data.claims
            .owner_id()
            .map(str::to_string)
            .ok_or(AppError::Unauthorized)
    }

    /// Mint an owner JWT. Used by tooling and tests; the service itself
    /// never issues these.
    pub fn issue(&self, owner_id: &str, ttl: chrono::Duration) -> anyhow::Result<String> {
        let claims = OwnerClaims {
            user_id: Some(owner_id.to_string()),
            sub: None,
            exp: (Utc::now() + ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

/// `Authorization: Bearer <value>`, scheme matched case-insensitively.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, value) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Verified owner of the current management request.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jwt = bearer(&parts.headers).ok_or(AppError::Unauthorized)?;
        state.owner_keys.verify(jwt).map(Owner)
    }
}
