use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted token record. Carries the digest, so it only travels between
/// the store and its repository; everything else sees [`Token`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub lookup_prefix: String,
    pub secret_digest: String,
    pub scopes: Vec<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Public view of a token. Never contains the secret or its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub token_prefix: String,
    pub scopes: Vec<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Strictly past `expires_at`; a token is still valid at the exact instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| now > exp)
    }
}

impl From<TokenRecord> for Token {
    fn from(r: TokenRecord) -> Self {
        Token {
            id: r.id,
            owner_id: r.owner_id,
            name: r.name,
            token_prefix: r.lookup_prefix,
            scopes: r.scopes,
            allowed_ips: r.allowed_ips,
            created_at: r.created_at,
            expires_at: r.expires_at,
            revoked_at: r.revoked_at,
            last_used_at: r.last_used_at,
        }
    }
}

/// Owner request to issue a token.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTokenRequest {
    pub name: String,
    pub scopes: Vec<String>,
    /// `None` asks for a never-expiring token, which must be enabled in config.
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
}

/// Creation result. `token` is the only copy of the plaintext credential
/// that ever leaves the store.
#[derive(Serialize)]
pub struct IssuedToken {
    #[serde(flatten)]
    pub meta: Token,
    pub token: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("meta", &self.meta)
            .field("token", &"<redacted>")
            .finish()
    }
}
