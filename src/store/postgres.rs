use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{StoreError, TokenRepository};
use crate::middleware::audit::{AuditError, AuditSink};
use crate::models::audit::AuditEntry;
use crate::models::token::TokenRecord;

const TOKEN_COLUMNS: &str = "id, owner_id, name, lookup_prefix, secret_digest, scopes, allowed_ips, created_at, expires_at, revoked_at, last_used_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert(&self, t: &TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO tokens (id, owner_id, name, lookup_prefix, secret_digest, scopes, allowed_ips, created_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(t.id)
        .bind(&t.owner_id)
        .bind(&t.name)
        .bind(&t.lookup_prefix)
        .bind(&t.secret_digest)
        .bind(&t.scopes)
        .bind(&t.allowed_ips)
        .bind(t.created_at)
        .bind(t.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE lookup_prefix = $1",
            TOKEN_COLUMNS
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE owner_id = $1 ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenRecord>, StoreError> {
        // COALESCE keeps the first revocation time on repeat calls.
        let row = sqlx::query_as::<_, TokenRecord>(&format!(
            "UPDATE tokens SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_secret(
        &self,
        id: Uuid,
        prefix: &str,
        digest: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRecord>(&format!(
            r#"UPDATE tokens
               SET lookup_prefix = $2, secret_digest = $3, created_at = $4, expires_at = $5, last_used_at = NULL
               WHERE id = $1 AND revoked_at IS NULL
               RETURNING {}"#,
            TOKEN_COLUMNS
        ))
        .bind(id)
        .bind(prefix)
        .bind(digest)
        .bind(created_at)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_allowed_ips(
        &self,
        id: Uuid,
        allowed_ips: Option<Vec<String>>,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRecord>(&format!(
            "UPDATE tokens SET allowed_ips = $2 WHERE id = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .bind(allowed_ips)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, e: &AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"INSERT INTO audit_logs (id, token_id, timestamp, source_address, method, endpoint, status_code, authorized, reason)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(e.id)
        .bind(e.token_id)
        .bind(e.timestamp)
        .bind(&e.source_address)
        .bind(&e.method)
        .bind(&e.endpoint)
        .bind(e.status_code)
        .bind(e.authorized)
        .bind(&e.reason)
        .execute(&self.pool)
        .await
        .map_err(audit_error)?;
        Ok(())
    }

    async fn entries_for_token(
        &self,
        token_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            r#"SELECT id, token_id, timestamp, source_address, method, endpoint, status_code, authorized, reason
               FROM audit_logs WHERE token_id = $1
               ORDER BY timestamp DESC LIMIT $2"#,
        )
        .bind(token_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(audit_error)?;
        Ok(rows)
    }
}

/// A closed pool means the sink is gone for good; everything else may recover.
fn audit_error(e: sqlx::Error) -> AuditError {
    match e {
        sqlx::Error::PoolClosed | sqlx::Error::Configuration(_) => AuditError::Fatal(e.to_string()),
        other => AuditError::Transient(other.to_string()),
    }
}
