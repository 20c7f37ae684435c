//! Token storage and resolution.
//!
//! [`TokenRepository`] is the persistence seam (Postgres or in-memory).
//! [`TokenStore`] sits on top of it and owns the codec, scope validation,
//! ownership checks, the resolution cache and the storage timeout.

pub mod memory;
pub mod postgres;

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::codec;
use crate::models::scope::ScopeModel;
use crate::models::token::{IssuedToken, NewTokenRequest, Token, TokenRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token not found")]
    NotFound,

    #[error("token belongs to another owner")]
    Forbidden,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("cannot regenerate a revoked token")]
    Revoked,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Persistence collaborator for token records. Implementations must allow
/// unlimited concurrent readers and serialize writes per record only.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// All records sharing a lookup prefix. Usually zero or one.
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<TokenRecord>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TokenRecord>, StoreError>;

    /// Set `revoked_at` if still unset. Returns the record as stored afterwards.
    async fn mark_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenRecord>, StoreError>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Swap in a new secret, reset `last_used_at`. Refuses revoked records.
    async fn replace_secret(
        &self,
        id: Uuid,
        prefix: &str,
        digest: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<TokenRecord>, StoreError>;

    async fn set_allowed_ips(
        &self,
        id: Uuid,
        allowed_ips: Option<Vec<String>>,
    ) -> Result<Option<TokenRecord>, StoreError>;
}

/// Issuance limits taken from config.
#[derive(Debug, Clone)]
pub struct IssuePolicy {
    pub max_expiry_days: i64,
    pub allow_non_expiring: bool,
    pub cache_ttl_secs: u64,
    pub timeout: Duration,
}

impl Default for IssuePolicy {
    fn default() -> Self {
        Self {
            max_expiry_days: 365,
            allow_non_expiring: false,
            cache_ttl_secs: 300,
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    scopes: Arc<ScopeModel>,
    cache: TieredCache,
    policy: IssuePolicy,
    /// Bumped by every eviction. A resolution that saw a different value
    /// before its repository read must not leave its result in the cache.
    evictions: Arc<AtomicU64>,
}

fn cache_key(digest: &str) -> String {
    format!("token_cache:{}", digest)
}

impl TokenStore {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        scopes: Arc<ScopeModel>,
        cache: TieredCache,
        policy: IssuePolicy,
    ) -> Self {
        Self {
            repo,
            scopes,
            cache,
            policy,
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn scope_model(&self) -> &ScopeModel {
        &self.scopes
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Run a repository call under the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.policy.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::error!(op = op, timeout_ms = self.policy.timeout.as_millis() as u64, "token repository timed out");
                Err(StoreError::Unavailable(format!("{} timed out", op)))
            }
        }
    }

    /// Issue a new token. The plaintext secret is returned here and nowhere else.
    pub async fn create(
        &self,
        owner_id: &str,
        req: NewTokenRequest,
    ) -> Result<IssuedToken, StoreError> {
        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(StoreError::Invalid(
                "name must be between 1 and 100 characters".into(),
            ));
        }
        if req.scopes.is_empty() {
            return Err(StoreError::Invalid("at least one scope is required".into()));
        }
        let scopes = self
            .scopes
            .validate_all(&req.scopes)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let allowed_ips = normalize_ips(req.allowed_ips)?;

        let now = Utc::now();
        let expires_at = self.expiry_from(now, req.expires_in_days)?;

        let generated = codec::generate();
        let record = TokenRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            lookup_prefix: generated.prefix.clone(),
            secret_digest: generated.digest.clone(),
            scopes: scopes.into_iter().map(String::from).collect(),
            allowed_ips,
            created_at: now,
            expires_at,
            revoked_at: None,
            last_used_at: None,
        };

        self.bounded("insert", self.repo.insert(&record)).await?;
        tracing::info!(
            token_id = %record.id,
            owner_id = owner_id,
            prefix = %record.lookup_prefix,
            scopes = ?record.scopes,
            "token created"
        );

        Ok(IssuedToken {
            meta: record.into(),
            token: generated.secret.to_string(),
        })
    }

    fn expiry_from(
        &self,
        now: DateTime<Utc>,
        days: Option<i64>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        match days {
            Some(d) if (1..=self.policy.max_expiry_days).contains(&d) => {
                Ok(Some(now + chrono::Duration::days(d)))
            }
            Some(_) => Err(StoreError::Invalid(format!(
                "expires_in_days must be between 1 and {}",
                self.policy.max_expiry_days
            ))),
            None if self.policy.allow_non_expiring => Ok(None),
            None => Err(StoreError::Invalid("expires_in_days is required".into())),
        }
    }

    /// Resolve a presented secret. Malformed credentials are indistinguishable
    /// from unknown ones to the caller.
    pub async fn resolve(&self, presented: &str) -> Result<Token, StoreError> {
        let (prefix, digest) = match (codec::prefix_of(presented), codec::digest(presented)) {
            (Ok(p), Ok(d)) => (p, d),
            _ => {
                tracing::debug!("malformed credential presented");
                return Err(StoreError::NotFound);
            }
        };

        let key = cache_key(&digest);
        if let Some(token) = self.cache.get::<Token>(&key).await {
            if !token.is_expired_at(Utc::now()) {
                return Ok(token);
            }
            self.evict(&digest).await;
        }

        let epoch = self.evictions.load(Ordering::SeqCst);
        let candidates = self
            .bounded("find_by_prefix", self.repo.find_by_prefix(prefix))
            .await?;
        if candidates.len() > 1 {
            tracing::debug!(prefix = prefix, candidates = candidates.len(), "prefix collision");
        }

        let record = candidates
            .into_iter()
            .find(|c| codec::verify(presented, &c.secret_digest))
            .ok_or(StoreError::NotFound)?;

        let token: Token = record.into();
        if self.policy.cache_ttl_secs > 0 && !token.is_revoked() {
            self.cache_resolved(&key, &token, epoch).await;
        }
        Ok(token)
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Token, StoreError> {
        let record = self
            .bounded("get", self.repo.get(id))
            .await?
            .ok_or(StoreError::NotFound)?;
        // Other owners' tokens are reported as missing on read paths.
        if record.owner_id != owner_id {
            return Err(StoreError::NotFound);
        }
        Ok(record.into())
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Token>, StoreError> {
        let records = self
            .bounded("list_by_owner", self.repo.list_by_owner(owner_id))
            .await?;
        Ok(records.into_iter().map(Token::from).collect())
    }

    /// Revoke a token. Only its owner may do so; repeating is a no-op.
    pub async fn revoke(&self, id: Uuid, owner_id: &str) -> Result<Token, StoreError> {
        let record = self.owned_record(id, owner_id).await?;
        let updated = self
            .bounded("mark_revoked", self.repo.mark_revoked(id, Utc::now()))
            .await?
            .ok_or(StoreError::NotFound)?;
        self.evict(&record.secret_digest).await;
        tracing::info!(token_id = %id, owner_id = owner_id, "token revoked");
        Ok(updated.into())
    }

    /// Issue a new secret for an existing token, keeping id, name and scopes.
    pub async fn regenerate(
        &self,
        id: Uuid,
        owner_id: &str,
        expires_in_days: Option<i64>,
    ) -> Result<IssuedToken, StoreError> {
        let record = self.owned_record(id, owner_id).await?;
        if record.revoked_at.is_some() {
            return Err(StoreError::Revoked);
        }

        let now = Utc::now();
        let expires_at = match expires_in_days {
            Some(_) => self.expiry_from(now, expires_in_days)?,
            None => record.expires_at,
        };

        let generated = codec::generate();
        let updated = self
            .bounded(
                "replace_secret",
                self.repo.replace_secret(
                    id,
                    &generated.prefix,
                    &generated.digest,
                    now,
                    expires_at,
                ),
            )
            .await?
            .ok_or(StoreError::Revoked)?;
        self.evict(&record.secret_digest).await;
        tracing::info!(token_id = %id, prefix = %updated.lookup_prefix, "token regenerated");

        Ok(IssuedToken {
            meta: updated.into(),
            token: generated.secret.to_string(),
        })
    }

    /// Replace the source-address allowlist. An empty list clears it.
    pub async fn update_allowed_ips(
        &self,
        id: Uuid,
        owner_id: &str,
        allowed_ips: Option<Vec<String>>,
    ) -> Result<Token, StoreError> {
        let record = self.owned_record(id, owner_id).await?;
        let allowed_ips = normalize_ips(allowed_ips)?;
        let updated = self
            .bounded("set_allowed_ips", self.repo.set_allowed_ips(id, allowed_ips))
            .await?
            .ok_or(StoreError::NotFound)?;
        self.evict(&record.secret_digest).await;
        Ok(updated.into())
    }

    /// Best-effort `last_used_at` bump, detached from the request.
    pub fn touch_last_used(&self, id: Uuid) {
        let repo = self.repo.clone();
        let timeout = self.policy.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, repo.touch_last_used(id, Utc::now())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(token_id = %id, "failed to update last_used_at: {}", e),
                Err(_) => tracing::warn!(token_id = %id, "last_used_at update timed out"),
            }
        });
    }

    async fn owned_record(&self, id: Uuid, owner_id: &str) -> Result<TokenRecord, StoreError> {
        let record = self
            .bounded("get", self.repo.get(id))
            .await?
            .ok_or(StoreError::NotFound)?;
        if record.owner_id != owner_id {
            tracing::warn!(token_id = %id, owner_id = owner_id, "token owned by another principal");
            return Err(StoreError::Forbidden);
        }
        Ok(record)
    }

    /// Cache a resolved token unless an eviction raced the read. The epoch is
    /// checked again after the write: an eviction landing in between may
    /// already have run its invalidate, so the entry is dropped here instead.
    async fn cache_resolved(&self, key: &str, token: &Token, epoch: u64) {
        if self.evictions.load(Ordering::SeqCst) != epoch {
            tracing::debug!(token_id = %token.id, "token changed during resolution, not cached");
            return;
        }
        if let Err(e) = self.cache.set(key, token, self.policy.cache_ttl_secs).await {
            tracing::warn!(token_id = %token.id, "failed to cache token: {}", e);
            return;
        }
        if self.evictions.load(Ordering::SeqCst) != epoch {
            if let Err(e) = self.cache.invalidate(key).await {
                tracing::warn!("failed to invalidate token cache: {}", e);
            }
        }
    }

    /// Call only after the repository write has landed.
    async fn evict(&self, digest: &str) {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.cache.invalidate(&cache_key(digest)).await {
            tracing::warn!("failed to invalidate token cache: {}", e);
        }
    }
}

fn normalize_ips(ips: Option<Vec<String>>) -> Result<Option<Vec<String>>, StoreError> {
    let Some(ips) = ips else {
        return Ok(None);
    };
    if ips.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(ips.len());
    for raw in ips {
        let ip: IpAddr = raw
            .trim()
            .parse()
            .map_err(|_| StoreError::Invalid(format!("invalid IP address '{}'", raw)))?;
        let ip = ip.to_string();
        if !out.contains(&ip) {
            out.push(ip);
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn store_with(policy: IssuePolicy) -> (TokenStore, Arc<MemoryStore>) {
        let repo = Arc::new(MemoryStore::new());
        let store = TokenStore::new(
            repo.clone(),
            Arc::new(ScopeModel::builtin()),
            TieredCache::local_only(),
            policy,
        );
        (store, repo)
    }

    fn request(scopes: &[&str]) -> NewTokenRequest {
        NewTokenRequest {
            name: "ci".into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_in_days: Some(30),
            allowed_ips: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_resolve_is_stable() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();
        assert!(issued.token.starts_with(codec::TOKEN_TAG));

        let a = store.resolve(&issued.token).await.unwrap();
        let b = store.resolve(&issued.token).await.unwrap();
        assert_eq!(a.id, issued.meta.id);
        assert_eq!(a, b);
        assert_eq!(a.scopes, vec!["fcs:read"]);
    }

    #[tokio::test]
    async fn test_no_stored_field_equals_secret() {
        let (store, repo) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();
        let record = repo.get(issued.meta.id).await.unwrap().unwrap();
        for field in [&record.name, &record.lookup_prefix, &record.secret_digest, &record.owner_id] {
            assert_ne!(field, &issued.token);
        }
        assert!(codec::verify(&issued.token, &record.secret_digest));
    }

    #[tokio::test]
    async fn test_last_char_mutation_not_found() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();
        let last = issued.token.as_bytes()[issued.token.len() - 1];
        for bit in 0..8 {
            let mut bytes = issued.token.clone().into_bytes();
            let idx = bytes.len() - 1;
            bytes[idx] = last ^ (1 << bit);
            let Ok(mutated) = String::from_utf8(bytes) else { continue };
            assert!(matches!(store.resolve(&mutated).await, Err(StoreError::NotFound)));
        }
    }

    #[tokio::test]
    async fn test_malformed_is_not_found() {
        let (store, _) = store_with(IssuePolicy::default());
        assert!(matches!(store.resolve("pat_short").await, Err(StoreError::NotFound)));
        assert!(matches!(store.resolve("").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_scope_and_expiry() {
        let (store, _) = store_with(IssuePolicy::default());
        assert!(matches!(
            store.create("alice", request(&["fcs:admin"])).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.create("alice", request(&[])).await,
            Err(StoreError::Invalid(_))
        ));

        let mut req = request(&["fcs:read"]);
        req.expires_in_days = None;
        assert!(matches!(store.create("alice", req).await, Err(StoreError::Invalid(_))));

        let mut req = request(&["fcs:read"]);
        req.expires_in_days = Some(366);
        assert!(matches!(store.create("alice", req).await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_non_expiring_when_enabled() {
        let (store, _) = store_with(IssuePolicy {
            allow_non_expiring: true,
            ..IssuePolicy::default()
        });
        let mut req = request(&["fcs:read"]);
        req.expires_in_days = None;
        let issued = store.create("alice", req).await.unwrap();
        assert!(issued.meta.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_scopes_stored_verbatim() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store
            .create("alice", request(&["workspaces:admin", "fcs:read", "workspaces:admin"]))
            .await
            .unwrap();
        assert_eq!(issued.meta.scopes, vec!["workspaces:admin", "fcs:read"]);
    }

    #[tokio::test]
    async fn test_revoke_requires_owner() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();

        assert!(matches!(
            store.revoke(issued.meta.id, "mallory").await,
            Err(StoreError::Forbidden)
        ));
        assert!(matches!(
            store.revoke(Uuid::new_v4(), "alice").await,
            Err(StoreError::NotFound)
        ));

        let first = store.revoke(issued.meta.id, "alice").await.unwrap();
        let again = store.revoke(issued.meta.id, "alice").await.unwrap();
        assert!(first.revoked_at.is_some());
        assert_eq!(first.revoked_at, again.revoked_at);

        // cache was invalidated: resolution sees the revocation
        let resolved = store.resolve(&issued.token).await.unwrap();
        assert!(resolved.is_revoked());
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_secret() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();
        store.resolve(&issued.token).await.unwrap();

        let renewed = store.regenerate(issued.meta.id, "alice", None).await.unwrap();
        assert_eq!(renewed.meta.id, issued.meta.id);
        assert_eq!(renewed.meta.expires_at, issued.meta.expires_at);
        assert_ne!(renewed.token, issued.token);

        assert!(matches!(store.resolve(&issued.token).await, Err(StoreError::NotFound)));
        assert_eq!(store.resolve(&renewed.token).await.unwrap().id, issued.meta.id);

        store.revoke(issued.meta.id, "alice").await.unwrap();
        assert!(matches!(
            store.regenerate(issued.meta.id, "alice", None).await,
            Err(StoreError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_allowed_ips_normalized() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();

        let t = store
            .update_allowed_ips(
                issued.meta.id,
                "alice",
                Some(vec![" 127.0.0.1".into(), "127.0.0.1".into(), "::1".into()]),
            )
            .await
            .unwrap();
        assert_eq!(t.allowed_ips, Some(vec!["127.0.0.1".to_string(), "::1".to_string()]));

        let t = store
            .update_allowed_ips(issued.meta.id, "alice", Some(vec![]))
            .await
            .unwrap();
        assert!(t.allowed_ips.is_none());

        assert!(matches!(
            store
                .update_allowed_ips(issued.meta.id, "alice", Some(vec!["not-an-ip".into()]))
                .await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_get_scoped_to_owner() {
        let (store, _) = store_with(IssuePolicy::default());
        let a = store.create("alice", request(&["fcs:read"])).await.unwrap();
        store.create("bob", request(&["fcs:read"])).await.unwrap();

        assert_eq!(store.list("alice").await.unwrap().len(), 1);
        assert!(store.get("alice", a.meta.id).await.is_ok());
        assert!(matches!(store.get("bob", a.meta.id).await, Err(StoreError::NotFound)));
    }

    /// Delays prefix lookups so a write can land while a read is in flight.
    struct SlowLookups {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl TokenRepository for SlowLookups {
        async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }

        async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<TokenRecord>, StoreError> {
            let found = self.inner.find_by_prefix(prefix).await;
            tokio::time::sleep(self.delay).await;
            found
        }

        async fn get(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
            self.inner.list_by_owner(owner_id).await
        }

        async fn mark_revoked(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Option<TokenRecord>, StoreError> {
            self.inner.mark_revoked(id, at).await
        }

        async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.touch_last_used(id, at).await
        }

        async fn replace_secret(
            &self,
            id: Uuid,
            prefix: &str,
            digest: &str,
            created_at: DateTime<Utc>,
            expires_at: Option<DateTime<Utc>>,
        ) -> Result<Option<TokenRecord>, StoreError> {
            self.inner
                .replace_secret(id, prefix, digest, created_at, expires_at)
                .await
        }

        async fn set_allowed_ips(
            &self,
            id: Uuid,
            allowed_ips: Option<Vec<String>>,
        ) -> Result<Option<TokenRecord>, StoreError> {
            self.inner.set_allowed_ips(id, allowed_ips).await
        }
    }

    #[tokio::test]
    async fn test_revoke_during_resolve_is_not_cached_stale() {
        let repo = Arc::new(SlowLookups {
            inner: Arc::new(MemoryStore::new()),
            delay: Duration::from_millis(100),
        });
        let store = TokenStore::new(
            repo,
            Arc::new(ScopeModel::builtin()),
            TieredCache::local_only(),
            IssuePolicy::default(),
        );
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();

        let in_flight = {
            let store = store.clone();
            let secret = issued.token.clone();
            tokio::spawn(async move { store.resolve(&secret).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.revoke(issued.meta.id, "alice").await.unwrap();

        // The in-flight read started before the revocation and may return
        // the old view, but it must not outlive the revoke in the cache.
        in_flight.await.unwrap().unwrap();
        assert_eq!(store.cache().local_len(), 0);

        let resolved = store.resolve(&issued.token).await.unwrap();
        assert!(resolved.is_revoked());
    }

    fn colliding_record(prefix: &str, digest: &str, name: &str) -> TokenRecord {
        TokenRecord {
            id: Uuid::new_v4(),
            owner_id: "alice".into(),
            name: name.into(),
            lookup_prefix: prefix.into(),
            secret_digest: digest.into(),
            scopes: vec!["fcs:read".into()],
            allowed_ips: None,
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_picks_candidate_by_digest() {
        let (store, repo) = store_with(IssuePolicy::default());
        let presented = codec::generate();
        let other = codec::generate();

        // Same lookup prefix, different secrets. The decoy is indexed first.
        let decoy = colliding_record(&presented.prefix, &other.digest, "decoy");
        let genuine = colliding_record(&presented.prefix, &presented.digest, "genuine");
        repo.insert(&decoy).await.unwrap();
        repo.insert(&genuine).await.unwrap();
        assert_eq!(repo.find_by_prefix(&presented.prefix).await.unwrap().len(), 2);

        let resolved = store.resolve(presented.secret.as_str()).await.unwrap();
        assert_eq!(resolved.id, genuine.id);
        assert_eq!(resolved.name, "genuine");

        // A secret that matches neither digest is still unknown.
        let mut stranger = presented.prefix.clone();
        stranger.push_str(&other.secret.as_str()[codec::PREFIX_LEN..]);
        assert!(matches!(store.resolve(&stranger).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_evicted_and_refreshed() {
        let (store, _) = store_with(IssuePolicy::default());
        let issued = store.create("alice", request(&["fcs:read"])).await.unwrap();
        let digest = codec::digest(&issued.token).unwrap();

        let mut stale = issued.meta.clone();
        stale.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.cache().set(&cache_key(&digest), &stale, 300).await.unwrap();

        let resolved = store.resolve(&issued.token).await.unwrap();
        assert_eq!(resolved.expires_at, issued.meta.expires_at);
        assert_eq!(store.evictions.load(Ordering::SeqCst), 1);

        let cached: Token = store.cache().get(&cache_key(&digest)).await.unwrap();
        assert_eq!(cached.expires_at, issued.meta.expires_at);
    }
}
