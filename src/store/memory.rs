//! In-memory backend, used when no `DATABASE_URL` is configured and in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, TokenRepository};
use crate::middleware::audit::{AuditError, AuditSink};
use crate::models::audit::AuditEntry;
use crate::models::token::TokenRecord;

/// Token records keyed by id, plus a prefix index for resolution.
/// DashMap shards give per-record write serialization without a global lock.
#[derive(Default)]
pub struct MemoryStore {
    tokens: DashMap<Uuid, TokenRecord>,
    by_prefix: DashMap<String, Vec<Uuid>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, prefix: &str, id: Uuid) {
        if let Some(mut ids) = self.by_prefix.get_mut(prefix) {
            ids.retain(|i| *i != id);
        }
        self.by_prefix.remove_if(prefix, |_, ids| ids.is_empty());
    }

    pub async fn audit_len(&self) -> usize {
        self.audit.read().await.len()
    }

    /// Every recorded entry, oldest first, including ones with no token.
    pub async fn audit_snapshot(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        match self.tokens.entry(record.id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Invalid(format!("duplicate token id {}", record.id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        self.by_prefix
            .entry(record.lookup_prefix.clone())
            .or_default()
            .push(record.id);
        Ok(())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let ids = match self.by_prefix.get(prefix) {
            Some(ids) => ids.value().clone(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.tokens.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.get(&id).map(|r| r.value().clone()))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let mut out: Vec<TokenRecord> = self
            .tokens
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn mark_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.get_mut(&id).map(|mut r| {
            if r.revoked_at.is_none() {
                r.revoked_at = Some(at);
            }
            r.value().clone()
        }))
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut r) = self.tokens.get_mut(&id) {
            r.last_used_at = Some(at);
        }
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
        let (old_prefix, updated) = {
            let Some(mut r) = self.tokens.get_mut(&id) else {
                return Ok(None);
            };
            if r.revoked_at.is_some() {
                return Ok(None);
            }
            let old_prefix = std::mem::replace(&mut r.lookup_prefix, prefix.to_string());
            r.secret_digest = digest.to_string();
            r.created_at = created_at;
            r.expires_at = expires_at;
            r.last_used_at = None;
            (old_prefix, r.value().clone())
        };

        self.unindex(&old_prefix, id);
        self.by_prefix
            .entry(prefix.to_string())
            .or_default()
            .push(id);
        Ok(Some(updated))
    }

    async fn set_allowed_ips(
        &self,
        id: Uuid,
        allowed_ips: Option<Vec<String>>,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.get_mut(&id).map(|mut r| {
            r.allowed_ips = allowed_ips;
            r.value().clone()
        }))
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries_for_token(
        &self,
        token_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let log = self.audit.read().await;
        Ok(log
            .iter()
            .rev()
            .filter(|e| e.token_id == Some(token_id))
            .take(limit)
            .cloned()
            .collect())
    }
}
