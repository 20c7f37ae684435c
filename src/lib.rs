//! patgate: personal access token authorization.
//!
//! Library crate shared by the binary and the integration tests in `tests/`.

pub mod api;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;

use cache::TieredCache;
use config::Config;
use middleware::audit::{AuditRecorder, AuditSink};
use middleware::authz::Authorizer;
use middleware::identity::OwnerKeys;
use middleware::rate_limit::RateLimiter;
use models::scope::ScopeModel;
use store::memory::MemoryStore;
use store::postgres::PgStore;
use store::{IssuePolicy, TokenRepository, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub store: TokenStore,
    pub authorizer: Authorizer,
    pub audit: AuditRecorder,
    pub limiter: Arc<RateLimiter>,
    pub owner_keys: OwnerKeys,
}

impl AppState {
    /// Wire the pipeline over explicit backends. The hierarchy is loaded
    /// once here and shared read-only from then on.
    pub fn with_backends(
        config: Config,
        repo: Arc<dyn TokenRepository>,
        sink: Arc<dyn AuditSink>,
        redis: Option<ConnectionManager>,
    ) -> anyhow::Result<Self> {
        let scopes = Arc::new(match &config.scopes_file {
            Some(path) => ScopeModel::from_yaml_file(path)
                .with_context(|| format!("failed to load scope hierarchy from {}", path.display()))?,
            None => ScopeModel::builtin(),
        });

        let policy = IssuePolicy {
            max_expiry_days: config.max_expiry_days,
            allow_non_expiring: config.allow_non_expiring,
            cache_ttl_secs: config.token_cache_ttl,
            timeout: config.store_timeout,
        };

        Ok(Self {
            store: TokenStore::new(repo, scopes.clone(), TieredCache::new(redis), policy),
            authorizer: Authorizer::new(scopes),
            audit: AuditRecorder::new(sink, config.store_timeout),
            limiter: Arc::new(RateLimiter::new(config.rate_limit, config.rate_limit_window)),
            owner_keys: OwnerKeys::new(config.jwt_secret.as_bytes()),
            config,
        })
    }

    /// Everything in process memory. Nothing survives a restart.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        let mem = Arc::new(MemoryStore::new());
        Self::with_backends(config, mem.clone(), mem, None)
    }

    /// Connect the backends named in config, falling back to memory when
    /// `DATABASE_URL` is unset.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let redis = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis...");
                let client = redis::Client::open(url.as_str())?;
                Some(ConnectionManager::new(client).await?)
            }
            None => None,
        };

        match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to database...");
                let db = Arc::new(PgStore::connect(url, config.store_timeout).await?);
                tracing::info!("Running migrations...");
                db.migrate().await?;
                Self::with_backends(config, db.clone(), db, redis)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, tokens and audit entries are kept in memory only");
                let mem = Arc::new(MemoryStore::new());
                Self::with_backends(config, mem.clone(), mem, redis)
            }
        }
    }
}
