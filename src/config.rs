use std::path::PathBuf;
use std::time::Duration;

use crate::middleware::rate_limit::parse_window;

const JWT_PLACEHOLDER: &str = "CHANGE_ME_PATGATE_JWT_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset means tokens and audit entries live in process memory.
    pub database_url: Option<String>,
    /// Unset means the resolution cache is local only.
    pub redis_url: Option<String>,
    /// HS256 key used to verify owner JWTs on the management API.
    pub jwt_secret: String,
    /// Requests per window per source address. 0 = disabled.
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    /// Seconds a resolved token stays cached. 0 = no caching.
    pub token_cache_ttl: u64,
    pub store_timeout: Duration,
    pub max_expiry_days: i64,
    pub allow_non_expiring: bool,
    /// Optional YAML permission hierarchy; the builtin one is used otherwise.
    pub scopes_file: Option<PathBuf>,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database_url: None,
            redis_url: None,
            jwt_secret: JWT_PLACEHOLDER.into(),
            rate_limit: 60,
            rate_limit_window: Duration::from_secs(60),
            token_cache_ttl: 300,
            store_timeout: Duration::from_millis(2000),
            max_expiry_days: 365,
            allow_non_expiring: false,
            scopes_file: None,
            trust_forwarded_for: false,
            log_json: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let jwt_secret = std::env::var("PATGATE_JWT_SECRET").unwrap_or_else(|_| JWT_PLACEHOLDER.into());
    if jwt_secret == JWT_PLACEHOLDER {
        let env_mode = std::env::var("PATGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "PATGATE_JWT_SECRET is still the insecure placeholder. \
                 Set a real signing secret before running in production."
            );
        }
        eprintln!("⚠️  PATGATE_JWT_SECRET is not set, using insecure placeholder. Set a real secret for production.");
    }

    let max_expiry_days = env_parse("PATGATE_MAX_EXPIRY_DAYS", defaults.max_expiry_days);
    if max_expiry_days < 1 {
        anyhow::bail!("PATGATE_MAX_EXPIRY_DAYS must be at least 1");
    }

    Ok(Config {
        port: env_parse("PATGATE_PORT", defaults.port),
        database_url: env_opt("DATABASE_URL"),
        redis_url: env_opt("REDIS_URL"),
        jwt_secret,
        rate_limit: env_parse("PATGATE_RATE_LIMIT", defaults.rate_limit),
        rate_limit_window: std::env::var("PATGATE_RATE_LIMIT_WINDOW")
            .map(|w| Duration::from_secs(parse_window(&w)))
            .unwrap_or(defaults.rate_limit_window),
        token_cache_ttl: env_parse("PATGATE_TOKEN_CACHE_TTL", defaults.token_cache_ttl),
        store_timeout: Duration::from_millis(env_parse("PATGATE_STORE_TIMEOUT_MS", 2000u64)),
        max_expiry_days,
        allow_non_expiring: env_flag("PATGATE_ALLOW_NON_EXPIRING"),
        scopes_file: env_opt("PATGATE_SCOPES_FILE").map(PathBuf::from),
        trust_forwarded_for: env_flag("PATGATE_TRUST_FORWARDED_FOR"),
        log_json: env_flag("PATGATE_LOG_JSON"),
    })
}
