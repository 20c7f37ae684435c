//! Request pipeline for protected routes.
//!
//! ```text
//! Received → RateChecked → TokenResolved → Decided → Audited → Dispatched
//! ```
//!
//! Rate-limited requests exit before any token is looked at and are not
//! audited. Every later exit, allowed or denied, writes exactly one audit
//! entry. If the request future is dropped before that entry is written, the
//! abort guard writes it detached: the decided entry when there is one,
//! otherwise a terminal "aborted" entry.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::audit::{AuditError, AuditRecorder};
use crate::middleware::authz::DenyReason;
use crate::middleware::identity::bearer;
use crate::middleware::metrics;
use crate::middleware::rate_limit::RateDecision;
use crate::models::audit::AuditEntry;
use crate::models::scope::Scope;
use crate::models::token::Token;
use crate::store::StoreError;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    RateChecked,
    TokenResolved,
    Decided,
    Audited,
    Dispatched,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::RateChecked => "rate_checked",
            Stage::TokenResolved => "token_resolved",
            Stage::Decided => "decided",
            Stage::Audited => "audited",
            Stage::Dispatched => "dispatched",
        };
        f.write_str(s)
    }
}

/// What the pipeline knows about the caller before touching the credential.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Rate-limit key and audit `source_address`.
    pub source: String,
    pub source_ip: Option<IpAddr>,
    pub method: String,
    pub endpoint: String,
}

impl RequestContext {
    pub fn from_request(req: &Request, trust_forwarded_for: bool) -> Self {
        let source_ip = client_ip(req, trust_forwarded_for);
        Self {
            source: source_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            source_ip,
            method: req.method().to_string(),
            endpoint: req.uri().path().to_string(),
        }
    }

    fn denied(&self, token_id: Option<Uuid>, status: u16, reason: impl Into<String>) -> AuditEntry {
        AuditEntry::denied(
            token_id,
            self.source.clone(),
            self.method.clone(),
            self.endpoint.clone(),
            status,
            reason,
        )
    }
}

fn client_ip(req: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Handed to protected handlers through request extensions.
#[derive(Debug, Clone)]
pub struct AuthorizedToken {
    pub token: Token,
    pub scope: Scope,
}

/// Writes a terminal audit entry if the request is dropped before its
/// decision has been recorded. Once a decision exists the guard carries that
/// entry, so a drop during the audit write still lands it detached.
struct AbortGuard {
    recorder: AuditRecorder,
    ctx: RequestContext,
    token_id: Option<Uuid>,
    stage: Stage,
    pending: Option<AuditEntry>,
    armed: bool,
}

impl AbortGuard {
    fn new(recorder: AuditRecorder, ctx: RequestContext) -> Self {
        Self {
            recorder,
            ctx,
            token_id: None,
            stage: Stage::Received,
            pending: None,
            armed: true,
        }
    }

    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        if stage >= Stage::Audited {
            self.armed = false;
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Record the decision's entry and disarm once the write has returned,
    /// whatever its outcome.
    async fn settle(&mut self, entry: AuditEntry) -> Result<(), AuditError> {
        self.pending = Some(entry.clone());
        self.advance(Stage::Decided);
        let recorded = self.recorder.record(entry).await;
        self.advance(Stage::Audited);
        recorded
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        // Limiter rejections are never token events.
        if !self.armed || self.stage < Stage::RateChecked {
            return;
        }
        tracing::warn!(
            stage = %self.stage,
            endpoint = %self.ctx.endpoint,
            "request dropped before its audit entry was written"
        );
        let entry = match self.pending.take() {
            Some(decided) => decided,
            None => {
                let reason = DenyReason::Aborted;
                self.ctx.denied(
                    self.token_id,
                    reason.status_code(),
                    format!("{} after {}", reason, self.stage),
                )
            }
        };
        self.recorder.record_detached(entry);
    }
}

/// Run one request through rate check, resolution, decision and audit.
pub async fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    required: &Scope,
    presented: Option<&str>,
) -> Result<AuthorizedToken, AppError> {
    let started = Instant::now();
    let mut guard = AbortGuard::new(state.audit.clone(), ctx.clone());

    if let RateDecision::Limited { retry_after_secs } = state.limiter.check(&ctx.source) {
        guard.disarm();
        metrics::record_rate_limited();
        return Err(AppError::RateLimited { retry_after_secs });
    }
    guard.advance(Stage::RateChecked);

    let resolved = match presented {
        Some(secret) => state.store.resolve(secret).await,
        None => Err(StoreError::NotFound),
    };
    let token = match resolved {
        Ok(token) => token,
        Err(StoreError::NotFound) => {
            let reason = DenyReason::InvalidToken;
            guard
                .settle(ctx.denied(None, reason.status_code(), reason.as_str()))
                .await?;
            metrics::record_decision(false, Some(reason.as_str()), started.elapsed().as_secs_f64());
            tracing::info!(endpoint = %ctx.endpoint, source = %ctx.source, "unknown or malformed token");
            return Err(AppError::InvalidToken);
        }
        Err(e) => {
            guard.disarm();
            state
                .audit
                .record_detached(ctx.denied(None, 500, "Storage unavailable"));
            return Err(e.into());
        }
    };
    guard.token_id = Some(token.id);
    guard.advance(Stage::TokenResolved);

    let verdict = state
        .authorizer
        .decide(&token, required, ctx.source_ip, Utc::now());

    let entry = match verdict.reason {
        None => AuditEntry::allowed(
            token.id,
            ctx.source.clone(),
            ctx.method.clone(),
            ctx.endpoint.clone(),
            200,
        ),
        Some(reason) => ctx.denied(Some(token.id), reason.status_code(), reason.as_str()),
    };
    guard.settle(entry).await?;

    let reason = verdict.reason.map(|r| r.as_str());
    metrics::record_decision(verdict.allowed, reason, started.elapsed().as_secs_f64());

    if let Some(reason) = verdict.reason {
        tracing::info!(
            token_id = %token.id,
            prefix = %token.token_prefix,
            required = %required,
            reason = %reason,
            "authorization denied"
        );
        return Err(AppError::denied(reason, &required.to_string()));
    }

    state.store.touch_last_used(token.id);
    tracing::debug!(token_id = %token.id, required = %required, stage = %Stage::Audited, "authorized");

    Ok(AuthorizedToken {
        token,
        scope: required.clone(),
    })
}

/// Middleware state: the app plus the scope the wrapped route requires.
#[derive(Clone)]
pub struct RequiredScope {
    pub state: Arc<AppState>,
    pub scope: Scope,
}

/// Guard for protected routes. Mount with
/// `from_fn_with_state(RequiredScope { .. }, require_scope)`.
pub async fn require_scope(
    State(required): State<RequiredScope>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = RequestContext::from_request(&req, required.state.config.trust_forwarded_for);
    let presented = bearer(req.headers()).map(str::to_string);

    let authorized = authorize(&required.state, &ctx, &required.scope, presented.as_deref()).await?;
    let token_id = authorized.token.id;
    req.extensions_mut().insert(authorized);

    let resp = next.run(req).await;
    tracing::debug!(
        token_id = %token_id,
        status = resp.status().as_u16(),
        stage = %Stage::Dispatched,
        "protected request handled"
    );
    Ok(resp)
}

/// Source-address limiting for routes that are not token-protected
/// (the management API).
pub async fn limit_by_source(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = RequestContext::from_request(&req, state.config.trust_forwarded_for);
    if let RateDecision::Limited { retry_after_secs } = state.limiter.check(&ctx.source) {
        metrics::record_rate_limited();
        return Err(AppError::RateLimited { retry_after_secs });
    }
    Ok(next.run(req).await)
}

// ── Tests ─────────────────────────────────────────────────────
