use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::identity::Owner;
use crate::middleware::pipeline::AuthorizedToken;
use crate::models::audit::AuditEntry;
use crate::models::token::{IssuedToken, NewTokenRequest, Token};
use crate::AppState;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RegenerateRequest {
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AllowedIpsRequest {
    pub allowed_ips: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ResourceView {
    pub resource: String,
    /// Highest privilege first.
    pub permissions: Vec<String>,
}

// ── Token management ─────────────────────────────────────────

/// POST /api/v1/tokens: issue a token; the secret appears only in this response
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(payload): Json<NewTokenRequest>,
) -> Result<(StatusCode, Json<IssuedToken>), AppError> {
    let issued = state.store.create(&owner, payload).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// GET /api/v1/tokens
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Token>>, AppError> {
    Ok(Json(state.store.list(&owner).await?))
}

/// GET /api/v1/tokens/:id
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<Token>, AppError> {
    Ok(Json(state.store.get(&owner, id).await?))
}

/// DELETE /api/v1/tokens/:id: logical revoke, the record is kept
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<Token>, AppError> {
    Ok(Json(state.store.revoke(id, &owner).await?))
}

/// POST /api/v1/tokens/:id/regenerate
pub async fn regenerate_token(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    payload: Option<Json<RegenerateRequest>>,
) -> Result<Json<IssuedToken>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    let issued = state
        .store
        .regenerate(id, &owner, payload.expires_in_days)
        .await?;
    Ok(Json(issued))
}

/// PUT /api/v1/tokens/:id/allowed-ips: an empty list removes the restriction
pub async fn update_allowed_ips(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(payload): Json<AllowedIpsRequest>,
) -> Result<Json<Token>, AppError> {
    let token = state
        .store
        .update_allowed_ips(id, &owner, payload.allowed_ips)
        .await?;
    Ok(Json(token))
}

/// GET /api/v1/tokens/:id/logs: newest first
pub async fn token_logs(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    // ownership check; other owners' tokens read as missing
    state.store.get(&owner, id).await?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let entries = state.audit.entries_for_token(id, limit).await?;
    Ok(Json(entries))
}

/// GET /api/v1/scopes: the loaded permission hierarchy
pub async fn list_scopes(
    State(state): State<Arc<AppState>>,
    Owner(_owner): Owner,
) -> Json<Vec<ResourceView>> {
    Json(
        state
            .authorizer
            .scope_model()
            .resources()
            .map(|(resource, permissions)| ResourceView {
                resource: resource.to_string(),
                permissions: permissions.to_vec(),
            })
            .collect(),
    )
}

// ── Protected resources ──────────────────────────────────────
//
// Placeholders that prove dispatch after authorization. The real workspace
// and file-analysis logic lives elsewhere.

/// GET /api/v1/workspaces: requires `workspaces:read`
pub async fn list_workspaces(Extension(auth): Extension<AuthorizedToken>) -> Json<Value> {
    Json(json!({
        "workspaces": [],
        "owner_id": auth.token.owner_id,
        "granted_by": auth.scope.to_string(),
    }))
}

/// DELETE /api/v1/workspaces/:id: requires `workspaces:delete`
pub async fn delete_workspace(
    Extension(auth): Extension<AuthorizedToken>,
    Path(id): Path<Uuid>,
) -> Json<Value> {
    tracing::info!(workspace_id = %id, token_id = %auth.token.id, "workspace delete requested");
    Json(json!({ "deleted": id }))
}

/// GET /api/v1/fcs/parameters: requires `fcs:read`
pub async fn fcs_parameters(Extension(auth): Extension<AuthorizedToken>) -> Json<Value> {
    Json(json!({
        "parameters": [],
        "token_id": auth.token.id,
    }))
}

/// POST /api/v1/fcs/analyze: requires `fcs:analyze`
pub async fn fcs_analyze(
    Extension(auth): Extension<AuthorizedToken>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    tracing::info!(token_id = %auth.token.id, "analysis requested");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "request": body,
        })),
    )
}
