use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put, MethodRouter},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::metrics::encode_metrics;
use crate::middleware::pipeline::{limit_by_source, require_scope, RequiredScope};
use crate::AppState;

pub mod handlers;

/// Full application: health, metrics, management API and protected routes.
pub fn app_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let app = Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router(state.clone())?)
        .fallback(fallback_404)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer())
                .layer(middleware::from_fn(security_headers_middleware)),
        );
    Ok(app)
}

/// Routes mounted under `/api/v1`.
///
/// Token management is authenticated by owner JWT and rate limited by
/// source address. Protected resources go through the full PAT pipeline,
/// each with its own required scope.
pub fn api_router(state: Arc<AppState>) -> anyhow::Result<Router<Arc<AppState>>> {
    let management = Router::new()
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route(
            "/tokens/:id",
            get(handlers::get_token).delete(handlers::revoke_token),
        )
        .route("/tokens/:id/regenerate", post(handlers::regenerate_token))
        .route("/tokens/:id/allowed-ips", put(handlers::update_allowed_ips))
        .route("/tokens/:id/logs", get(handlers::token_logs))
        .route("/scopes", get(handlers::list_scopes))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_by_source));

    let protected = Router::new()
        .route(
            "/workspaces",
            protect(&state, "workspaces:read", get(handlers::list_workspaces))?,
        )
        .route(
            "/workspaces/:id",
            protect(
                &state,
                "workspaces:delete",
                axum::routing::delete(handlers::delete_workspace),
            )?,
        )
        .route(
            "/fcs/parameters",
            protect(&state, "fcs:read", get(handlers::fcs_parameters))?,
        )
        .route(
            "/fcs/analyze",
            protect(&state, "fcs:analyze", post(handlers::fcs_analyze))?,
        );

    Ok(management.merge(protected))
}

/// Put `route` behind the PAT pipeline. Fails if the hierarchy in use does
/// not know `scope`, so a misconfigured deployment refuses to start.
fn protect(
    state: &Arc<AppState>,
    scope: &str,
    route: MethodRouter<Arc<AppState>>,
) -> anyhow::Result<MethodRouter<Arc<AppState>>> {
    let scope = state.authorizer.scope_model().parse(scope)?;
    let required = RequiredScope {
        state: state.clone(),
        scope,
    };
    Ok(route.route_layer(middleware::from_fn_with_state(required, require_scope)))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        encode_metrics(),
    )
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Browser access is limited to localhost origins plus `PATGATE_DASHBOARD_ORIGIN`.
fn cors_layer() -> CorsLayer {
    let dashboard_origin = std::env::var("PATGATE_DASHBOARD_ORIGIN")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == dashboard_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    // token responses must never be cached
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");

    resp
}
