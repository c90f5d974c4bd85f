//! HTTP endpoints exposed by the gatekeeper.
//!
//! The public surface is intentionally small: a greeting, a health probe,
//! and the rate-limited login endpoint. Everything administrative lives under
//! `/admin` behind [`crate::security::AdminAuth`] and operates on the
//! blocklist, suspicion, and request log stores.

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::net::{IpAddr, SocketAddr};
use tracing::instrument;

use crate::error::GatekeeperError;
use crate::scanner::AnomalyScanner;
use crate::security::LoginRateLimiter;
use crate::store::{BlocklistStore, RequestLogStore, SuspicionStore};

#[derive(Clone)]
pub struct AppState {
    pub blocklist: BlocklistStore,
    pub request_log: RequestLogStore,
    pub suspicions: SuspicionStore,
    pub scanner: AnomalyScanner,
    pub login_limiter: LoginRateLimiter,
    pub pool: SqlitePool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/login", post(post_login))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/blocklist", get(get_blocklist))
        .route("/admin/blocklist", post(post_block))
        .route("/admin/blocklist/{ip}", delete(delete_block))
        .route("/admin/suspicions", get(get_suspicions))
        .route("/admin/requests", get(get_requests))
        .route("/admin/scan", post(post_scan))
}

/// `GET /`: Returns a simple greeting from the gatekeeper.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /health`: Verifies the durable store is reachable.
#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    #[allow(dead_code)]
    pub password: String,
}

/// `POST /login`: Rate-limited login boundary.
///
/// The gatekeeper holds no account store; credentials are never valid here.
/// The endpoint exists as the boundary where the per-IP limiter is consumed
/// and as one of the sensitive paths the anomaly scanner watches.
#[instrument(skip_all)]
pub async fn post_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if !state.login_limiter.check(addr.ip()) {
        tracing::warn!(ip = %addr.ip(), "Login rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many login attempts").into_response();
    }

    tracing::debug!(username = %body.username, "Login attempt rejected");
    (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
}

#[derive(Deserialize)]
pub struct BlocklistQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// `GET /admin/blocklist`: List block entries, newest first.
#[instrument(skip_all)]
pub async fn get_blocklist(
    State(state): State<AppState>,
    Query(query): Query<BlocklistQuery>,
) -> Result<Response, GatekeeperError> {
    let entries = state.blocklist.list(query.include_inactive).await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub ip: String,
    pub reason: Option<String>,
    pub blocked_by: Option<String>,
}

/// `POST /admin/blocklist`: Block an IP.
///
/// Blocking an already-active IP reports `already_blocked`; blocking a
/// previously unblocked IP reports `reactivated`. Both are successes.
#[instrument(skip_all)]
pub async fn post_block(
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> Result<Response, GatekeeperError> {
    let ip = parse_ip(&body.ip)?;
    let outcome = state
        .blocklist
        .block(&ip.to_string(), body.reason.as_deref(), body.blocked_by.as_deref())
        .await?;
    tracing::info!(ip = %ip, outcome = ?outcome, "Blocklist updated");
    Ok((
        StatusCode::OK,
        Json(json!({ "ip": ip.to_string(), "outcome": outcome })),
    )
        .into_response())
}

/// `DELETE /admin/blocklist/{ip}`: Unblock an IP.
///
/// Unblocking an IP that is not blocked reports `not_blocked`, not an error.
#[instrument(skip_all)]
pub async fn delete_block(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Response, GatekeeperError> {
    let ip = parse_ip(&ip)?;
    let outcome = state.blocklist.unblock(&ip.to_string()).await?;
    tracing::info!(ip = %ip, outcome = ?outcome, "Blocklist updated");
    Ok((
        StatusCode::OK,
        Json(json!({ "ip": ip.to_string(), "outcome": outcome })),
    )
        .into_response())
}

/// `GET /admin/suspicions`: Suspicion flags pending review, newest first.
#[instrument(skip_all)]
pub async fn get_suspicions(
    State(state): State<AppState>,
) -> Result<Response, GatekeeperError> {
    let entries = state.suspicions.list().await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

#[derive(Deserialize)]
pub struct RequestsQuery {
    pub limit: Option<i64>,
}

/// `GET /admin/requests`: Most recent request records.
#[instrument(skip_all)]
pub async fn get_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestsQuery>,
) -> Result<Response, GatekeeperError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state.request_log.recent(limit).await?;
    Ok((StatusCode::OK, Json(json!({ "records": records }))).into_response())
}

/// `POST /admin/scan`: Run the anomaly scanner immediately.
#[instrument(skip_all)]
pub async fn post_scan(State(state): State<AppState>) -> Result<Response, GatekeeperError> {
    let report = state.scanner.run_scan().await?;
    tracing::info!(
        volumetric = report.volumetric_flags,
        sensitive = report.sensitive_path_flags,
        "Manual anomaly scan complete"
    );
    Ok((StatusCode::OK, Json(json!(report))).into_response())
}

fn parse_ip(raw: &str) -> Result<IpAddr, GatekeeperError> {
    raw.trim()
        .parse()
        .map_err(|_| GatekeeperError::InvalidIp(raw.to_string()))
}
