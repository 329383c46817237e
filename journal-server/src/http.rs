//! Journal HTTP + WebSocket API
//!
//! Axum-based server exposing the live session channel and the history and
//! summary endpoints.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function. The inner functions take plain values and are directly
//! testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health        - liveness plus summary-store status
//! - GET  /version       - server version info
//! - GET  /ws            - WebSocket session channel
//! - GET  /chat-history  - in-memory history for a user id
//! - POST /summary       - summarize a user's history (persist if owned)
//! - GET  /summaries     - stored summaries in a date range (owner only)
//! - GET  /summary-dates - dates with stored summaries (owner only)

use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{NaiveDate, Utc};
use journal_core::config::HttpConfig;
use journal_core::models::{parse_date, DATE_FORMAT};
use journal_core::{CompletionBackend, JournalConfig, TokenVerifier};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{resolve_identity, RequestIdentity};
use crate::server;
use crate::subsystems::history::HistoryStore;
use crate::subsystems::summarize::{summarize, SummarizeError, SummaryRequest};
use crate::subsystems::summary_store::SummaryStore;

/// Shared state for all HTTP handlers and sessions
#[derive(Clone)]
pub struct HttpState {
    pub config: JournalConfig,
    pub history: HistoryStore,
    pub summaries: Arc<dyn SummaryStore>,
    pub completion: Arc<dyn CompletionBackend>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Parent of every session's cancellation token.
    pub shutdown: CancellationToken,
}

impl HttpState {
    pub fn new(
        config: JournalConfig,
        summaries: Arc<dyn SummaryStore>,
        completion: Arc<dyn CompletionBackend>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            config,
            history: HistoryStore::new(),
            summaries,
            completion,
            verifier,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors = cors_layer(&state.config.http);
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/ws", get(ws_handler))
        .route("/chat-history", get(chat_history_handler))
        .route("/summary", post(summary_handler))
        .route("/summaries", get(summaries_handler))
        .route("/summary-dates", get(summary_dates_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    match config.cors_origin.as_deref() {
        None | Some("*") => layer.allow_origin(Any),
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
            Err(e) => {
                tracing::warn!(origin, error = %e, "Invalid CORS origin, allowing any");
                layer.allow_origin(Any)
            }
        },
    }
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires; open
/// sessions are cancelled first.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let sessions = state.shutdown.clone();

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Journal API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
            sessions.cancel();
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryParams {
    pub user_id: Option<String>,
    /// Logical day of the summary; defaults to today (UTC).
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Handler result: a JSON body, or a bare status with an empty body.
#[derive(Debug)]
pub enum ApiReply {
    Json(StatusCode, serde_json::Value),
    Status(StatusCode),
}

impl ApiReply {
    pub fn ok(body: serde_json::Value) -> Self {
        Self::Json(StatusCode::OK, body)
    }

    pub fn error(status: StatusCode, msg: impl Into<String>) -> Self {
        Self::Json(
            status,
            serde_json::json!({
                "error": msg.into(),
                "status": "error",
            }),
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json(status, _) | Self::Status(status) => *status,
        }
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        match self {
            Self::Json(status, body) => (status, Json(body)).into_response(),
            Self::Status(status) => status.into_response(),
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check - summary-store status and live session count.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.summaries.health().await {
        Ok(detail) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "summary_store": state.summaries.name(),
                "summary_store_detail": detail,
                "completion": state.completion.name(),
                "history_users": state.history.user_count().await,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "summary_store": state.summaries.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version - returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "journal/1",
    })
}

/// Inner chat history - full in-memory history, no ownership check.
pub async fn chat_history_inner(history: &HistoryStore, params: UserParams) -> ApiReply {
    let user_id = match required(params.user_id) {
        Some(u) => u,
        None => return ApiReply::error(StatusCode::BAD_REQUEST, "userId is required"),
    };
    let entries = history.read(&user_id).await;
    ApiReply::ok(serde_json::json!(entries))
}

/// Inner summary - summarize the user's history; persist only if the caller
/// owns it.
pub async fn summary_inner(
    state: &HttpState,
    identity: &RequestIdentity,
    params: SummaryParams,
) -> ApiReply {
    let user_id = match required(params.user_id) {
        Some(u) => u,
        None => return ApiReply::error(StatusCode::BAD_REQUEST, "userId is required"),
    };
    let date = match params.date.as_deref() {
        None => Utc::now().date_naive(),
        Some(raw) => match parse_date(raw) {
            Some(d) => d,
            None => return ApiReply::error(StatusCode::BAD_REQUEST, "date must be yyyy-MM-dd"),
        },
    };

    let history = state.history.read(&user_id).await;
    let request = SummaryRequest {
        user_id: &user_id,
        date,
        identity: identity.user_id(),
    };

    match summarize(
        &history,
        &request,
        state.completion.as_ref(),
        state.summaries.as_ref(),
    )
    .await
    {
        Ok(outcome) => ApiReply::ok(serde_json::json!({ "summary": outcome.text })),
        Err(SummarizeError::NoEntries) => {
            ApiReply::error(StatusCode::BAD_REQUEST, "No journal entries to summarize")
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Error generating summary");
            ApiReply::error(StatusCode::INTERNAL_SERVER_ERROR, "Error generating summary")
        }
    }
}

/// Inner summaries - stored summaries for the caller's own user id.
pub async fn summaries_inner(
    store: &dyn SummaryStore,
    identity: &RequestIdentity,
    params: RangeParams,
) -> ApiReply {
    let (user_id, start, end) = match authorize_range(identity, params) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    match store.query_range(&user_id, start, end).await {
        Ok(summaries) => ApiReply::ok(serde_json::json!(summaries)),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Error fetching summaries");
            ApiReply::error(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching summaries")
        }
    }
}

/// Inner summary dates - dates with at least one stored summary.
pub async fn summary_dates_inner(
    store: &dyn SummaryStore,
    identity: &RequestIdentity,
    params: RangeParams,
) -> ApiReply {
    let (user_id, start, end) = match authorize_range(identity, params) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    match store.query_dates_range(&user_id, start, end).await {
        Ok(dates) => {
            let dates: Vec<String> = dates
                .iter()
                .map(|d| d.format(DATE_FORMAT).to_string())
                .collect();
            ApiReply::ok(serde_json::json!(dates))
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Error fetching summary dates");
            ApiReply::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching summary dates",
            )
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HttpState>>,
    Extension(identity): Extension<RequestIdentity>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| server::run_session_socket(socket, state, identity))
}

pub async fn chat_history_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<UserParams>,
) -> ApiReply {
    chat_history_inner(&state.history, params).await
}

pub async fn summary_handler(
    State(state): State<Arc<HttpState>>,
    Extension(identity): Extension<RequestIdentity>,
    Query(params): Query<SummaryParams>,
) -> ApiReply {
    summary_inner(&state, &identity, params).await
}

pub async fn summaries_handler(
    State(state): State<Arc<HttpState>>,
    Extension(identity): Extension<RequestIdentity>,
    Query(params): Query<RangeParams>,
) -> ApiReply {
    summaries_inner(state.summaries.as_ref(), &identity, params).await
}

pub async fn summary_dates_handler(
    State(state): State<Arc<HttpState>>,
    Extension(identity): Extension<RequestIdentity>,
    Query(params): Query<RangeParams>,
) -> ApiReply {
    summary_dates_inner(state.summaries.as_ref(), &identity, params).await
}

// ============================================================================
// Helpers
// ============================================================================

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Owner-only range check: 401 (empty body) without a verified identity,
/// 403 when the identity does not own `userId`, 400 for bad dates.
pub fn authorize_range(
    identity: &RequestIdentity,
    params: RangeParams,
) -> std::result::Result<(String, NaiveDate, NaiveDate), ApiReply> {
    let caller = identity
        .user_id()
        .ok_or(ApiReply::Status(StatusCode::UNAUTHORIZED))?;

    let user_id = match required(params.user_id) {
        Some(u) if u == caller => u,
        _ => {
            return Err(ApiReply::error(
                StatusCode::FORBIDDEN,
                "Unauthorized: Invalid userId",
            ))
        }
    };

    let (start, end) = match (params.start_date, params.end_date) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(ApiReply::error(
                StatusCode::BAD_REQUEST,
                "Missing required parameters",
            ))
        }
    };
    let (start, end) = match (parse_date(&start), parse_date(&end)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(ApiReply::error(
                StatusCode::BAD_REQUEST,
                "Dates must be yyyy-MM-dd",
            ))
        }
    };
    if start > end {
        return Err(ApiReply::error(
            StatusCode::BAD_REQUEST,
            "startDate must not be after endDate",
        ));
    }

    Ok((user_id, start, end))
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================
