//! HTTP analysis server.
//!
//! Sessions run as background tasks; clients poll or stream progress.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sessions` | Start an analysis session, returns its id |
//! | `GET`  | `/sessions/{id}/status` | SSE stream of stage progress |
//! | `GET`  | `/sessions/{id}/result` | Fetch the result of a finished session (once) |
//! | `POST` | `/reset` | Clear the catalog and vector index |
//! | `GET`  | `/stats` | Index statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "company must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::{AnalysisResult, IndexStats};
use crate::session::{Services, SessionHub, SessionOptions};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    hub: Arc<SessionHub>,
}

/// Starts the analysis server.
///
/// Binds to the address configured in `[server].bind` and serves until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = Arc::new(Services::from_config(config.clone()).await?);
    let hub = Arc::new(SessionHub::new(services));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/sessions", post(handle_start_session))
        .route("/sessions/{id}/status", get(handle_session_status))
        .route("/sessions/{id}/result", get(handle_session_result))
        .route("/reset", post(handle_reset))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { hub });

    println!("Analysis server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /sessions ============

#[derive(Deserialize)]
struct StartSessionRequest {
    company: String,
    question: String,
    #[serde(default)]
    lookback_years: Option<i64>,
}

#[derive(Serialize)]
struct StartSessionResponse {
    session_id: String,
}

async fn handle_start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, AppError> {
    if req.company.trim().is_empty() {
        return Err(bad_request("company must not be empty"));
    }
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let opts = SessionOptions {
        lookback_years: req.lookback_years,
    };
    let session_id = state
        .hub
        .start_session(req.company.trim().to_string(), req.question.trim().to_string(), opts)
        .await;

    Ok(Json(StartSessionResponse { session_id }))
}

// ============ GET /sessions/{id}/status ============

/// Streams stage progress as server-sent events. The stream can be
/// claimed once per session; it ends when the session finishes.
async fn handle_session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state
        .hub
        .take_status(&id)
        .await
        .ok_or_else(|| not_found(format!("no pending status stream for session: {}", id)))?;

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse_event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data(format!("{}: {}", event.stage, event.message)));
        Some((Ok::<_, Infallible>(sse_event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ GET /sessions/{id}/result ============

/// Returns the result of a finished session. The result is handed out
/// exactly once; a second request gets 404.
async fn handle_session_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResult>, AppError> {
    let result = state
        .hub
        .take_result(&id)
        .await
        .ok_or_else(|| not_found(format!("no finished session with id: {}", id)))?;
    Ok(Json(result))
}

// ============ POST /reset ============

#[derive(Serialize)]
struct ResetResponse {
    status: String,
}

async fn handle_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    state
        .hub
        .services()
        .store
        .reset()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(ResetResponse {
        status: "reset".to_string(),
    }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    let stats = state
        .hub
        .services()
        .store
        .stats()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(stats))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
