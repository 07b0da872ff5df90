//! HTTP boundary.
//!
//! Exposes the Q&A engine and classifier as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a customer question |
//! | `POST` | `/ask/stream` | Stream the answer as NDJSON `{chunk}` events plus one `{final}` |
//! | `POST` | `/classify` | Classify a support ticket |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Self-description of the API |
//!
//! # Error Contract
//!
//! Error responses carry `{ "error": { "code": ..., "message": ... } }`.
//! Degraded requests (empty retrieval, translator outage, Q&A timeout)
//! still answer 200 with a safe fallback body; only generation and
//! validation failures become 500, and a classification timeout becomes
//! 504. The customer never sees a raw backend error.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the session id
//! header is exposed for browser clients.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::classifier::Classifier;
use crate::engine::{AskParams, QaEngine, StreamEvent};
use crate::error::CoraError;
use crate::models::{AnswerResult, ClassificationResult};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QaEngine>,
    pub classifier: Arc<Classifier>,
}

/// Builds the router; split out from [`run_server`] so tests can drive
/// it in-process.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static("x-session-id")]);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/ask/stream", post(handle_ask_stream))
        .route("/classify", post(handle_classify))
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .layer(cors)
        .with_state(state)
}

/// Binds the service port and serves until the process is terminated.
pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let bind_addr = format!("0.0.0.0:{}", port);

    info!("Cora listening on http://{}", bind_addr);

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

/// Maps pipeline errors to the §7 status policy. Messages stay opaque:
/// backend detail goes to the log, not the customer.
fn map_error(error: CoraError) -> AppError {
    match error {
        CoraError::Timeout(_) => AppError {
            status: StatusCode::GATEWAY_TIMEOUT,
            code: "timeout".to_string(),
            message: "the request took too long to process".to_string(),
        },
        other => {
            tracing::error!(error = %other, "request failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: "internal error".to_string(),
            }
        }
    }
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    language: Option<String>,
    app_name: Option<String>,
    session_id: Option<String>,
}

impl AskRequest {
    fn into_params(self) -> AskParams {
        AskParams {
            question: self.question,
            language: self.language,
            app_name: self.app_name,
            session_id: self.session_id,
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AnswerResult>, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let result = state
        .engine
        .ask(request.into_params())
        .await
        .map_err(map_error)?;

    Ok(Json(result))
}

// ============ POST /ask/stream ============

/// Streams the answer as newline-delimited JSON: zero or more
/// `{"chunk": "..."}` events terminated by a single `{"final": {...}}`.
/// The resolved session id is also exposed via the `X-Session-ID` header.
async fn handle_ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Response, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let (session_id, events) = Arc::clone(&state.engine).ask_stream(request.into_params());

    let body_stream = events.map(|event| {
        let line = match event {
            StreamEvent::Chunk(chunk) => serde_json::json!({ "chunk": chunk }),
            StreamEvent::Final(result) => serde_json::json!({ "final": result }),
        };
        Ok::<_, Infallible>(bytes::Bytes::from(format!("{}\n", line)))
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("X-Session-ID", session_id)
        .body(Body::from_stream(body_stream))
        .map_err(|e| map_error(CoraError::Llm(e.to_string())))?;

    Ok(response)
}

// ============ POST /classify ============

#[derive(Deserialize)]
struct ClassifyRequest {
    text: String,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ClassificationResult>, AppError> {
    if request.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let result = state
        .classifier
        .classify(&request.text)
        .await
        .map_err(map_error)?;

    Ok(Json(result))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Cora API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/ask": "POST - Answer questions from the knowledge base",
            "/ask/stream": "POST - Stream an answer as NDJSON chunks",
            "/classify": "POST - Classify support text",
            "/health": "GET - Health check",
        },
    }))
}
