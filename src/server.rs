//! JSON HTTP server over the staging operations.
//!
//! Exposes the transport-agnostic library operations (create batch, review,
//! resolve, import) as a JSON API. Authorization is an external concern:
//! when `[server].auth_token` is configured, every request must carry it as
//! a bearer token; the token is minted by whatever auth system fronts this
//! service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/batches` | Create a batch from a document |
//! | `GET`  | `/batches` | List batches (`?status=`, `?page=`) |
//! | `GET`  | `/batches/{id}` | Batch detail with records and duplicates |
//! | `POST` | `/batches/{id}/review` | Apply approvals and rejections |
//! | `POST` | `/batches/{id}/import` | Import approved records |
//! | `POST` | `/batches/{id}/discard` | Discard before import |
//! | `POST` | `/duplicates/{id}/resolve` | Resolve a flagged duplicate |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "batch ... was modified concurrently" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found`
//! (404), `conflict` (409), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::models::{
    BatchSummary, ImportOutcome, ParseError, Resolution, StagedRecord, StagingDuplicate,
    UploadBatch,
};
use crate::{db, import, ingest, review, store};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/batches", post(handle_create_batch).get(handle_list_batches))
        .route("/batches/{id}", get(handle_get_batch))
        .route("/batches/{id}/review", post(handle_review))
        .route("/batches/{id}/import", post(handle_import))
        .route("/batches/{id}/discard", post(handle_discard))
        .route("/duplicates/{id}/resolve", post(handle_resolve))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("qbank server listening on http://{}", bind_addr);

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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::BatchNotFound(_) | Error::RecordNotFound(_) | Error::DuplicateNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Error::InvalidStatusFilter(_)
            | Error::InvalidResolution(_)
            | Error::InvalidTransition { .. }
            | Error::RecordNotReviewable { .. }
            | Error::BatchNotImportable { .. }
            | Error::IdentifierExhausted(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::ConcurrencyConflict(_) => (StatusCode::CONFLICT, "conflict"),
            Error::Db(_) | Error::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "missing or invalid bearer token".to_string(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// Checks the caller's bearer token against the configured one. With no
/// token configured the check is a no-op and the deployment is expected to
/// sit behind its own authentication layer.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &config.server.auth_token else {
        return Ok(());
    };
    let supplied = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if supplied == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

// ============ Requests / responses ============

#[derive(Deserialize)]
struct CreateBatchRequest {
    document: String,
    source_name: String,
}

#[derive(Deserialize)]
struct ListBatchesQuery {
    status: Option<String>,
    #[serde(default = "default_page")]
    page: i64,
}

fn default_page() -> i64 {
    1
}

#[derive(Serialize)]
struct BatchDetailResponse {
    batch: UploadBatch,
    records: Vec<StagedRecord>,
    duplicates: Vec<StagingDuplicate>,
    parse_errors: Vec<ParseError>,
}

#[derive(Deserialize)]
struct ReviewRequest {
    #[serde(default)]
    approvals: Vec<String>,
    #[serde(default)]
    rejections: Vec<String>,
}

#[derive(Deserialize)]
struct ResolveRequest {
    resolution: String,
}

#[derive(Serialize)]
struct ImportResponse {
    batch: UploadBatch,
    outcomes: Vec<ImportOutcome>,
}

// ============ Handlers ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBatchRequest>,
) -> Result<Json<BatchSummary>, AppError> {
    authorize(&state.config, &headers)?;
    if req.source_name.trim().is_empty() {
        return Err(bad_request("source_name must not be empty"));
    }
    let summary = ingest::create_batch(&state.pool, &state.config, &req.document, &req.source_name)
        .await?;
    Ok(Json(summary))
}

async fn handle_list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListBatchesQuery>,
) -> Result<Json<Vec<UploadBatch>>, AppError> {
    authorize(&state.config, &headers)?;
    let status = match &query.status {
        Some(s) => Some(
            crate::models::BatchStatus::parse(s)
                .ok_or_else(|| AppError::from(Error::InvalidStatusFilter(s.clone())))?,
        ),
        None => None,
    };
    let batches = store::list_batches(
        &state.pool,
        status,
        query.page,
        state.config.review.page_size,
    )
    .await?;
    Ok(Json(batches))
}

async fn handle_get_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchDetailResponse>, AppError> {
    authorize(&state.config, &headers)?;
    let batch = store::get_batch(&state.pool, &batch_id).await?;
    let records = store::fetch_all_records(&state.pool, &batch_id).await?;
    let duplicates = store::fetch_batch_duplicates(&state.pool, &batch_id).await?;
    let parse_errors = store::fetch_parse_errors(&state.pool, &batch_id).await?;
    Ok(Json(BatchDetailResponse {
        batch,
        records,
        duplicates,
        parse_errors,
    }))
}

async fn handle_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<UploadBatch>, AppError> {
    authorize(&state.config, &headers)?;
    let batch = review::review(&state.pool, &batch_id, &req.approvals, &req.rejections).await?;
    Ok(Json(batch))
}

async fn handle_resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(duplicate_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<StagingDuplicate>, AppError> {
    authorize(&state.config, &headers)?;
    let resolution = Resolution::parse(&req.resolution)
        .ok_or_else(|| AppError::from(Error::InvalidResolution(req.resolution.clone())))?;
    let duplicate = review::resolve_duplicate(&state.pool, &duplicate_id, resolution).await?;
    Ok(Json(duplicate))
}

async fn handle_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
) -> Result<Json<ImportResponse>, AppError> {
    authorize(&state.config, &headers)?;
    let outcomes = import::import_batch(&state.pool, &batch_id).await?;
    let batch = store::get_batch(&state.pool, &batch_id).await?;
    Ok(Json(ImportResponse { batch, outcomes }))
}

async fn handle_discard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
) -> Result<Json<UploadBatch>, AppError> {
    authorize(&state.config, &headers)?;
    let batch = review::discard_batch(&state.pool, &batch_id).await?;
    Ok(Json(batch))
}
