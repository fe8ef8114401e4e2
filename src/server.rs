//!
//! sheetsync HTTP server
//! ---------------------
//! Axum routes over the sync and query engines, mounted under the configured
//! API prefix (default `/api`):
//!
//! - `GET /fetch-sheets-data`: raw sheet values, for troubleshooting.
//! - `GET /data`: filtered, paginated records with the total match count.
//! - `GET /data/{id}`: one record.
//! - `GET /update-data`: run a sync pass and report per-row results.
//!
//! Errors are answered in plain text with the status of their `AppError` kind.
//! CORS is permissive unless disabled in configuration.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::FutureExt; // for catch_unwind on async blocks
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::query::{Page, PageRequest, QueryEngine};
use crate::record::CarrierRecord;
use crate::sheets::SheetRows;
use crate::sync::{RowIssue, SyncEngine};

const CORS_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Shared state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: AppContext,
    pub sync: Arc<SyncEngine>,
    pub query: Arc<QueryEngine>,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        let sync = Arc::new(SyncEngine::new(&ctx));
        let query = Arc::new(QueryEngine::new(&ctx));
        Self { ctx, sync, query }
    }
}

/// Build the full router for a context. Used by `run` and by tests that
/// serve the API on an ephemeral port.
pub fn router(ctx: AppContext) -> Router {
    let prefix = ctx.config.api_prefix.clone();
    let cors = ctx.config.cors_permissive;
    let state = AppState::new(ctx);

    let api = Router::new()
        .route("/fetch-sheets-data", get(fetch_sheets_data))
        .route("/data", get(list_data))
        .route("/data/{id}", get(get_data))
        .route("/update-data", get(update_data));

    let app = Router::new().route("/", get(|| async { "sheetsync ok" }));
    let app = if prefix.is_empty() { app.merge(api) } else { app.nest(&prefix, api) };
    let app = app.with_state(state);
    if cors { app.layer(middleware::from_fn(permissive_cors)) } else { app }
}

/// Connect collaborators, then serve until the process stops.
pub async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    info!(target: "startup", "sheetsync starting: {}", config.summary());
    let port = config.port;
    let ctx = AppContext::from_config(config).await?;
    info!(target: "startup", store = ctx.store.backend(), source = %ctx.source.describe(), "collaborators ready");
    let app = router(ctx);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn apply_cors_headers(headers: &mut HeaderMap, requested: Option<HeaderValue>) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.unwrap_or_else(|| HeaderValue::from_static("*")));
}

/// Allow every origin; answer preflight requests directly with 204.
async fn permissive_cors(req: Request, next: Next) -> Response {
    let requested = req.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS).cloned();
    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(resp.headers_mut(), requested);
        return resp;
    }
    let mut resp = next.run(req).await;
    apply_cors_headers(resp.headers_mut(), requested);
    resp
}

async fn fetch_sheets_data(State(state): State<AppState>) -> AppResult<Json<SheetRows>> {
    let rows = state.sync.fetch_raw().await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<String>,
    limit: Option<String>,
    filters: Option<String>,
}

async fn list_data(State(state): State<AppState>, Query(params): Query<ListParams>) -> AppResult<Json<Page>> {
    let req = PageRequest::from_params(
        params.page.as_deref(),
        params.limit.as_deref(),
        params.filters.as_deref(),
        state.query.rules(),
    )?;
    Ok(Json(state.query.list(&req).await?))
}

async fn get_data(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<CarrierRecord>> {
    Ok(Json(state.query.get_by_id(&id).await?))
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    message: String,
    created: usize,
    updated: usize,
    failed: usize,
    failures: Vec<RowIssue>,
    warnings: Vec<RowIssue>,
}

async fn update_data(State(state): State<AppState>) -> Response {
    let pass = async { state.sync.sync().await };
    match AssertUnwindSafe(pass).catch_unwind().await {
        Ok(Ok(report)) => {
            let message = if report.is_clean() {
                "Data updated successfully".to_string()
            } else {
                format!("Data updated with {} failed rows", report.failed())
            };
            Json(UpdateResponse {
                message,
                created: report.created,
                updated: report.updated,
                failed: report.failed(),
                failures: report.failures,
                warnings: report.warnings,
            })
            .into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(panic_payload) => {
            // Convert panics to a 500 error response without crashing the server task
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                      else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                      else { "panic" };
            error!(target: "panic", "update-data panic: {}", msg);
            AppError::internal("internal_panic", "internal server error").into_response()
        }
    }
}
