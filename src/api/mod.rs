//! HTTP surface: ingest job control, search, document management, page
//! serving.
//!
//! Handlers are thin: they parse, hand CPU-bound work to the blocking pool,
//! and shape responses. All engine semantics live below this layer.

pub mod schemas;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::core::error::ScoutError;
use crate::core::types::SearchMode;
use crate::ingest::progress::JobStatus;
use crate::search::{search, SearchRequest};
use schemas::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn scout_error(e: ScoutError) -> ApiError {
    let status = match &e {
        ScoutError::Input(_) | ScoutError::Query(_) => StatusCode::BAD_REQUEST,
        ScoutError::MissingArtifact(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/ingest", post(start_ingest))
        .route("/v1/ingest/{job_id}", get(ingest_status))
        .route("/v1/search", post(run_search))
        .route("/v1/documents", get(list_documents))
        .route("/v1/documents", delete(remove_documents))
        .route("/v1/documents/reindex", post(reindex))
        .route("/v1/doc/{doc_id}/page/{page_num}", get(serve_page))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the process is stopped.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.settings.bind_host, state.settings.bind_port
    );
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("doodle-scout listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let indexed_pages = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.meta.page_count())
            .await
            .map_err(internal_error)?
            .map_err(scout_error)?
    };
    Ok(Json(HealthResponse {
        status: "ok",
        single_vec_loaded: true,
        multi_vec_loaded: true,
        indexed_pages,
        index_size_mb: state.index_size_mb(),
    }))
}

async fn start_ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let root = PathBuf::from(&req.root_path);
    if !root.is_dir() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("root_path is not a directory: {}", req.root_path),
        ));
    }

    let job_id = state
        .jobs
        .submit(state.clone(), root, req.force_reindex)
        .await;
    Ok(Json(IngestResponse {
        job_id,
        status: JobStatus::Pending,
    }))
}

async fn ingest_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<IngestStatusResponse>, ApiError> {
    let snapshot = state
        .jobs
        .snapshot(job_id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown job {job_id}")))?;

    let p = snapshot.progress;
    Ok(Json(IngestStatusResponse {
        status: p.status,
        docs_done: p.docs_done,
        docs_total: p.docs_total,
        pages_done: p.pages_done,
        pages_total: p.pages_total,
        current_doc: p.current_doc,
        eta_seconds: snapshot.eta_seconds,
        error: p.error,
    }))
}

async fn run_search(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut sketch_bytes: Option<Vec<u8>> = None;
    let mut text_query: Option<String> = None;
    let mut top_k: Option<usize> = None;
    let mut use_rerank = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "sketch_image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                sketch_bytes = Some(bytes.to_vec());
            }
            "text_query" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                if !text.trim().is_empty() {
                    text_query = Some(text);
                }
            }
            "top_k" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                top_k = text.trim().parse().ok();
            }
            "use_rerank" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                use_rerank = matches!(text.trim(), "1" | "true" | "yes" | "on");
            }
            _ => {}
        }
    }

    let sketch_bytes = sketch_bytes
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "sketch_image field is required"))?;
    let sketch = image::load_from_memory(&sketch_bytes)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("unreadable sketch: {e}")))?;

    let request = SearchRequest {
        sketch,
        text_query,
        top_k: top_k.unwrap_or(state.settings.default_result_k),
        mode: if use_rerank {
            SearchMode::Accurate
        } else {
            SearchMode::Fast
        },
    };

    let outcome = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || search(&state, &request))
            .await
            .map_err(internal_error)?
            .map_err(scout_error)?
    };

    Ok(Json(SearchResponse {
        results: outcome.results,
        query_time_ms: outcome.query_time_ms,
        total_indexed_pages: outcome.total_indexed_pages,
    }))
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let docs = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.meta.list_documents())
            .await
            .map_err(internal_error)?
            .map_err(scout_error)?
    };
    Ok(Json(DocumentListResponse {
        documents: docs
            .into_iter()
            .map(|d| DocumentItem {
                doc_id: d.doc_id,
                doc_name: d.display_name(),
                path: d.path,
                num_pages: d.num_pages,
                sha256: d.sha256,
            })
            .collect(),
    }))
}

async fn remove_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DocumentIdsRequest>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let removed = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || -> crate::core::error::Result<usize> {
            let mut removed = 0;
            for doc_id in req.doc_ids {
                if crate::ingest::remove_document(&state, doc_id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
        .map_err(internal_error)?
        .map_err(scout_error)?
    };
    Ok(Json(RemoveResponse { removed }))
}

async fn reindex(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DocumentIdsRequest>,
) -> Result<Json<ReindexResponse>, ApiError> {
    let reindexed = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            let (tx, _rx) = crate::ingest::progress_channel();
            let cancel = std::sync::atomic::AtomicBool::new(false);
            crate::ingest::reindex_documents(&state, &req.doc_ids, &tx, &cancel)
        })
        .await
        .map_err(internal_error)?
        .map_err(scout_error)?
    };
    Ok(Json(ReindexResponse { reindexed }))
}

/// Serve the rendered page PNG. Thumbnails reuse the full render; see
/// DESIGN.md for the open question on pre-generated downscales.
async fn serve_page(
    State(state): State<Arc<AppState>>,
    Path((doc_id, page_num)): Path<(Uuid, u32)>,
) -> Result<Response, ApiError> {
    let path = state.settings.rendered_page_path(doc_id, page_num);
    let bytes = tokio::fs::read(&path).await.map_err(|_| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("no rendered page for {doc_id}:{page_num}"),
        )
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        bytes,
    )
        .into_response())
}
