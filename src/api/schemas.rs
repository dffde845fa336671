use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::SearchResult;
use crate::ingest::progress::JobStatus;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub root_path: String,
    #[serde(default)]
    pub force_reindex: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct IngestStatusResponse {
    pub status: JobStatus,
    pub docs_done: u32,
    pub docs_total: u32,
    pub pages_done: u32,
    pub pages_total: u32,
    pub current_doc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query_time_ms: u64,
    pub total_indexed_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub single_vec_loaded: bool,
    pub multi_vec_loaded: bool,
    pub indexed_pages: u64,
    pub index_size_mb: f64,
}

#[derive(Debug, Serialize)]
pub struct DocumentItem {
    pub doc_id: Uuid,
    pub doc_name: String,
    pub path: String,
    pub num_pages: u32,
    pub sha256: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentItem>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentIdsRequest {
    pub doc_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub reindexed: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
