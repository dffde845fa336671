use std::path::PathBuf;

/// Library-wide error type.
///
/// Ingestion is best-effort at the page level and fail-fast at the index
/// level; retrieval is all-or-nothing per query. The variants map onto those
/// boundaries: `PageRender` is recoverable (skip the page), `DimensionMismatch`
/// is fatal (the index was built against a different embedder or config).
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Bad path, missing PDF, invalid config. Reported before any state mutates.
    #[error("invalid input: {0}")]
    Input(String),

    /// A single page failed to rasterize. The owning document continues.
    #[error("failed to render page {page} of {path}: {reason}")]
    PageRender {
        path: PathBuf,
        page: usize,
        reason: String,
    },

    /// Embedder failure. Aborts the current page; twice in a row aborts the job.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Vector dimensionality differs from what the index was built with.
    #[error("dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Unreadable sketch or malformed query. Search never partially answers.
    #[error("query error: {0}")]
    Query(String),

    /// An on-disk artifact (rendered page, patch blob) is gone. Callers decide
    /// whether to drop the candidate or fail.
    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error("metadata store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScoutError>;
