use std::sync::{Arc, RwLock};

use tracing::info;

use crate::core::config::Settings;
use crate::core::error::Result;
use crate::embed::{InkGridEmbedder, InkPatchEmbedder, MultiVectorEmbedder, SingleVectorEmbedder};
use crate::index::{Bm25Index, DenseIndex, PatchStore};
use crate::ingest::jobs::JobRegistry;
use crate::search::Reranker;
use crate::store::MetaStore;

/// The engine's resource bundle: settings, stores, indexes, embedders.
///
/// Constructed explicitly once at startup and shared via `Arc` — there are no
/// process-wide singletons, so tests build bundles over temp directories and
/// throw them away. Writes flow only through the ingestion coordinator; the
/// retrieval engine takes read locks.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub meta: Arc<MetaStore>,
    pub dense: Arc<RwLock<DenseIndex>>,
    pub bm25: Arc<RwLock<Bm25Index>>,
    pub patches: Arc<PatchStore>,
    pub single_embedder: Arc<dyn SingleVectorEmbedder>,
    pub multi_embedder: Arc<dyn MultiVectorEmbedder>,
    /// The engine holds the reranker, never the other way around; the
    /// reranker owns its embedder handle and re-embedding cache.
    pub reranker: Arc<Reranker>,
    pub jobs: Arc<JobRegistry>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("data_dir", &self.settings.data_dir)
            .field("single_embedder", &self.single_embedder.id())
            .field("multi_embedder", &self.multi_embedder.id())
            .finish()
    }
}

impl AppState {
    /// Initialize with the built-in deterministic embedders, loading any
    /// persisted indexes under the configured data directory.
    pub fn initialize(settings: Settings) -> Result<Self> {
        let single: Arc<dyn SingleVectorEmbedder> =
            Arc::new(InkGridEmbedder::new(settings.embedding_dim));
        let multi: Arc<dyn MultiVectorEmbedder> = Arc::new(InkPatchEmbedder::new());
        Self::initialize_with(settings, single, multi)
    }

    /// Initialize with caller-supplied embedders (model-backed or test
    /// doubles). The index dimension follows the single-vector embedder.
    pub fn initialize_with(
        settings: Settings,
        single_embedder: Arc<dyn SingleVectorEmbedder>,
        multi_embedder: Arc<dyn MultiVectorEmbedder>,
    ) -> Result<Self> {
        std::fs::create_dir_all(settings.index_dir())?;
        std::fs::create_dir_all(settings.rendered_dir())?;

        let dense = DenseIndex::load_or_new(&settings.index_dir(), single_embedder.dim())?;
        let bm25 = Bm25Index::load_or_new(&settings.bm25_dir())?;
        let patches = PatchStore::load_or_new(settings.colqwen_dir(), multi_embedder.id())?;
        let meta = MetaStore::open(&settings.metadata_db_path())?;

        info!(
            vectors = dense.len(),
            text_pages = bm25.len(),
            patch_pages = patches.page_count(),
            "engine state loaded from {}",
            settings.data_dir.display()
        );

        let reranker = Arc::new(Reranker::new(
            multi_embedder.clone(),
            settings.rendered_dir(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            meta: Arc::new(meta),
            dense: Arc::new(RwLock::new(dense)),
            bm25: Arc::new(RwLock::new(bm25)),
            patches: Arc::new(patches),
            single_embedder,
            multi_embedder,
            reranker,
            jobs: Arc::new(JobRegistry::new()),
        })
    }

    /// Size of the resident dense matrix in megabytes, for health reporting.
    pub fn index_size_mb(&self) -> f64 {
        let dense = self.dense.read().expect("dense lock poisoned");
        dense.size_bytes() as f64 / (1024.0 * 1024.0)
    }
}
