use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, ScoutError};

/// Environment override for the data directory (takes precedence over the
/// config file so containerized deployments can relocate state without
/// editing YAML).
pub const ENV_DATA_DIR: &str = "DOODLE_SCOUT_DATA_DIR";

// ---------------------------------------------------------------------------
// Settings — single process-wide struct, loaded once at startup (YAML file or
// defaults). No hot reload.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Rendering
    /// DPI at which PDF pages are rasterized. 150 keeps a letter page near
    /// 1275×1650 px, enough detail for patch embeddings without ballooning disk.
    pub render_dpi: u32,
    /// Hard cap on pages ingested per document.
    pub max_pages_per_doc: u32,

    // Preprocessing
    pub clahe_clip_limit: f32,
    pub clahe_grid_size: u32,
    /// Quadrant overlap as a fraction of each axis, in `[0, 0.5)`.
    pub overlap_pct: f32,

    // Embedding
    /// Single-vector embedding dimension (D1).
    pub embedding_dim: usize,
    /// Whether pages are embedded through the multi-vector channel at ingest.
    pub multi_vector_enabled: bool,

    // Retrieval
    pub stage1_top_k: usize,
    pub default_result_k: usize,
    pub rerank_batch_size: usize,

    // Text fusion
    pub enable_text_boost: bool,
    pub text_boost_weight: f32,

    // Serving
    pub bind_host: String,
    pub bind_port: u16,

    // Paths
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            render_dpi: 150,
            max_pages_per_doc: 500,
            clahe_clip_limit: 2.0,
            clahe_grid_size: 8,
            overlap_pct: 0.1,
            embedding_dim: 1152,
            multi_vector_enabled: true,
            stage1_top_k: 100,
            default_result_k: 20,
            rerank_batch_size: 8,
            enable_text_boost: true,
            text_boost_weight: 0.3,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 7171,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file, failing loudly on unreadable paths or
    /// malformed documents — a misconfigured ingest must abort before it
    /// mutates state.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScoutError::Input(format!("cannot read config {}: {e}", path.display()))
        })?;
        let mut settings: Settings = serde_yaml::from_str(&contents).map_err(|e| {
            ScoutError::Input(format!("cannot parse config {}: {e}", path.display()))
        })?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve settings: explicit config path, else defaults. Environment
    /// overrides apply in both cases.
    pub fn resolve(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(p) => Self::from_yaml(p),
            None => {
                let mut settings = Settings::default();
                settings.apply_env();
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..0.5).contains(&self.overlap_pct) {
            return Err(ScoutError::Input(format!(
                "overlap_pct must be in [0, 0.5), got {}",
                self.overlap_pct
            )));
        }
        if self.embedding_dim == 0 {
            return Err(ScoutError::Input("embedding_dim must be non-zero".into()));
        }
        if self.render_dpi == 0 {
            return Err(ScoutError::Input("render_dpi must be non-zero".into()));
        }
        Ok(())
    }

    // --- Directory layout (owned by the core, see DESIGN.md) ---

    pub fn rendered_dir(&self) -> PathBuf {
        self.data_dir.join("rendered")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn bm25_dir(&self) -> PathBuf {
        self.index_dir().join("bm25")
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.index_dir().join("metadata.sqlite")
    }

    pub fn colqwen_dir(&self) -> PathBuf {
        self.data_dir.join("colqwen")
    }

    pub fn eval_dir(&self) -> PathBuf {
        self.data_dir.join("eval")
    }

    pub fn pseudo_queries_dir(&self) -> PathBuf {
        self.eval_dir().join("pseudo_queries")
    }

    pub fn eval_results_dir(&self) -> PathBuf {
        self.eval_dir().join("results")
    }

    /// Path of the rendered PNG for one page. Rerank and thumbnail serving
    /// both read from here.
    pub fn rendered_page_path(&self, doc_id: uuid::Uuid, page_num: u32) -> PathBuf {
        self.rendered_dir()
            .join(doc_id.to_string())
            .join(format!("{page_num}.png"))
    }
}
