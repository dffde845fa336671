use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Corpus model — documents, pages, regions
// ---------------------------------------------------------------------------

/// An ingested PDF. Identity is the content hash: re-indexing the same bytes
/// under a different path is a duplicate, not a new document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: Uuid,
    pub path: String,
    pub sha256: String,
    pub modified_time: DateTime<Utc>,
    pub num_pages: u32,
}

impl Document {
    /// File name shown to users in search results.
    pub fn display_name(&self) -> String {
        std::path::Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }
}

/// One rendered page of a document. Page numbering is 0-based and dense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub doc_id: Uuid,
    pub page_num: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub text_layer: Option<String>,
}

/// The five sub-images embedded per page: the whole page plus four quadrants
/// extracted with overlap so features on quadrant boundaries land in two
/// regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Full,
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Region {
    /// Indexing order. Region vectors are appended to the dense index in this
    /// order for every page.
    pub const ALL: [Region; 5] = [Region::Full, Region::Q1, Region::Q2, Region::Q3, Region::Q4];
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Region::Full => "full",
            Region::Q1 => "q1",
            Region::Q2 => "q2",
            Region::Q3 => "q3",
            Region::Q4 => "q4",
        };
        f.write_str(s)
    }
}

/// Per-row sidecar record of the dense index. `metadata.json` is an
/// insertion-ordered array of these, index-parallel to the rows of
/// `vectors.bin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMeta {
    pub doc_id: Uuid,
    pub page_num: u32,
    pub region: Region,
}

/// Composite page key. The `"{doc_id}:{page_num}"` string form is an internal
/// encoding (manifest keys, fusion maps) and is never surfaced externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageKey {
    pub doc_id: Uuid,
    pub page_num: u32,
}

impl PageKey {
    pub fn new(doc_id: Uuid, page_num: u32) -> Self {
        Self { doc_id, page_num }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.doc_id, self.page_num)
    }

    pub fn decode(s: &str) -> Option<Self> {
        let (doc, page) = s.rsplit_once(':')?;
        Some(Self {
            doc_id: Uuid::parse_str(doc).ok()?,
            page_num: page.parse().ok()?,
        })
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.page_num)
    }
}

// ---------------------------------------------------------------------------
// Search surface
// ---------------------------------------------------------------------------

/// Which pipeline answered the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStage {
    Fast,
    Reranked,
}

/// Externally-visible retrieval modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Single-vector search over region embeddings aggregated to page level.
    Fast,
    /// Multi-vector late-interaction search with MaxSim scoring.
    Accurate,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(SearchMode::Fast),
            "accurate" => Ok(SearchMode::Accurate),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Fast => f.write_str("fast"),
            SearchMode::Accurate => f.write_str("accurate"),
        }
    }
}

/// One ranked page returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: Uuid,
    pub doc_name: String,
    pub page_num: u32,
    pub score: f32,
    pub stage: SearchStage,
    pub thumbnail_url: String,
}
