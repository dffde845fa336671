//! The three retrieval indexes: dense single-vector, multi-vector patch
//! store, and BM25 text.

pub mod dense;
pub mod patch;
pub mod text;

pub use dense::DenseIndex;
pub use patch::PatchStore;
pub use text::Bm25Index;
