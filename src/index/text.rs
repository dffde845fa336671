use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::types::PageKey;

const BM25_FILE: &str = "bm25.json";

// Okapi BM25 defaults.
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// BM25 index over the PDF text layer, one "document" per page.
///
/// Tokenization is whitespace splitting on the lowercased text — the text
/// layer of handwritten notebooks is sparse and noisy, so anything fancier
/// buys nothing. Pages with empty text never enter the index and can never be
/// returned.
pub struct Bm25Index {
    corpus: Vec<Vec<String>>,
    meta: Vec<PageKey>,
    stats: Option<Bm25Stats>,
}

struct Bm25Stats {
    /// term → (corpus index → term frequency)
    postings: HashMap<String, HashMap<usize, u32>>,
    /// term → precomputed IDF
    idf: HashMap<String, f32>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
}

/// Serialized form: tokenized corpus + metadata. Statistics are rebuilt on
/// load.
#[derive(Serialize, Deserialize)]
struct Bm25Snapshot {
    corpus: Vec<Vec<String>>,
    meta: Vec<PageKey>,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            corpus: Vec::new(),
            meta: Vec::new(),
            stats: None,
        }
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Add one page's text. Empty or whitespace-only text is ignored.
    pub fn add(&mut self, text: &str, key: PageKey) {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        self.corpus.push(tokens);
        self.meta.push(key);
        self.stats = None;
    }

    /// Materialize postings, document lengths, and IDF values. Idempotent;
    /// `search` builds lazily if needed, so calling this explicitly is an
    /// optimization, not a requirement.
    pub fn build(&mut self) {
        let mut postings: HashMap<String, HashMap<usize, u32>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(self.corpus.len());

        for (i, tokens) in self.corpus.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);
            let mut freqs: HashMap<&str, u32> = HashMap::new();
            for t in tokens {
                *freqs.entry(t.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in freqs {
                postings.entry(term.to_string()).or_default().insert(i, tf);
            }
        }

        let n = self.corpus.len() as f32;
        let total: u32 = doc_lengths.iter().sum();
        let avg_doc_length = if self.corpus.is_empty() {
            0.0
        } else {
            total as f32 / n
        };

        // IDF with the +1 inside the log keeps scores non-negative even for
        // terms present in almost every page.
        let idf = postings
            .iter()
            .map(|(term, docs)| {
                let df = docs.len() as f32;
                (term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        self.stats = Some(Bm25Stats {
            postings,
            idf,
            doc_lengths,
            avg_doc_length,
        });
    }

    /// Top-k pages for a text query, ordered by score descending with ties
    /// broken by insertion index. Only positive-scoring pages are returned.
    pub fn search(&mut self, query: &str, k: usize) -> Vec<(PageKey, f32)> {
        if self.stats.is_none() {
            self.build();
        }
        let Some(stats) = self.stats.as_ref() else {
            return Vec::new();
        };
        if k == 0 || self.corpus.is_empty() || stats.avg_doc_length == 0.0 {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        let mut scores: HashMap<usize, f32> = HashMap::new();

        for term in &query_terms {
            let Some(docs) = stats.postings.get(term) else {
                continue;
            };
            let idf = stats.idf.get(term).copied().unwrap_or(0.0);
            if idf <= 0.0 {
                continue;
            }
            for (&doc, &tf) in docs {
                let tf = tf as f32;
                let dl = stats.doc_lengths[doc] as f32;
                let denom = tf + K1 * (1.0 - B + B * dl / stats.avg_doc_length);
                *scores.entry(doc).or_insert(0.0) += idf * tf * (K1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0 && s.is_finite())
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(i, s)| (self.meta[i], s))
            .collect()
    }

    /// Drop every page of a document and rebuild statistics on next use.
    pub fn remove_by_doc_id(&mut self, doc_id: Uuid) -> usize {
        let before = self.meta.len();
        let mut corpus = Vec::with_capacity(before);
        let mut meta = Vec::with_capacity(before);
        for (tokens, key) in self.corpus.drain(..).zip(self.meta.drain(..)) {
            if key.doc_id != doc_id {
                corpus.push(tokens);
                meta.push(key);
            }
        }
        self.corpus = corpus;
        self.meta = meta;
        self.stats = None;
        before - self.meta.len()
    }

    /// Atomically persist the tokenized corpus and metadata under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let snapshot = Bm25Snapshot {
            corpus: self.corpus.clone(),
            meta: self.meta.clone(),
        };
        let tmp = dir.join(format!("{BM25_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        std::fs::rename(&tmp, dir.join(BM25_FILE))?;
        info!(pages = self.meta.len(), "bm25 index saved to {}", dir.display());
        Ok(())
    }

    /// Load from `dir` if a snapshot exists, else start empty.
    pub fn load_or_new(dir: &Path) -> Result<Self> {
        let path = dir.join(BM25_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(&path)?;
        let snapshot: Bm25Snapshot = serde_json::from_slice(&bytes)?;
        let mut index = Self {
            corpus: snapshot.corpus,
            meta: snapshot.meta,
            stats: None,
        };
        index.build();
        Ok(index)
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page: u32) -> PageKey {
        PageKey::new(Uuid::nil(), page)
    }

    #[test]
    fn matching_page_ranks_first() {
        let mut index = Bm25Index::new();
        index.add("circuit diagram with resistors", key(0));
        index.add("grocery list milk eggs", key(1));
        index.add("circuit sketch op amp", key(2));
        index.build();

        let hits = index.search("circuit resistors", 10);
        assert_eq!(hits[0].0, key(0));
        assert!(hits.iter().all(|(_, s)| *s >= 0.0));
    }

    #[test]
    fn scores_are_monotonically_non_increasing() {
        let mut index = Bm25Index::new();
        index.add("alpha beta gamma", key(0));
        index.add("alpha beta", key(1));
        index.add("alpha", key(2));
        index.build();

        let hits = index.search("alpha beta gamma", 10);
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn empty_text_pages_are_never_indexed() {
        let mut index = Bm25Index::new();
        index.add("   ", key(0));
        index.add("", key(1));
        assert!(index.is_empty());
        assert!(index.search("anything", 10).is_empty());
    }

    #[test]
    fn unknown_terms_return_nothing() {
        let mut index = Bm25Index::new();
        index.add("alpha beta", key(0));
        index.build();
        assert!(index.search("zeta", 10).is_empty());
    }

    #[test]
    fn remove_by_doc_id_excludes_document() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let mut index = Bm25Index::new();
        index.add("shared words here", PageKey::new(doc_a, 0));
        index.add("shared words there", PageKey::new(doc_b, 0));
        index.build();

        assert_eq!(index.remove_by_doc_id(doc_a), 1);
        let hits = index.search("shared words", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.doc_id, doc_b);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Bm25Index::new();
        index.add("persistent tokens survive restarts", key(4));
        index.build();
        index.save(dir.path()).unwrap();

        let mut loaded = Bm25Index::load_or_new(dir.path()).unwrap();
        let hits = loaded.search("persistent tokens", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, key(4));
    }
}
