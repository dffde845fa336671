use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{Result, ScoutError};
use crate::core::types::PageKey;
use crate::embed::PatchMatrix;

const MANIFEST_FILE: &str = "manifest.json";
const EMBEDDINGS_DIR: &str = "embeddings";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    file: String,
    /// `[rows, dim]`
    shape: [usize; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    model: String,
    /// `"{doc_id}:{page_num}"` → entry. BTreeMap keeps the serialized form
    /// stable across saves.
    pages: BTreeMap<String, ManifestEntry>,
}

/// On-disk store of per-page patch-embedding matrices.
///
/// One shape-tagged binary blob per page under `embeddings/`, with a single
/// JSON manifest persisted per save. Matrices are never cached in memory —
/// the reranker touches O(stage1_top_k) pages per query, so per-`get` disk
/// reads are cheap enough.
pub struct PatchStore {
    dir: PathBuf,
    manifest: RwLock<Manifest>,
}

impl PatchStore {
    pub fn new(dir: PathBuf, model: &str) -> Self {
        Self {
            dir,
            manifest: RwLock::new(Manifest {
                version: MANIFEST_VERSION,
                model: model.to_string(),
                pages: BTreeMap::new(),
            }),
        }
    }

    /// Load the manifest from `dir` if present, else start empty.
    pub fn load_or_new(dir: PathBuf, model: &str) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(Self::new(dir, model));
        }
        let bytes = std::fs::read(&manifest_path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if manifest.model != model {
            warn!(
                "patch store at {} was built with model '{}', current is '{}'",
                dir.display(),
                manifest.model,
                model
            );
        }
        Ok(Self {
            dir,
            manifest: RwLock::new(manifest),
        })
    }

    fn blob_path(&self, file: &str) -> PathBuf {
        self.dir.join(EMBEDDINGS_DIR).join(file)
    }

    fn filename(doc_id: Uuid, page_num: u32) -> String {
        format!("{doc_id}_{page_num}.bin")
    }

    /// Write one page's matrix and record it in the manifest.
    pub fn put(&self, doc_id: Uuid, page_num: u32, matrix: &PatchMatrix) -> Result<()> {
        let file = Self::filename(doc_id, page_num);
        let path = self.blob_path(&file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytemuck::cast_slice::<f32, u8>(&matrix.data))?;

        let mut manifest = self.manifest.write().expect("manifest lock poisoned");
        manifest.pages.insert(
            PageKey::new(doc_id, page_num).encode(),
            ManifestEntry {
                file,
                shape: [matrix.rows, matrix.dim],
            },
        );
        Ok(())
    }

    /// Read one page's matrix from disk. `None` when the page was never
    /// stored or its blob has gone missing.
    pub fn get(&self, doc_id: Uuid, page_num: u32) -> Result<Option<PatchMatrix>> {
        let entry = {
            let manifest = self.manifest.read().expect("manifest lock poisoned");
            match manifest.pages.get(&PageKey::new(doc_id, page_num).encode()) {
                Some(e) => e.clone(),
                None => return Ok(None),
            }
        };

        let path = self.blob_path(&entry.file);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("patch blob missing on disk: {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let data: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        let [rows, dim] = entry.shape;
        if data.len() != rows * dim {
            return Err(ScoutError::Input(format!(
                "patch blob {} does not match manifest shape {rows}x{dim}",
                path.display()
            )));
        }
        Ok(Some(PatchMatrix::new(rows, dim, data)))
    }

    pub fn has(&self, doc_id: Uuid, page_num: u32) -> bool {
        self.manifest
            .read()
            .expect("manifest lock poisoned")
            .pages
            .contains_key(&PageKey::new(doc_id, page_num).encode())
    }

    /// Remove every page of a document, deleting blobs. Returns the number of
    /// pages removed.
    pub fn remove_by_doc_id(&self, doc_id: Uuid) -> Result<usize> {
        let prefix = format!("{doc_id}:");
        let victims: Vec<(String, ManifestEntry)> = {
            let manifest = self.manifest.read().expect("manifest lock poisoned");
            manifest
                .pages
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        for (_, entry) in &victims {
            let path = self.blob_path(&entry.file);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        let mut manifest = self.manifest.write().expect("manifest lock poisoned");
        for (key, _) in &victims {
            manifest.pages.remove(key);
        }
        Ok(victims.len())
    }

    pub fn all_keys(&self) -> Vec<PageKey> {
        self.manifest
            .read()
            .expect("manifest lock poisoned")
            .pages
            .keys()
            .filter_map(|k| PageKey::decode(k))
            .collect()
    }

    pub fn page_count(&self) -> usize {
        self.manifest
            .read()
            .expect("manifest lock poisoned")
            .pages
            .len()
    }

    /// Atomically persist the manifest.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let manifest = self.manifest.read().expect("manifest lock poisoned");
        let tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&*manifest)?)?;
        std::fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;
        info!(
            pages = manifest.pages.len(),
            "patch manifest saved to {}",
            self.dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, dim: usize, fill: f32) -> PatchMatrix {
        PatchMatrix::new(rows, dim, vec![fill; rows * dim])
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path().to_path_buf(), "ink-patch-v1");
        let doc = Uuid::new_v4();

        store.put(doc, 0, &matrix(4, 8, 0.5)).unwrap();
        assert!(store.has(doc, 0));
        let loaded = store.get(doc, 0).unwrap().expect("stored page");
        assert_eq!(loaded.rows, 4);
        assert_eq!(loaded.dim, 8);
        assert_eq!(loaded.data, vec![0.5; 32]);
    }

    #[test]
    fn get_missing_page_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path().to_path_buf(), "ink-patch-v1");
        assert!(store.get(Uuid::new_v4(), 0).unwrap().is_none());
    }

    #[test]
    fn remove_by_doc_id_deletes_blobs_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path().to_path_buf(), "ink-patch-v1");
        let gone = Uuid::new_v4();
        let keep = Uuid::new_v4();

        store.put(gone, 0, &matrix(2, 4, 1.0)).unwrap();
        store.put(gone, 1, &matrix(2, 4, 1.0)).unwrap();
        store.put(keep, 0, &matrix(2, 4, 2.0)).unwrap();

        assert_eq!(store.remove_by_doc_id(gone).unwrap(), 2);
        assert!(store.get(gone, 0).unwrap().is_none());
        assert!(store.get(gone, 1).unwrap().is_none());
        assert!(store.get(keep, 0).unwrap().is_some());
        assert_eq!(store.page_count(), 1);
    }

    #[test]
    fn manifest_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Uuid::new_v4();
        {
            let store = PatchStore::new(dir.path().to_path_buf(), "ink-patch-v1");
            store.put(doc, 3, &matrix(5, 4, 0.25)).unwrap();
            store.save().unwrap();
        }
        let store = PatchStore::load_or_new(dir.path().to_path_buf(), "ink-patch-v1").unwrap();
        assert_eq!(store.page_count(), 1);
        assert_eq!(store.all_keys(), vec![PageKey::new(doc, 3)]);
        assert!(store.get(doc, 3).unwrap().is_some());
    }
}
