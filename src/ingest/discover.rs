use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::error::{Result, ScoutError};

/// Streaming-hash chunk size.
const HASH_CHUNK: usize = 8 * 1024;

/// A PDF found on disk, identified by its content hash.
#[derive(Debug, Clone)]
pub struct PdfFile {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// SHA-256 of a file, streamed in 8 KiB chunks.
pub fn compute_sha256(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recursively locate PDF files under `root` and hash each one. The result is
/// sorted by path so ingest order (and therefore vector insertion order) is
/// reproducible.
pub fn discover_pdfs(root: &Path) -> Result<Vec<PdfFile>> {
    if !root.is_dir() {
        return Err(ScoutError::Input(format!(
            "ingest root is not a directory: {}",
            root.display()
        )));
    }

    let mut pdfs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_pdf = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            continue;
        }

        let sha256 = compute_sha256(path)?;
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        pdfs.push(PdfFile {
            path: path.to_path_buf(),
            sha256,
            size_bytes,
        });
    }

    pdfs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(pdfs)
}

/// Drop files whose hash is already indexed.
pub fn filter_new(
    pdfs: Vec<PdfFile>,
    existing_hashes: &std::collections::HashSet<String>,
) -> Vec<PdfFile> {
    pdfs.into_iter()
        .filter(|p| !existing_hashes.contains(&p.sha256))
        .collect()
}
