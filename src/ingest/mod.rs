//! Ingestion coordinator: discover → dedupe → render → embed → index.
//!
//! The coordinator is deliberately single-threaded at the page level — pages
//! within a document run sequentially, documents within a job sequentially —
//! so peak memory stays bounded by one rendered page plus the resident vector
//! matrix. Parallelism belongs inside embedders.

pub mod discover;
pub mod jobs;
pub mod progress;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::core::error::{Result, ScoutError};
use crate::core::types::{Document, PageKey, PageRecord, Region, VectorMeta};
use crate::prepare;
use crate::render::PdfDocument;

pub use discover::{compute_sha256, discover_pdfs, filter_new, PdfFile};
pub use progress::{progress_channel, JobStatus, Progress};

/// Run one ingest job over `root`. Blocking; callers run it under
/// `spawn_blocking`. Progress snapshots go out through `tx`; `cancel` is
/// checked between pages.
pub fn run_ingest(
    state: &AppState,
    root: &Path,
    force: bool,
    tx: &watch::Sender<Progress>,
    cancel: &AtomicBool,
) -> Result<Progress> {
    let mut progress = Progress {
        status: JobStatus::Discovering,
        ..Progress::default()
    };
    tx.send_replace(progress.clone());

    let mut pdfs = discover_pdfs(root)?;

    if force {
        // Force re-index: drop any existing document with the same content
        // hash before ingesting it again.
        for pdf in &pdfs {
            if let Some(existing) = state.meta.get_document_by_hash(&pdf.sha256)? {
                info!(doc_id = %existing.doc_id, "force reindex: removing previous copy");
                remove_document(state, existing.doc_id)?;
            }
        }
    } else {
        let existing: std::collections::HashSet<String> = state
            .meta
            .list_documents()?
            .into_iter()
            .map(|d| d.sha256)
            .collect();
        pdfs = filter_new(pdfs, &existing);
    }

    ingest_files(state, pdfs, &mut progress, tx, cancel)
}

/// Ingest an explicit file list. Shared by `run_ingest` and document reindex.
fn ingest_files(
    state: &AppState,
    pdfs: Vec<PdfFile>,
    progress: &mut Progress,
    tx: &watch::Sender<Progress>,
    cancel: &AtomicBool,
) -> Result<Progress> {
    let max_pages = state.settings.max_pages_per_doc;

    // Count pages up front for progress totals. Unopenable files are skipped
    // here and again below, consistently.
    let mut counted: Vec<(PdfFile, usize)> = Vec::with_capacity(pdfs.len());
    for pdf in pdfs {
        match PdfDocument::open(&pdf.path) {
            Ok(doc) => {
                let pages = doc.page_count().min(max_pages as usize);
                counted.push((pdf, pages));
            }
            Err(e) => {
                warn!("skipping unreadable PDF {}: {e}", pdf.path.display());
            }
        }
    }

    progress.docs_total = counted.len() as u32;
    progress.pages_total = counted.iter().map(|(_, n)| *n as u32).sum();
    progress.status = JobStatus::Indexing;
    tx.send_replace(progress.clone());

    let mut cancelled = false;
    for (pdf, planned_pages) in counted {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }
        progress.current_doc = pdf
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tx.send_replace(progress.clone());

        match process_pdf(state, &pdf, planned_pages, progress, tx, cancel) {
            Ok(was_cancelled) => {
                progress.docs_done += 1;
                tx.send_replace(progress.clone());
                if was_cancelled {
                    cancelled = true;
                    break;
                }
            }
            Err(e) => {
                // Index-level failures are fatal for the job; persist what
                // already succeeded so the on-disk state stays consistent.
                persist_all(state)?;
                progress.status = JobStatus::Failed;
                progress.error = Some(e.to_string());
                tx.send_replace(progress.clone());
                return Err(e);
            }
        }
    }

    persist_all(state)?;

    progress.status = if cancelled {
        JobStatus::Cancelled
    } else {
        JobStatus::Completed
    };
    progress.current_doc.clear();
    tx.send_replace(progress.clone());
    info!(
        docs = progress.docs_done,
        pages = progress.pages_done,
        cancelled,
        "ingest finished"
    );
    Ok(progress.clone())
}

/// Process one PDF. Returns `Ok(true)` when cancellation stopped the document
/// early. Page render failures skip the page; embedding failures retry once
/// and then abort the job.
fn process_pdf(
    state: &AppState,
    pdf: &PdfFile,
    planned_pages: usize,
    progress: &mut Progress,
    tx: &watch::Sender<Progress>,
    cancel: &AtomicBool,
) -> Result<bool> {
    let settings = &state.settings;
    let doc = match PdfDocument::open(&pdf.path) {
        Ok(d) => d,
        Err(e) => {
            warn!("skipping unreadable PDF {}: {e}", pdf.path.display());
            return Ok(false);
        }
    };

    let doc_id = Uuid::new_v4();
    let modified_time: DateTime<Utc> = std::fs::metadata(&pdf.path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    state.meta.add_document(&Document {
        doc_id,
        path: pdf.path.to_string_lossy().into_owned(),
        sha256: pdf.sha256.clone(),
        modified_time,
        num_pages: planned_pages as u32,
    })?;

    let rendered_dir = settings.rendered_dir().join(doc_id.to_string());
    std::fs::create_dir_all(&rendered_dir)?;

    let mut indexed_pages = 0u32;
    for page_num in 0..planned_pages {
        if cancel.load(Ordering::Relaxed) {
            finish_document(state, doc_id, indexed_pages, planned_pages, &rendered_dir)?;
            return Ok(true);
        }

        let img = match doc.render_page(page_num, settings.render_dpi) {
            Ok(img) => img,
            Err(e) => {
                warn!(%doc_id, page_num, "page render failed, skipping: {e}");
                continue;
            }
        };

        // The raw render is the rerank + thumbnail artifact.
        img.save(rendered_dir.join(format!("{page_num}.png")))?;

        let text_layer = doc.extract_text(page_num);
        if let Some(text) = &text_layer {
            let mut bm25 = state.bm25.write().expect("bm25 lock poisoned");
            bm25.add(text, PageKey::new(doc_id, page_num as u32));
        }

        state.meta.add_page(&PageRecord {
            doc_id,
            page_num: page_num as u32,
            width_px: img.width(),
            height_px: img.height(),
            text_layer,
        })?;

        // Five region vectors per page, appended in region order. A page is
        // all-or-nothing in the dense index.
        let normalized =
            prepare::normalize_ink(&img, settings.clahe_clip_limit, settings.clahe_grid_size);
        let regions = prepare::extract_regions(&normalized, settings.overlap_pct);

        let region_images: Vec<image::RgbImage> =
            regions.iter().map(|(_, img)| img.clone()).collect();
        let vectors = embed_with_retry(state, &region_images, doc_id, page_num)?;
        let meta: Vec<VectorMeta> = regions
            .iter()
            .map(|(region, _)| VectorMeta {
                doc_id,
                page_num: page_num as u32,
                region: *region,
            })
            .collect();
        debug_assert_eq!(meta.iter().map(|m| m.region).collect::<Vec<_>>(), Region::ALL);

        {
            let mut dense = state.dense.write().expect("dense lock poisoned");
            dense.add(&vectors, meta)?;
        }

        if settings.multi_vector_enabled {
            let matrix = state
                .multi_embedder
                .embed_one(&img)
                .map_err(|e| ScoutError::Embedding(e.to_string()))?;
            state.patches.put(doc_id, page_num as u32, &matrix)?;
        }

        indexed_pages += 1;
        progress.pages_done += 1;
        tx.send_replace(progress.clone());
    }

    finish_document(state, doc_id, indexed_pages, planned_pages, &rendered_dir)?;
    Ok(false)
}

/// Reconcile the document row with what actually got indexed. A document with
/// zero surviving pages is dropped entirely — the metadata store never lists
/// a document the vector index knows nothing about.
fn finish_document(
    state: &AppState,
    doc_id: Uuid,
    indexed_pages: u32,
    planned_pages: usize,
    rendered_dir: &Path,
) -> Result<()> {
    if indexed_pages == 0 {
        warn!(%doc_id, "no pages indexed, dropping empty document");
        state.meta.delete_document(doc_id)?;
        if rendered_dir.exists() {
            std::fs::remove_dir_all(rendered_dir)?;
        }
    } else if (indexed_pages as usize) < planned_pages {
        state.meta.update_num_pages(doc_id, indexed_pages)?;
    }
    Ok(())
}

/// Embed one page's regions, retrying once on embedder failure. A second
/// consecutive failure for the same page aborts the job.
fn embed_with_retry(
    state: &AppState,
    images: &[image::RgbImage],
    doc_id: Uuid,
    page_num: usize,
) -> Result<Vec<Vec<f32>>> {
    match state.single_embedder.embed_batch(images) {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!(%doc_id, page_num, "embedding failed, retrying once: {first}");
            state.single_embedder.embed_batch(images).map_err(|second| {
                ScoutError::Embedding(format!(
                    "page {page_num} of {doc_id} failed twice: {second}"
                ))
            })
        }
    }
}

/// Persist every store in crash-safe order: subordinate stores (text, patch)
/// first, the dense index next, metadata last. A crash mid-sequence leaves
/// orphans in subordinate stores but never a ghost document visible through
/// the metadata store.
pub fn persist_all(state: &AppState) -> Result<()> {
    {
        let mut bm25 = state.bm25.write().expect("bm25 lock poisoned");
        bm25.build();
        bm25.save(&state.settings.bm25_dir())?;
    }
    state.patches.save()?;
    {
        let dense = state.dense.read().expect("dense lock poisoned");
        dense.save(&state.settings.index_dir())?;
    }
    // The metadata store commits per statement; nothing further to flush.
    Ok(())
}

/// Remove a document from every surface. Atomic at the observable level:
/// after this returns, no index or store reports the document.
pub fn remove_document(state: &AppState, doc_id: Uuid) -> Result<bool> {
    if state.meta.get_document(doc_id)?.is_none() {
        return Ok(false);
    }

    let removed_vectors = {
        let mut dense = state.dense.write().expect("dense lock poisoned");
        dense.remove_by_doc_id(doc_id)
    };
    let removed_patches = state.patches.remove_by_doc_id(doc_id)?;
    let removed_text = {
        let mut bm25 = state.bm25.write().expect("bm25 lock poisoned");
        bm25.remove_by_doc_id(doc_id)
    };
    state.meta.delete_document(doc_id)?;

    let rendered_dir = state.settings.rendered_dir().join(doc_id.to_string());
    if rendered_dir.exists() {
        std::fs::remove_dir_all(&rendered_dir)?;
    }

    persist_all(state)?;
    info!(
        %doc_id,
        removed_vectors,
        removed_patches,
        removed_text,
        "document removed"
    );
    Ok(true)
}

/// Remove and re-ingest the given documents from their recorded source paths.
/// Returns the number of documents re-ingested.
pub fn reindex_documents(
    state: &AppState,
    doc_ids: &[Uuid],
    tx: &watch::Sender<Progress>,
    cancel: &AtomicBool,
) -> Result<usize> {
    let mut files = Vec::new();
    for &doc_id in doc_ids {
        let Some(doc) = state.meta.get_document(doc_id)? else {
            warn!(%doc_id, "reindex requested for unknown document");
            continue;
        };
        let path = std::path::PathBuf::from(&doc.path);
        if !path.is_file() {
            warn!(%doc_id, "source file missing, dropping from index: {}", doc.path);
            remove_document(state, doc_id)?;
            continue;
        }
        remove_document(state, doc_id)?;
        let sha256 = compute_sha256(&path)?;
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        files.push(PdfFile {
            path,
            sha256,
            size_bytes,
        });
    }

    let count = files.len();
    let mut progress = Progress::default();
    ingest_files(state, files, &mut progress, tx, cancel)?;
    Ok(count)
}
