//! End-to-end pipeline tests: synthetic PDFs through ingest, search, and
//! removal, against a real data directory.

mod common;

use common::{ingest_root, synthetic_pdf, test_state, PageSpec};

use doodle_scout::core::types::{Region, SearchMode, SearchStage};
use doodle_scout::ingest::JobStatus;
use doodle_scout::search::{search, SearchRequest};

fn two_page_specs() -> Vec<PageSpec> {
    vec![
        PageSpec {
            text: "integral tables and gamma identities",
            rect: (80, 520, 180, 120),
        },
        PageSpec {
            text: "circuit sketches with op amps",
            rect: (340, 150, 140, 220),
        },
    ]
}

#[test]
fn empty_corpus_yields_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    let progress = ingest_root(&state, &corpus, false);

    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.docs_done, 0);
    assert_eq!(state.meta.page_count().unwrap(), 0);

    let sketch = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        100,
        100,
        image::Rgb([255, 255, 255]),
    ));
    let outcome = search(
        &state,
        &SearchRequest {
            sketch,
            text_query: None,
            top_k: 10,
            mode: SearchMode::Fast,
        },
    )
    .unwrap();
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.total_indexed_pages, 0);
}

#[test]
fn single_page_ingest_builds_all_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(
        corpus.join("notes.pdf"),
        synthetic_pdf(&[PageSpec {
            text: "laplace transforms cheat sheet",
            rect: (120, 300, 200, 180),
        }]),
    )
    .unwrap();

    let state = test_state(&dir.path().join("data"), true);
    let progress = ingest_root(&state, &corpus, false);

    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.docs_done, 1);
    assert_eq!(progress.pages_done, 1);

    // Exactly five region vectors, unit norm, in region order.
    {
        let dense = state.dense.read().unwrap();
        assert_eq!(dense.len(), 5);
        let regions: Vec<Region> = dense.records().iter().map(|m| m.region).collect();
        assert_eq!(regions, Region::ALL);
        for i in 0..dense.len() {
            let norm: f32 = dense.vector(i).iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "row {i} norm {norm}");
        }
    }

    // Page row, text layer, and patch matrix all present.
    let docs = state.meta.list_documents().unwrap();
    assert_eq!(docs.len(), 1);
    let pages = state.meta.get_pages(docs[0].doc_id).unwrap();
    assert_eq!(pages.len(), 1);
    assert!(pages[0]
        .text_layer
        .as_deref()
        .unwrap_or_default()
        .contains("laplace"));
    assert_eq!(state.patches.page_count(), 1);

    // The rendered artifact exists where rerank expects it.
    assert!(state
        .settings
        .rendered_page_path(docs[0].doc_id, 0)
        .exists());
}

#[test]
fn searching_with_the_page_itself_ranks_it_first() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);

    let doc = &state.meta.list_documents().unwrap()[0];
    for page_num in 0..2u32 {
        let rendered = state.settings.rendered_page_path(doc.doc_id, page_num);
        let sketch = image::open(&rendered).unwrap();

        let outcome = search(
            &state,
            &SearchRequest {
                sketch,
                text_query: None,
                top_k: 10,
                mode: SearchMode::Fast,
            },
        )
        .unwrap();

        let top = &outcome.results[0];
        assert_eq!(top.page_num, page_num, "page {page_num} not ranked first");
        assert_eq!(top.doc_id, doc.doc_id);
        assert!(top.score >= 0.95, "self-match score {}", top.score);
        assert_eq!(top.stage, SearchStage::Fast);
        assert_eq!(
            top.thumbnail_url,
            format!("/v1/doc/{}/page/{page_num}", doc.doc_id)
        );
    }
}

#[test]
fn accurate_mode_scores_stored_patch_matrices() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);

    let doc = &state.meta.list_documents().unwrap()[0];
    let rendered = state.settings.rendered_page_path(doc.doc_id, 1);
    let sketch = image::open(&rendered).unwrap();

    let outcome = search(
        &state,
        &SearchRequest {
            sketch,
            text_query: None,
            top_k: 5,
            mode: SearchMode::Accurate,
        },
    )
    .unwrap();

    assert_eq!(outcome.results[0].page_num, 1);
    assert_eq!(outcome.results[0].stage, SearchStage::Reranked);
    assert!(outcome.results[0].score > 0.0);
}

#[test]
fn accurate_mode_falls_back_to_rerank_without_patch_channel() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    // Patch channel disabled at ingest.
    let state = test_state(&dir.path().join("data"), false);
    ingest_root(&state, &corpus, false);
    assert_eq!(state.patches.page_count(), 0);

    let doc = &state.meta.list_documents().unwrap()[0];
    let rendered = state.settings.rendered_page_path(doc.doc_id, 0);
    let sketch = image::open(&rendered).unwrap();

    let outcome = search(
        &state,
        &SearchRequest {
            sketch,
            text_query: None,
            top_k: 5,
            mode: SearchMode::Accurate,
        },
    )
    .unwrap();

    assert_eq!(outcome.results[0].page_num, 0);
    assert_eq!(outcome.results[0].stage, SearchStage::Reranked);
}

#[test]
fn text_query_fuses_into_the_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);

    // A blank sketch gives the visual channel nothing to grab; the text
    // channel should still surface the op-amp page.
    let sketch = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        200,
        200,
        image::Rgb([255, 255, 255]),
    ));
    let outcome = search(
        &state,
        &SearchRequest {
            sketch,
            text_query: Some("circuit op amps".to_string()),
            top_k: 2,
            mode: SearchMode::Fast,
        },
    )
    .unwrap();

    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].page_num, 1);
}

#[test]
fn reingest_without_force_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);

    let docs_before = state.meta.document_count().unwrap();
    let pages_before = state.meta.page_count().unwrap();
    let vectors_before = state.dense.read().unwrap().len();

    let progress = ingest_root(&state, &corpus, false);
    assert_eq!(progress.docs_done, 0);
    assert_eq!(state.meta.document_count().unwrap(), docs_before);
    assert_eq!(state.meta.page_count().unwrap(), pages_before);
    assert_eq!(state.dense.read().unwrap().len(), vectors_before);
}

#[test]
fn adding_a_new_pdf_indexes_only_the_new_one() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(
        corpus.join("a.pdf"),
        synthetic_pdf(&[PageSpec {
            text: "first notebook",
            rect: (100, 400, 150, 100),
        }]),
    )
    .unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);
    assert_eq!(state.meta.document_count().unwrap(), 1);

    std::fs::write(
        corpus.join("b.pdf"),
        synthetic_pdf(&[PageSpec {
            text: "second notebook",
            rect: (300, 200, 120, 160),
        }]),
    )
    .unwrap();

    let progress = ingest_root(&state, &corpus, false);
    assert_eq!(progress.docs_done, 1);
    assert_eq!(state.meta.document_count().unwrap(), 2);
}

#[test]
fn removal_clears_every_surface() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(
        corpus.join("a.pdf"),
        synthetic_pdf(&[PageSpec {
            text: "keep me around",
            rect: (100, 400, 150, 100),
        }]),
    )
    .unwrap();
    std::fs::write(corpus.join("b.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);
    assert_eq!(state.meta.document_count().unwrap(), 2);

    let victim = state
        .meta
        .list_documents()
        .unwrap()
        .into_iter()
        .find(|d| d.path.ends_with("b.pdf"))
        .unwrap();
    let victim_pages = victim.num_pages as usize;
    let vectors_before = state.dense.read().unwrap().len();

    // A self-query currently ranks the victim first.
    let rendered = state.settings.rendered_page_path(victim.doc_id, 0);
    let sketch = image::open(&rendered).unwrap();
    let before = search(
        &state,
        &SearchRequest {
            sketch: sketch.clone(),
            text_query: None,
            top_k: 5,
            mode: SearchMode::Fast,
        },
    )
    .unwrap();
    assert_eq!(before.results[0].doc_id, victim.doc_id);

    assert!(doodle_scout::ingest::remove_document(&state, victim.doc_id).unwrap());

    assert_eq!(state.meta.document_count().unwrap(), 1);
    assert_eq!(
        state.dense.read().unwrap().len(),
        vectors_before - 5 * victim_pages
    );
    assert!(state.meta.get_document(victim.doc_id).unwrap().is_none());
    assert_eq!(state.patches.page_count(), 1);

    let after = search(
        &state,
        &SearchRequest {
            sketch,
            text_query: None,
            top_k: 5,
            mode: SearchMode::Fast,
        },
    )
    .unwrap();
    assert!(after.results.iter().all(|r| r.doc_id != victim.doc_id));
}

#[test]
fn persisted_state_answers_identically_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let data_dir = dir.path().join("data");
    let state = test_state(&data_dir, true);
    ingest_root(&state, &corpus, false);

    let doc = &state.meta.list_documents().unwrap()[0];
    let rendered = state.settings.rendered_page_path(doc.doc_id, 0);
    let sketch = image::open(&rendered).unwrap();
    let request = |sketch| SearchRequest {
        sketch,
        text_query: None,
        top_k: 10,
        mode: SearchMode::Fast,
    };

    let first = search(&state, &request(sketch.clone())).unwrap();
    drop(state);

    // Fresh bundle over the same data dir: bit-identical scores and ranking.
    let reloaded = test_state(&data_dir, true);
    let second = search(&reloaded, &request(sketch)).unwrap();

    assert_eq!(first.results.len(), second.results.len());
    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert_eq!(a.doc_id, b.doc_id);
        assert_eq!(a.page_num, b.page_num);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
}

#[test]
fn force_reindex_replaces_the_existing_document() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("notes.pdf"), synthetic_pdf(&two_page_specs())).unwrap();

    let state = test_state(&dir.path().join("data"), true);
    ingest_root(&state, &corpus, false);
    let first_id = state.meta.list_documents().unwrap()[0].doc_id;

    let progress = ingest_root(&state, &corpus, true);
    assert_eq!(progress.docs_done, 1);

    let docs = state.meta.list_documents().unwrap();
    assert_eq!(docs.len(), 1, "force reindex must not duplicate");
    assert_ne!(docs[0].doc_id, first_id, "reindex allocates a fresh doc id");
    assert_eq!(state.dense.read().unwrap().len(), 10);
}
