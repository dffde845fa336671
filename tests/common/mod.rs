//! Shared helpers for integration tests: synthetic PDF generation and
//! engine bundles over temp directories.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};

use doodle_scout::ingest::{progress_channel, run_ingest, Progress};
use doodle_scout::{AppState, Settings};

/// One synthetic page: a text line plus a filled rectangle whose position
/// makes the page visually distinct.
pub struct PageSpec {
    pub text: &'static str,
    /// Rectangle `(x, y, w, h)` in PDF points.
    pub rect: (i64, i64, i64, i64),
}

/// Build a multi-page PDF with per-page ink layouts. US letter pages.
pub fn synthetic_pdf(pages: &[PageSpec]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for spec in pages {
        let (x, y, w, h) = spec.rect;
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(spec.text)]),
                Operation::new("ET", vec![]),
                Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
                Operation::new("f", vec![]),
                // A second stroked box keeps some ink away from the fill.
                Operation::new(
                    "re",
                    vec![(x / 2).into(), (y / 2).into(), 80.into(), 40.into()],
                ),
                Operation::new("S", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("serialize pdf");
    buf
}

/// Engine bundle over a temp data dir. Low DPI keeps rendering fast.
pub fn test_state(data_dir: &Path, multi_vector: bool) -> Arc<AppState> {
    let settings = Settings {
        data_dir: data_dir.to_path_buf(),
        render_dpi: 72,
        multi_vector_enabled: multi_vector,
        ..Settings::default()
    };
    Arc::new(AppState::initialize(settings).expect("initialize engine"))
}

/// Run a full blocking ingest over `root` and return the final progress.
pub fn ingest_root(state: &AppState, root: &Path, force: bool) -> Progress {
    let (tx, _rx) = progress_channel();
    let cancel = AtomicBool::new(false);
    run_ingest(state, root, force, &tx, &cancel).expect("ingest")
}
