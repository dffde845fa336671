//! PDF page rendering and text-layer extraction.
//!
//! Rasterization goes through the pure-Rust `hayro` interpreter; the embedded
//! text layer comes from `lopdf`. The rest of the engine only ever sees RGB
//! bitmaps and optional strings, so a different renderer can be swapped in
//! behind this module without touching the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hayro::{InterpreterSettings, RenderSettings};
use hayro_syntax::Pdf;
use image::RgbImage;
use tracing::debug;

use crate::core::error::{Result, ScoutError};

/// PDF units are 1/72 inch.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// An opened PDF, ready for per-page rasterization and text extraction.
pub struct PdfDocument {
    path: PathBuf,
    pdf: Pdf,
    /// Parsed separately for the text layer; a PDF that rasterizes fine but
    /// trips lopdf simply has no text layer.
    text_doc: Option<lopdf::Document>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(path.to_path_buf(), bytes)
    }

    pub fn from_bytes(path: PathBuf, bytes: Vec<u8>) -> Result<Self> {
        let text_doc = match lopdf::Document::load_mem(&bytes) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!("no text layer for {}: {e}", path.display());
                None
            }
        };

        let data: Arc<dyn AsRef<[u8]> + Send + Sync> = Arc::new(bytes);
        let pdf = Pdf::new(data).map_err(|e| {
            ScoutError::Input(format!("cannot parse PDF {}: {e:?}", path.display()))
        })?;

        Ok(Self {
            path,
            pdf,
            text_doc,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pdf.pages().len()
    }

    /// Rasterize one 0-based page at the given DPI into an RGB bitmap,
    /// composited onto white.
    pub fn render_page(&self, page_num: usize, dpi: u32) -> Result<RgbImage> {
        let pages = self.pdf.pages();
        let page = pages.get(page_num).ok_or_else(|| ScoutError::PageRender {
            path: self.path.clone(),
            page: page_num,
            reason: format!("page index out of range (document has {})", pages.len()),
        })?;

        let (pt_w, pt_h) = page.render_dimensions();
        let scale = dpi as f32 / PDF_POINTS_PER_INCH;
        let width = clamp_px(pt_w * scale);
        let height = clamp_px(pt_h * scale);

        let interpreter_settings = InterpreterSettings::default();
        let render_settings = RenderSettings {
            x_scale: scale,
            y_scale: scale,
            width: Some(width),
            height: Some(height),
        };

        let pixmap = hayro::render(page, &interpreter_settings, &render_settings);
        let rgba = pixmap.take_u8();

        rgba_to_rgb_on_white(width as u32, height as u32, &rgba).ok_or_else(|| {
            ScoutError::PageRender {
                path: self.path.clone(),
                page: page_num,
                reason: "rasterizer returned a malformed pixel buffer".to_string(),
            }
        })
    }

    /// Embedded text of one 0-based page, if any. Whitespace-only layers
    /// count as absent.
    pub fn extract_text(&self, page_num: usize) -> Option<String> {
        let doc = self.text_doc.as_ref()?;
        // lopdf numbers pages from 1.
        let text = doc.extract_text(&[page_num as u32 + 1]).ok()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

fn clamp_px(v: f32) -> u16 {
    v.round().clamp(1.0, u16::MAX as f32) as u16
}

fn rgba_to_rgb_on_white(width: u32, height: u32, rgba: &[u8]) -> Option<RgbImage> {
    if rgba.len() != (width as usize) * (height as usize) * 4 {
        return None;
    }
    let mut out = RgbImage::new(width, height);
    for (chunk, dst) in rgba.chunks_exact(4).zip(out.pixels_mut()) {
        let [r, g, b, a] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let alpha = a as u16;
        let blend = |c: u8| -> u8 { ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8 };
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    Some(out)
}
