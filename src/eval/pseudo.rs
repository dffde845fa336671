use std::collections::BTreeMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::core::error::{Result, ScoutError};
use crate::core::types::PageKey;

/// Pseudo-query generation parameters. Seeded, so a given corpus + config
/// always yields the same query set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudoQueryConfig {
    pub num_queries: usize,
    pub min_crop_ratio: f32,
    pub max_crop_ratio: f32,
    pub seed: u64,
    pub exclude_margins_pct: f32,
}

impl Default for PseudoQueryConfig {
    fn default() -> Self {
        Self {
            num_queries: 100,
            min_crop_ratio: 0.15,
            max_crop_ratio: 0.40,
            seed: 42,
            exclude_margins_pct: 0.05,
        }
    }
}

/// One generated query: a crop of a known page, so the ground truth is the
/// page it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudoQuery {
    pub query_id: String,
    pub doc_id: Uuid,
    pub page_num: u32,
    /// `[x0, y0, x1, y1]` in rendered-page pixels.
    pub crop_box: [u32; 4],
}

#[derive(Serialize, Deserialize)]
struct PseudoManifest {
    version: u32,
    config: PseudoQueryConfig,
    num_queries: usize,
    generated_at: String,
}

/// Generate pseudo-queries by cropping random square regions out of indexed
/// pages. Crop PNGs, a manifest, and the ground-truth map land under
/// `output_dir`.
pub fn generate_pseudo_queries(
    state: &AppState,
    config: &PseudoQueryConfig,
    output_dir: &Path,
) -> Result<Vec<PseudoQuery>> {
    let queries_dir = output_dir.join("queries");
    std::fs::create_dir_all(&queries_dir)?;

    let mut pages = state.meta.all_pages()?;
    if pages.len() < config.num_queries {
        return Err(ScoutError::Input(format!(
            "not enough indexed pages ({}) for {} pseudo-queries",
            pages.len(),
            config.num_queries
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    pages.shuffle(&mut rng);

    let mut queries = Vec::with_capacity(config.num_queries);
    for (i, page) in pages.iter().take(config.num_queries).enumerate() {
        let query_id = format!("q{i:04}");
        let page_path = state
            .settings
            .rendered_page_path(page.doc_id, page.page_num);
        if !page_path.exists() {
            warn!(
                "rendered page missing, skipping pseudo-query source: {}",
                page_path.display()
            );
            continue;
        }

        let img = image::open(&page_path)?.to_rgb8();
        let (w, h) = img.dimensions();

        // Square crop with side ratio·min(W, H), placed anywhere inside the
        // page minus the margin band.
        let ratio = rng.gen_range(config.min_crop_ratio..=config.max_crop_ratio);
        let side = ((w.min(h) as f32 * ratio) as u32).max(1);
        let margin_x = (w as f32 * config.exclude_margins_pct) as u32;
        let margin_y = (h as f32 * config.exclude_margins_pct) as u32;

        let max_x = w.saturating_sub(margin_x + side).max(margin_x);
        let max_y = h.saturating_sub(margin_y + side).max(margin_y);
        let x0 = if max_x > margin_x {
            rng.gen_range(margin_x..=max_x)
        } else {
            margin_x.min(w.saturating_sub(side))
        };
        let y0 = if max_y > margin_y {
            rng.gen_range(margin_y..=max_y)
        } else {
            margin_y.min(h.saturating_sub(side))
        };
        let side_x = side.min(w - x0);
        let side_y = side.min(h - y0);

        let crop = image::imageops::crop_imm(&img, x0, y0, side_x, side_y).to_image();
        crop.save(queries_dir.join(format!("{query_id}.png")))?;

        queries.push(PseudoQuery {
            query_id,
            doc_id: page.doc_id,
            page_num: page.page_num,
            crop_box: [x0, y0, x0 + side_x, y0 + side_y],
        });
    }

    save_manifest(output_dir, config, queries.len())?;
    save_ground_truth(output_dir, &queries)?;
    info!(count = queries.len(), "pseudo-queries generated");
    Ok(queries)
}

fn save_manifest(output_dir: &Path, config: &PseudoQueryConfig, count: usize) -> Result<()> {
    let manifest = PseudoManifest {
        version: 1,
        config: config.clone(),
        num_queries: count,
        generated_at: chrono::Utc::now().to_rfc3339(),
    };
    std::fs::write(
        output_dir.join("manifest.json"),
        serde_json::to_vec_pretty(&manifest)?,
    )?;
    Ok(())
}

fn save_ground_truth(output_dir: &Path, queries: &[PseudoQuery]) -> Result<()> {
    let map: BTreeMap<&str, &PseudoQuery> = queries
        .iter()
        .map(|q| (q.query_id.as_str(), q))
        .collect();
    std::fs::write(
        output_dir.join("ground_truth.json"),
        serde_json::to_vec_pretty(&map)?,
    )?;
    Ok(())
}

/// Load the ground-truth map written by a previous generation run.
pub fn load_ground_truth(pseudo_dir: &Path) -> Result<Vec<PseudoQuery>> {
    let bytes = std::fs::read(pseudo_dir.join("ground_truth.json"))?;
    let map: BTreeMap<String, PseudoQuery> = serde_json::from_slice(&bytes)?;
    Ok(map.into_values().collect())
}

impl PseudoQuery {
    pub fn page_key(&self) -> PageKey {
        PageKey::new(self.doc_id, self.page_num)
    }
}
