//! Blueprint generation service.
//!
//! Orchestrates the pipeline: quantize, optional region cleanup, palette
//! assembly, optional contour extraction, optional thread matching,
//! optional preview re-encoding. Owns the result cache keyed by a
//! canonical fingerprint of (image id, parameters); a per-fingerprint
//! build slot guarantees that concurrent callers materialize any given
//! fingerprint at most once.

use crate::cancel::CancellationToken;
use crate::catalog::{DeltaEMetric, ThreadCatalog, ThreadMatch};
use crate::codec::ImageCodec;
use crate::color::{self, LabColor};
use crate::error::{BlueprintError, Result};
use crate::preview;
use crate::quantize::{self, Quantization};
use crate::region::{self, ComponentMap};
use crate::rng::SeededRng;
use crate::store::{ImageRecord, ImageStore, StoreConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const FINGERPRINT_VERSION: u8 = 1;

const METHOD_DELTAE00: &str = "lab-kmeans-deltae00";
const METHOD_DELTAE76: &str = "lab-kmeans-deltae76";

fn default_max_dim() -> u32 {
    2048
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Blueprint generation parameters.
///
/// `palette_size` must be provided; everything else has a documented
/// default. `merge_small_regions` left unset follows `min_region_area > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintParams {
    pub palette_size: u32,
    #[serde(default = "default_max_dim")]
    pub max_dim: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub return_preview: bool,
    #[serde(default)]
    pub min_region_area: u32,
    #[serde(default)]
    pub merge_small_regions: Option<bool>,
    #[serde(default = "default_true")]
    pub include_thread_match: bool,
    #[serde(default)]
    pub return_regions: bool,
    /// Match threads with CIE76 instead of CIEDE2000.
    #[serde(default)]
    pub fast_match: bool,
}

impl BlueprintParams {
    pub fn new(palette_size: u32) -> Self {
        Self {
            palette_size,
            max_dim: default_max_dim(),
            seed: default_seed(),
            return_preview: false,
            min_region_area: 0,
            merge_small_regions: None,
            include_thread_match: true,
            return_regions: false,
            fast_match: false,
        }
    }

    pub fn merge_enabled(&self) -> bool {
        self.merge_small_regions
            .unwrap_or(self.min_region_area > 0)
    }

    fn match_metric(&self) -> DeltaEMetric {
        if self.fast_match {
            DeltaEMetric::Cie76
        } else {
            DeltaEMetric::Ciede2000
        }
    }

    fn method_tag(&self) -> &'static str {
        match self.match_metric() {
            DeltaEMetric::Ciede2000 => METHOD_DELTAE00,
            DeltaEMetric::Cie76 => METHOD_DELTAE76,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.palette_size == 0 {
            return Err(BlueprintError::invalid_parameter(
                "palette_size",
                "must be at least 1",
            ));
        }
        if self.max_dim == 0 {
            return Err(BlueprintError::invalid_parameter(
                "max_dim",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Thread match attached to one palette entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMatchResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<ThreadMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<ThreadMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteEntry {
    pub rgb: [u8; 3],
    pub hex: String,
    pub lab: [f64; 3],
    pub count: u64,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_match: Option<ThreadMatchResult>,
}

/// Bounding box with exclusive upper corner.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionBounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintRegion {
    pub label_index: u32,
    pub area_px: usize,
    pub bbox: RegionBounds,
    pub contours: Vec<Vec<[u32; 2]>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfStats {
    pub decode_ms: u64,
    pub quantize_ms: u64,
    pub merge_ms: u64,
    pub contour_ms: u64,
    pub total_ms: u64,
}

/// Complete result bundle for one (image, parameters) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub width: u32,
    pub height: u32,
    pub method: String,
    pub palette: Vec<PaletteEntry>,
    pub labels: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<BlueprintRegion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_png: Option<Vec<u8>>,
    pub perf: PerfStats,
}

/// Observable pipeline counters, mainly for cache-idempotence checks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ServiceStats {
    pub quantizer_runs: u64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub result_cache_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            result_cache_capacity: 20,
        }
    }
}

#[derive(Default)]
struct BuildSlot {
    done: AtomicBool,
    value: Mutex<Option<Arc<Blueprint>>>,
}

struct CacheEntry {
    slot: Arc<BuildSlot>,
    last_used: u64,
}

struct ResultCache {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
        }
    }

    /// Fetch or create the build slot for a fingerprint, then evict
    /// entries beyond capacity. A slot with an outstanding reference has a
    /// builder or reader attached and is skipped, which preserves
    /// at-most-one materialization.
    fn slot(&mut self, fingerprint: &str) -> Arc<BuildSlot> {
        self.tick += 1;
        let tick = self.tick;
        let slot = Arc::clone(
            &self
                .entries
                .entry(fingerprint.to_string())
                .and_modify(|e| e.last_used = tick)
                .or_insert_with(|| CacheEntry {
                    slot: Arc::new(BuildSlot::default()),
                    last_used: tick,
                })
                .slot,
        );

        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(key, entry)| {
                    key.as_str() != fingerprint
                        && (entry.slot.done.load(Ordering::SeqCst)
                            || Arc::strong_count(&entry.slot) == 1)
                })
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }

        slot
    }
}

pub struct BlueprintService {
    store: Arc<ImageStore>,
    catalog: Arc<ThreadCatalog>,
    codec: Arc<dyn ImageCodec>,
    cache: Mutex<ResultCache>,
    quantizer_runs: AtomicU64,
    cache_hits: AtomicU64,
}

impl BlueprintService {
    pub fn new(
        store: Arc<ImageStore>,
        catalog: Arc<ThreadCatalog>,
        codec: Arc<dyn ImageCodec>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            codec,
            cache: Mutex::new(ResultCache::new(config.result_cache_capacity)),
            quantizer_runs: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Service wired with the standard codec, a fresh store and the
    /// built-in DMC catalog.
    pub fn with_defaults() -> Self {
        let codec: Arc<dyn ImageCodec> = Arc::new(crate::codec::StandardCodec);
        let store = Arc::new(ImageStore::new(Arc::clone(&codec), StoreConfig::default()));
        Self::new(
            store,
            Arc::new(ThreadCatalog::builtin().clone()),
            codec,
            ServiceConfig::default(),
        )
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            quantizer_runs: self.quantizer_runs.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
        }
    }

    /// Register raw image bytes, returning the stable image id.
    pub fn register_image(&self, bytes: &[u8], max_dim: u32) -> Result<String> {
        self.store.register(bytes, max_dim)
    }

    /// Nearest catalog threads for an sRGB color, ascending by CIEDE2000.
    pub fn match_rgb(&self, rgb: [u8; 3], top_n: usize) -> Vec<ThreadMatch> {
        self.catalog
            .nearest(color::srgb_to_lab(rgb), top_n, DeltaEMetric::Ciede2000)
    }

    /// Nearest catalog threads for a Lab color, ascending by CIEDE2000.
    pub fn match_lab(&self, lab: [f64; 3], top_n: usize) -> Vec<ThreadMatch> {
        self.catalog.nearest(
            LabColor::new(lab[0], lab[1], lab[2]),
            top_n,
            DeltaEMetric::Ciede2000,
        )
    }

    /// Generate (or fetch from cache) the blueprint for an image.
    pub fn generate(
        &self,
        image_id: &str,
        params: &BlueprintParams,
        token: &CancellationToken,
    ) -> Result<Arc<Blueprint>> {
        params.validate()?;

        // Pin the record before entering the build slot so the pipeline
        // holds no other lock while building.
        let record = self.store.get(image_id)?;
        let fingerprint = fingerprint(image_id, params);

        let slot = self
            .cache
            .lock()
            .expect("result cache poisoned")
            .slot(&fingerprint);

        let mut value = slot.value.lock().expect("build slot poisoned");
        if let Some(cached) = value.as_ref() {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            log::debug!("blueprint cache hit for {}", &fingerprint[..12]);
            return Ok(Arc::clone(cached));
        }

        let built = Arc::new(self.run_pipeline(&record, params, token)?);
        *value = Some(Arc::clone(&built));
        slot.done.store(true, Ordering::SeqCst);
        Ok(built)
    }

    fn run_pipeline(
        &self,
        record: &ImageRecord,
        params: &BlueprintParams,
        token: &CancellationToken,
    ) -> Result<Blueprint> {
        let t_total = Instant::now();
        let mut perf = PerfStats::default();

        // The stored record already fits its registration cap; a tighter
        // per-request cap shrinks the working image again.
        let t_decode = Instant::now();
        let resized;
        let (rgba, width, height) = if record.width.max(record.height) > params.max_dim {
            resized = self
                .codec
                .resize(&record.rgba, record.width, record.height, params.max_dim)?;
            (resized.rgba.as_slice(), resized.width, resized.height)
        } else {
            (record.rgba.as_slice(), record.width, record.height)
        };
        perf.decode_ms = t_decode.elapsed().as_millis() as u64;
        token.checkpoint("decode")?;

        let total_px = width as u64 * height as u64;

        // Alpha is carried by the buffer but ignored by all color math.
        let labs: Vec<LabColor> = rgba
            .par_chunks_exact(4)
            .map(|p| color::srgb_to_lab([p[0], p[1], p[2]]))
            .collect();

        let t_quantize = Instant::now();
        self.quantizer_runs.fetch_add(1, Ordering::SeqCst);
        let mut rng = SeededRng::new(params.seed);
        let Quantization {
            centroids,
            mut labels,
        } = quantize::kmeans(
            &labs,
            params.palette_size as usize,
            &mut rng,
            quantize::DEFAULT_MAX_ITERATIONS,
        )?;
        perf.quantize_ms = t_quantize.elapsed().as_millis() as u64;
        token.checkpoint("quantize")?;

        if params.merge_enabled() && params.min_region_area > 0 {
            let t_merge = Instant::now();
            let mut map = region::label_components(&labels, width as usize, height as usize);
            region::merge_small_regions(&mut map, &mut labels, params.min_region_area as usize);
            perf.merge_ms = t_merge.elapsed().as_millis() as u64;
        }
        token.checkpoint("merge")?;

        let mut palette = assemble_palette(&centroids, &mut labels, rgba, total_px);
        if params.include_thread_match {
            let metric = params.match_metric();
            for entry in &mut palette {
                let lab = LabColor::new(entry.lab[0], entry.lab[1], entry.lab[2]);
                let mut matches = self.catalog.nearest(lab, 1, metric);
                entry.thread_match = Some(ThreadMatchResult {
                    ok: !matches.is_empty(),
                    best: matches.pop(),
                    alternatives: Vec::new(),
                });
            }
        }

        let regions = if params.return_regions {
            let t_contour = Instant::now();
            let map = region::label_components(&labels, width as usize, height as usize);
            let extracted = extract_regions(&map, width as usize, height as usize);
            perf.contour_ms = t_contour.elapsed().as_millis() as u64;
            token.checkpoint("contour")?;
            Some(extracted)
        } else {
            None
        };

        let preview_png = if params.return_preview {
            let label_colors: Vec<[u8; 3]> = palette.iter().map(|e| e.rgb).collect();
            let bytes =
                preview::encode_preview(self.codec.as_ref(), &labels, &label_colors, width, height)?;
            token.checkpoint("preview")?;
            Some(bytes)
        } else {
            None
        };

        perf.total_ms = t_total.elapsed().as_millis() as u64;
        log::info!(
            "blueprint generated: {}x{}, {} colors, merge={}, regions={}, preview={}, {}ms",
            width,
            height,
            palette.len(),
            params.merge_enabled(),
            params.return_regions,
            params.return_preview,
            perf.total_ms
        );

        Ok(Blueprint {
            width,
            height,
            method: params.method_tag().to_string(),
            palette,
            labels,
            regions,
            preview_png,
            perf,
        })
    }
}

/// Accumulate per-cluster RGB statistics, drop empty clusters, sort the
/// palette descending by count and remap the label vector to match.
fn assemble_palette(
    centroids: &[LabColor],
    labels: &mut [u32],
    rgba: &[u8],
    total_px: u64,
) -> Vec<PaletteEntry> {
    let k = centroids.len();
    let mut counts = vec![0u64; k];
    let mut sums = vec![[0u64; 3]; k];

    for (pixel, &label) in rgba.chunks_exact(4).zip(labels.iter()) {
        let cluster = label as usize;
        counts[cluster] += 1;
        sums[cluster][0] += pixel[0] as u64;
        sums[cluster][1] += pixel[1] as u64;
        sums[cluster][2] += pixel[2] as u64;
    }

    let mut order: Vec<usize> = (0..k).filter(|&i| counts[i] > 0).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));

    let mut remap = vec![u32::MAX; k];
    let mut palette = Vec::with_capacity(order.len());
    for (new_index, &cluster) in order.iter().enumerate() {
        remap[cluster] = new_index as u32;
        let count = counts[cluster];
        let rgb = [
            (sums[cluster][0] as f64 / count as f64).round() as u8,
            (sums[cluster][1] as f64 / count as f64).round() as u8,
            (sums[cluster][2] as f64 / count as f64).round() as u8,
        ];
        let centroid = centroids[cluster];
        palette.push(PaletteEntry {
            rgb,
            hex: color::rgb_to_hex(rgb),
            lab: [centroid.l, centroid.a, centroid.b],
            count,
            percent: count as f64 * 100.0 / total_px as f64,
            thread_match: None,
        });
    }

    for label in labels.iter_mut() {
        *label = remap[*label as usize];
    }

    palette
}

fn extract_regions(map: &ComponentMap, width: usize, height: usize) -> Vec<BlueprintRegion> {
    map.regions
        .iter()
        .filter(|r| !r.pixels.is_empty())
        .map(|r| BlueprintRegion {
            label_index: r.label,
            area_px: r.area(),
            bbox: RegionBounds {
                x0: r.min_x as u32,
                y0: r.min_y as u32,
                x1: (r.max_x + 1) as u32,
                y1: (r.max_y + 1) as u32,
            },
            contours: region::trace_region_contours(&map.region_ids, width, height, r),
        })
        .collect()
}

/// Canonical fingerprint over the image id and every parameter.
fn fingerprint(image_id: &str, params: &BlueprintParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update([FINGERPRINT_VERSION]);
    hasher.update(image_id.as_bytes());
    hasher.update(params.palette_size.to_le_bytes());
    hasher.update(params.max_dim.to_le_bytes());
    hasher.update(params.seed.to_le_bytes());
    hasher.update([params.return_preview as u8]);
    hasher.update(params.min_region_area.to_le_bytes());
    hasher.update([params.merge_enabled() as u8]);
    hasher.update([params.include_thread_match as u8]);
    hasher.update([params.return_regions as u8]);
    hasher.update([params.fast_match as u8]);
    format!("{:x}", hasher.finalize())
}
