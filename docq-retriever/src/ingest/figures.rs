//! Figure detection and analysis.
//!
//! Detection is a deliberate heuristic conjunction, not a classifier: a page
//! qualifies only when it carries enough vector-drawing elements AND its text
//! mentions "figure". Qualifying pages are rasterized to `page_{n}.png` so
//! the page number survives into the analysis artifact. Each image goes to
//! the vision-capable generation service under a minimum inter-call interval;
//! a failed call or unparsable response skips that image and processing
//! continues. Per-image best effort, no retries.

use crate::document::DocumentSource;
use crate::generation::GenerationService;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// Default drawing-element threshold for detection.
pub const MIN_DRAWING_ELEMENTS: usize = 15;

/// Zoom factor for page rasterization.
pub const ZOOM_FACTOR: f32 = 3.0;

/// Vision-call budget the default interval is derived from.
pub const CALLS_PER_MINUTE: u32 = 15;

const FIGURE_PROMPT: &str = "You are a data analyst. Analyze the figure(s) in this image.\n\
    Return STRICTLY a JSON array of figures (even if there is only one).\n\
    Each element must have exactly this structure:\n\
    {\n\
      \"title\": string | null,\n\
      \"chart_type\": string | null,\n\
      \"axes\": {\n\
        \"x\": { \"label\": string | null, \"unit\": string | null },\n\
        \"y\": { \"label\": string | null, \"unit\": string | null }\n\
      },\n\
      \"series\": [ { \"label\": string | null, \"trend\": string | null } ],\n\
      \"key_values\": [string],\n\
      \"summary\": string\n\
    }\n\
    Use null for missing information. Return ONLY the JSON array, no extra text.";

/// One axis description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisLabel {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Both chart axes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    #[serde(default)]
    pub x: AxisLabel,
    #[serde(default)]
    pub y: AxisLabel,
}

/// One data series in a chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub trend: Option<String>,
}

/// Structured description of one figure, every field tolerant of absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FigureFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub axes: Axes,
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
    #[serde(default)]
    pub key_values: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One analyzed figure with its provenance. A single page image can yield
/// several of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureAnalysis {
    pub source_page: Option<u32>,
    pub image_path: PathBuf,
    pub figure_index_in_image: usize,
    pub analysis: FigureFields,
}

/// The response shapes the vision service has been observed to produce,
/// tried in declaration order: an object wrapping a `figures` array, a bare
/// object standing for one figure, or a bare array. Anything else is a
/// malformed response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FigureResponse {
    Wrapped { figures: Vec<FigureFields> },
    Single(Box<FigureFields>),
    Array(Vec<FigureFields>),
}

impl FigureResponse {
    fn into_figures(self) -> Vec<FigureFields> {
        match self {
            FigureResponse::Wrapped { figures } => figures,
            FigureResponse::Single(figure) => vec![*figure],
            FigureResponse::Array(figures) => figures,
        }
    }
}

/// Parse a vision response into figure descriptions, stripping any markdown
/// code fences first.
fn parse_figure_response(raw: &str) -> Result<Vec<FigureFields>> {
    let clean = raw.replace("```json", "").replace("```", "");
    let response: FigureResponse = serde_json::from_str(clean.trim())
        .context("unrecognized figure response shape")?;
    Ok(response.into_figures())
}

/// Pages likely to contain figures: drawing-element count ≥ threshold AND
/// the page text contains "figure" (case-insensitive). Both conditions are
/// required.
pub fn detect_figure_pages(
    source: &dyn DocumentSource,
    min_drawing_elements: usize,
) -> Result<Vec<u32>> {
    let mut pages = Vec::new();
    for page in 1..=source.page_count() {
        if source.drawing_count(page)? < min_drawing_elements {
            continue;
        }
        if !source.page_text(page)?.to_lowercase().contains("figure") {
            continue;
        }
        tracing::info!("Page {page}: potential figure detected");
        pages.push(page);
    }
    Ok(pages)
}

/// Rasterize the given pages into `out_dir` as `page_{n}.png`.
///
/// A page that fails to render is logged and skipped; the remaining pages
/// are still saved.
pub fn save_page_images(
    source: &dyn DocumentSource,
    pages: &[u32],
    out_dir: &Path,
    zoom: f32,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating image directory {}", out_dir.display()))?;

    let mut saved = Vec::new();
    for &page in pages {
        let png = match source.render_page_png(page, zoom) {
            Ok(png) => png,
            Err(error) => {
                tracing::warn!("Failed to render page {page}: {error}");
                continue;
            }
        };
        let path = out_dir.join(format!("page_{page}.png"));
        if let Err(error) = std::fs::write(&path, &png) {
            tracing::warn!("Failed to save page {page} image: {error}");
            continue;
        }
        saved.push(path);
    }

    tracing::info!("{} page image(s) saved to {}", saved.len(), out_dir.display());
    Ok(saved)
}

/// Recover the page number from a `page_{n}` image filename.
fn page_number_from_filename(stem: &str) -> Option<u32> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"page_(\d+)").unwrap());
    pattern
        .captures(stem)
        .and_then(|captures| captures[1].parse().ok())
}

/// Enforces a minimum interval between successive external calls.
///
/// Owned by the analyzer instance, never process-global. The interval is
/// measured from the completion timestamp of the previous call, independent
/// of per-call latency.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Limiter for a calls-per-minute budget.
    pub fn per_minute(calls: u32) -> Self {
        Self::new(Duration::from_secs_f64(60.0 / calls.max(1) as f64))
    }

    /// Sleep out whatever remains of the interval since the last completed
    /// call. The first call never waits.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!("Rate limit: waiting {:.2}s before next call", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Record that a call just completed.
    pub fn mark(&mut self) {
        self.last_call = Some(Instant::now());
    }
}

/// Sends page images to the vision service and collects figure analyses.
pub struct FigureAnalyzer {
    service: Arc<dyn GenerationService>,
    limiter: RateLimiter,
}

impl FigureAnalyzer {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            limiter: RateLimiter::per_minute(CALLS_PER_MINUTE),
        }
    }

    pub fn with_min_interval(service: Arc<dyn GenerationService>, interval: Duration) -> Self {
        Self {
            service,
            limiter: RateLimiter::new(interval),
        }
    }

    /// Analyze each saved page image in sequence.
    ///
    /// Call failures, unreadable files, and malformed responses skip the
    /// affected image; everything that parsed is returned.
    pub async fn analyze_images(&mut self, images: &[PathBuf]) -> Vec<FigureAnalysis> {
        let mut analyses = Vec::new();

        for image in images {
            let page = image
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(page_number_from_filename);

            let bytes = match tokio::fs::read(image).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!("Skipping unreadable image {}: {error}", image.display());
                    continue;
                }
            };

            self.limiter.acquire().await;
            let response = self.service.generate_with_image(FIGURE_PROMPT, &bytes).await;
            self.limiter.mark();

            let figures = match response
                .map_err(anyhow::Error::from)
                .and_then(|raw| parse_figure_response(&raw))
            {
                Ok(figures) => figures,
                Err(error) => {
                    tracing::warn!("Skipping image {}: {error}", image.display());
                    continue;
                }
            };

            tracing::info!("{}: {} figure(s)", image.display(), figures.len());
            for (index, fields) in figures.into_iter().enumerate() {
                analyses.push(FigureAnalysis {
                    source_page: page,
                    image_path: image.clone(),
                    figure_index_in_image: index,
                    analysis: fields,
                });
            }
        }

        analyses
    }
}

/// Persist all analyses as one JSON array so fusion can re-run without new
/// vision calls.
pub async fn save_summary(analyses: &[FigureAnalysis], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(analyses)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing figure summary to {}", path.display()))?;
    Ok(())
}

/// Reload a previously saved summary. A missing file is an empty corpus,
/// not an error.
pub async fn load_summary(path: &Path) -> Result<Vec<FigureAnalysis>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading figure summary from {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}
