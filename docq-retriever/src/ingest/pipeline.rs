//! End-to-end ingestion: one document in, one searchable index out.
//!
//! The stages run strictly in sequence. Text chunking and abbreviation
//! resolution come first, then figure detection and analysis, then fusion
//! and indexing. Intermediate artifacts (resolved definitions, page images,
//! figure summaries) are written under the configured base directory so a
//! re-run can be inspected; an artifact write failure is logged and does not
//! abort the run, because the fused units are already in memory.

use crate::document::DocumentSource;
use crate::generation::GenerationService;
use crate::index::IndexManager;
use crate::ingest::abbreviations::{
    self, AbbreviationResolver, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE,
};
use crate::ingest::figures::{
    self, CALLS_PER_MINUTE, FigureAnalyzer, MIN_DRAWING_ELEMENTS, ZOOM_FACTOR,
};
use crate::ingest::fuser;
use anyhow::Result;
use docq_context::{ChunkBuilder, DEFAULT_MAX_CHUNK_LENGTH, DEFAULT_OVERLAP, DOCUMENT_DELIMITERS};
use docq_embed::EmbeddingProvider;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs and artifact locations for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory all artifacts and the index live under.
    pub base_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_drawing_elements: usize,
    pub zoom: f32,
    pub abbrev_batch_size: usize,
    pub abbrev_batch_delay: Duration,
    pub figure_call_interval: Duration,
}

impl IngestConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            chunk_size: DEFAULT_MAX_CHUNK_LENGTH,
            chunk_overlap: DEFAULT_OVERLAP,
            min_drawing_elements: MIN_DRAWING_ELEMENTS,
            zoom: ZOOM_FACTOR,
            abbrev_batch_size: DEFAULT_BATCH_SIZE,
            abbrev_batch_delay: DEFAULT_BATCH_DELAY,
            figure_call_interval: Duration::from_secs_f64(60.0 / CALLS_PER_MINUTE as f64),
        }
    }

    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_abbreviation_pacing(mut self, batch_size: usize, delay: Duration) -> Self {
        self.abbrev_batch_size = batch_size;
        self.abbrev_batch_delay = delay;
        self
    }

    pub fn with_figure_call_interval(mut self, interval: Duration) -> Self {
        self.figure_call_interval = interval;
        self
    }

    pub fn index_dir(&self) -> PathBuf {
        self.base_dir.join("index")
    }

    pub fn definitions_path(&self) -> PathBuf {
        self.base_dir.join("definitions.json")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.base_dir.join("figures")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.base_dir.join("figures_summary.json")
    }
}

/// Counters from one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages: u32,
    pub abbreviations_found: usize,
    pub abbreviations_resolved: usize,
    pub figure_pages: usize,
    pub text_units: usize,
    pub figure_units: usize,
    pub indexed_units: usize,
}

/// Runs the full ingestion sequence against one document.
pub struct IngestPipeline {
    config: IngestConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    service: Arc<dyn GenerationService>,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        service: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            config,
            embedder,
            service,
        }
    }

    /// Ingest `source` into the index under the configured base directory.
    ///
    /// With `force_reindex` the index is rebuilt from this document alone;
    /// otherwise the document's units are merged into the existing index,
    /// or a fresh one is built if none exists yet.
    pub async fn ingest(
        &self,
        source: &dyn DocumentSource,
        force_reindex: bool,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            pages: source.page_count(),
            ..IngestReport::default()
        };
        tracing::info!("Ingesting '{}' ({} pages)", source.name(), report.pages);

        // Stage 1: chunk every page, carrying source and page provenance.
        let builder_for = |page| {
            ChunkBuilder::new(
                source.name().to_string(),
                page,
                DOCUMENT_DELIMITERS,
                self.config.chunk_size,
                self.config.chunk_overlap,
            )
        };
        let mut chunks = Vec::new();
        let mut full_text = String::new();
        for page in 1..=report.pages {
            let text = source.page_text(page)?;
            chunks.extend(builder_for(page).get_chunks(&text));
            full_text.push_str(&text);
            full_text.push('\n');
        }
        tracing::info!("{} text chunk(s) from {} page(s)", chunks.len(), report.pages);

        // Stage 2: resolve abbreviations over the whole document text and
        // inline the successful definitions back into the chunks.
        let candidates = abbreviations::extract_candidates(&full_text);
        report.abbreviations_found = candidates.len();
        let resolved = AbbreviationResolver::new(Arc::clone(&self.service))
            .with_batch_size(self.config.abbrev_batch_size)
            .with_inter_batch_delay(self.config.abbrev_batch_delay)
            .resolve(&candidates)
            .await;
        if let Err(error) =
            abbreviations::save_definitions(&resolved, &self.config.definitions_path()).await
        {
            tracing::warn!("Could not save abbreviation definitions: {error}");
        }
        let definitions: BTreeMap<String, String> = resolved
            .into_iter()
            .filter_map(|(abbreviation, definition)| {
                definition.map(|definition| (abbreviation, definition))
            })
            .collect();
        report.abbreviations_resolved = definitions.len();
        fuser::inline_definitions(&mut chunks, &definitions);

        // Stage 3: detect figure pages, rasterize them, analyze the images.
        let figure_pages =
            figures::detect_figure_pages(source, self.config.min_drawing_elements)?;
        report.figure_pages = figure_pages.len();
        let images = figures::save_page_images(
            source,
            &figure_pages,
            &self.config.figures_dir(),
            self.config.zoom,
        )?;
        let analyses = FigureAnalyzer::with_min_interval(
            Arc::clone(&self.service),
            self.config.figure_call_interval,
        )
        .analyze_images(&images)
        .await;
        // Fusion consumes the persisted summary rather than the in-memory
        // analyses, so the fuse-and-index steps can be re-driven from a
        // summary written by an earlier run. The in-memory result is only
        // kept when the artifact cannot be written or read back.
        let analyses = match figures::save_summary(&analyses, &self.config.summary_path()).await {
            Ok(()) => match figures::load_summary(&self.config.summary_path()).await {
                Ok(loaded) => loaded,
                Err(error) => {
                    tracing::warn!("Could not reload figure summary: {error}");
                    analyses
                }
            },
            Err(error) => {
                tracing::warn!("Could not save figure summary: {error}");
                analyses
            }
        };

        // Stage 4: fuse and index.
        let units = fuser::fuse(&chunks, &analyses);
        report.figure_units = units.iter().filter(|unit| unit.is_figure()).count();
        report.text_units = units.len() - report.figure_units;

        let mut index =
            IndexManager::open(&self.config.index_dir(), Arc::clone(&self.embedder)).await?;
        report.indexed_units = index.build_or_merge(&units, force_reindex).await?;

        tracing::info!(
            "Ingestion complete: {} text unit(s), {} figure unit(s), {} indexed",
            report.text_units,
            report.figure_units,
            report.indexed_units
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_hang_off_the_base_dir() {
        let config = IngestConfig::new("/tmp/docq");
        assert_eq!(config.index_dir(), PathBuf::from("/tmp/docq/index"));
        assert_eq!(
            config.definitions_path(),
            PathBuf::from("/tmp/docq/definitions.json")
        );
        assert_eq!(config.figures_dir(), PathBuf::from("/tmp/docq/figures"));
        assert_eq!(
            config.summary_path(),
            PathBuf::from("/tmp/docq/figures_summary.json")
        );
    }

    #[test]
    fn defaults_match_the_documented_budget() {
        let config = IngestConfig::new(".");
        assert_eq!(config.chunk_size, 450);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.min_drawing_elements, 15);
        assert_eq!(config.abbrev_batch_size, 10);
        assert_eq!(config.figure_call_interval, Duration::from_secs(4));
    }
}
