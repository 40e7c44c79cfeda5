//! End-to-end pipeline tests over a synthetic extracted document, with a
//! deterministic bag-of-words embedder and a scripted generation service in
//! place of the real model and API.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use docq_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use docq_retriever::document::{ExtractedDocument, ExtractedPage};
use docq_retriever::generation::{GenerationError, GenerationService};
use docq_retriever::index::{IndexError, IndexManager};
use docq_retriever::ingest::{IngestConfig, IngestPipeline};
use docq_retriever::query::QueryAnswerer;
use half::f16;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DIMENSION: usize = 64;

/// Token-count embedder: texts sharing words get similar vectors, which is
/// enough signal for retrieval ordering in tests.
struct BagOfWordsEmbedder;

fn embed(text: &str) -> Vec<f16> {
    let mut counts = vec![0.0f32; DIMENSION];
    for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        counts[(hasher.finish() as usize) % DIMENSION] += 1.0;
    }
    counts.into_iter().map(f16::from_f32).collect()
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>, EmbedError> {
        Ok(embed(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult, EmbedError> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| embed(text)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        DIMENSION
    }

    fn provider_name(&self) -> &str {
        "bag-of-words"
    }
}

/// Routes prompts by stage: abbreviation batches get a definition array,
/// answering prompts get a canned answer, image calls get a figure analysis.
struct StageService;

#[async_trait]
impl GenerationService for StageService {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.starts_with("Here is a list of abbreviations") {
            Ok(r#"[{"abbreviation": "ECB", "definition": "European Central Bank"}]"#.to_string())
        } else if prompt.starts_with("Context:") {
            Ok("The ECB stands for European Central Bank.".to_string())
        } else {
            panic!("unexpected prompt: {prompt}");
        }
    }

    async fn generate_with_image(
        &self,
        _prompt: &str,
        image_png: &[u8],
    ) -> Result<String, GenerationError> {
        assert_eq!(image_png, b"png-bytes");
        Ok(r#"[{"title": "Inflation", "chart_type": "line",
               "summary": "Inflation rises through 2024."}]"#
            .to_string())
    }
}

fn sample_document() -> ExtractedDocument {
    ExtractedDocument {
        name: "report.pdf".to_string(),
        pages: vec![
            ExtractedPage {
                text: "The European Central Bank (ECB) published its annual report."
                    .to_string(),
                drawing_elements: 0,
                image_png_base64: None,
            },
            ExtractedPage {
                text: "The ECB tightened policy in response to rising prices.".to_string(),
                drawing_elements: 0,
                image_png_base64: None,
            },
            ExtractedPage {
                text: "Figure 1 shows the inflation trend over the last year.".to_string(),
                drawing_elements: 20,
                image_png_base64: Some(BASE64.encode(b"png-bytes")),
            },
        ],
    }
}

fn pipeline_for(base_dir: &Path) -> IngestPipeline {
    let config = IngestConfig::new(base_dir)
        .with_abbreviation_pacing(10, Duration::ZERO)
        .with_figure_call_interval(Duration::ZERO);
    IngestPipeline::new(config, Arc::new(BagOfWordsEmbedder), Arc::new(StageService))
}

#[tokio::test]
async fn ingest_produces_text_and_figure_units() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_for(dir.path());

    let report = pipeline.ingest(&sample_document(), false).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.abbreviations_found, 1);
    assert_eq!(report.abbreviations_resolved, 1);
    assert_eq!(report.figure_pages, 1);
    assert_eq!(report.text_units, 3);
    assert_eq!(report.figure_units, 1);
    assert_eq!(report.indexed_units, 4);

    // Artifacts land under the base directory.
    let config = IngestConfig::new(dir.path());
    assert!(config.definitions_path().exists());
    assert!(config.figures_dir().join("page_3.png").exists());
    assert!(config.summary_path().exists());
}

#[tokio::test]
async fn retrieval_surfaces_the_inlined_definition_and_the_figure() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_for(dir.path());
    pipeline.ingest(&sample_document(), false).await.unwrap();

    let config = IngestConfig::new(dir.path());
    let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
        .await
        .unwrap();

    // Page 2 never spelled out the abbreviation; after inlining it does.
    let units = index.query("ECB tightened policy", 1).await.unwrap();
    assert_eq!(units.len(), 1);
    assert!(units[0].content.contains("ECB (European Central Bank)"));

    // The figure unit is a rendering of the analysis fields.
    let units = index.query("Inflation rises through 2024", 1).await.unwrap();
    assert!(units[0].is_figure());
    assert!(units[0].content.contains("Title: Inflation"));
    assert_eq!(units[0].metadata.get("page").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn answering_is_grounded_in_retrieved_units() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_for(dir.path());
    pipeline.ingest(&sample_document(), false).await.unwrap();

    let config = IngestConfig::new(dir.path());
    let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
        .await
        .unwrap();
    let answerer = QueryAnswerer::new(index, Arc::new(StageService));

    let answer = answerer.answer("What does ECB stand for?", 4).await.unwrap();
    assert_eq!(answer, "The ECB stands for European Central Bank.");
}

#[tokio::test]
async fn querying_before_any_ingest_reports_a_missing_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = IngestConfig::new(dir.path());

    let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
        .await
        .unwrap();

    let error = index.query("anything", 5).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<IndexError>(),
        Some(IndexError::NoIndex { .. })
    ));
}

#[tokio::test]
async fn forced_rebuilds_yield_identical_query_results() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_for(dir.path());
    let config = IngestConfig::new(dir.path());

    let query = "ECB tightened policy";
    let mut runs = Vec::new();
    for _ in 0..2 {
        pipeline.ingest(&sample_document(), true).await.unwrap();
        let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
            .await
            .unwrap();
        runs.push(index.query(query, 3).await.unwrap());
    }

    assert_eq!(runs[0].len(), 3);
    // Same unit set, same embedder, same question: same ordered results.
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn repeated_ingest_merges_and_reindex_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_for(dir.path());
    let config = IngestConfig::new(dir.path());

    pipeline.ingest(&sample_document(), false).await.unwrap();
    pipeline.ingest(&sample_document(), false).await.unwrap();

    let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
        .await
        .unwrap();
    // Merging re-adds every unit; the second run doubles the count.
    assert_eq!(index.unit_count().await.unwrap(), 8);

    pipeline.ingest(&sample_document(), true).await.unwrap();
    let index = IndexManager::open(&config.index_dir(), Arc::new(BagOfWordsEmbedder))
        .await
        .unwrap();
    assert_eq!(index.unit_count().await.unwrap(), 4);
}
