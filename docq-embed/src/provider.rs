//! Embedding provider implementations.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text.
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector.
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a result, inferring the dimension from the first vector.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension).
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache of initialized models, keyed by config hash, so repeated
/// ingest/query runs in one process reload nothing.
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Trait for embedding providers that map text to vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing).
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// The dimension of embeddings produced by this provider.
    fn embedding_dimension(&self) -> usize;

    /// The name/identifier of this provider.
    fn provider_name(&self) -> &str;
}

/// FastEmbed-based provider running a builtin ONNX model.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Map a configured model name to the fastembed builtin it selects.
fn builtin_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        other => Err(EmbedError::invalid_config(format!(
            "Unknown embedding model: {other}"
        ))),
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 768, // bge-base-en-v1.5 dimension until initialized
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Loads the embedding model, reusing the process-level cache when the
    /// same configuration was loaded before.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing embedding provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key();

        let cached_data = {
            let cache = get_model_cache().lock().unwrap();
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::debug!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return Ok(());
        }

        let builtin = builtin_model(self.config.model_name())?;
        let model_name = self.config.model_name().to_string();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {model_name}");

                let init_options =
                    InitOptions::new(builtin).with_show_download_progress(true);
                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Determine the dimension from a probe embedding.
                let probe = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(768);

                tracing::info!("Model loaded. Dimension: {dimension}");
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        {
            let mut cache = get_model_cache().lock().unwrap();
            cache.insert(cache_key, (Arc::clone(&model_arc), dimension));
        }

        self.model = Some(model_arc);
        self.dimension = dimension;
        Ok(())
    }

    /// Cache key derived from the serialized configuration.
    fn create_cache_key(&self) -> String {
        let config_json =
            serde_json::to_string(&self.config).expect("Config should always serialize");

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        format!("v1:{:x}", hasher.finish())
    }

    /// Clears the process-level model cache.
    pub fn clear_cache() {
        get_model_cache().lock().unwrap().clear();
        tracing::info!("Model cache cleared");
    }

    /// Number of cached models.
    pub fn cache_size() -> usize {
        get_model_cache().lock().unwrap().len()
    }

    /// Convert f32 embeddings to normalized f16 vectors.
    fn convert_to_f16(&self, embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
        embeddings
            .into_iter()
            .map(|embedding| {
                let mut f16_embedding: Vec<f16> =
                    embedding.into_iter().map(f16::from_f32).collect();

                let norm: f32 = f16_embedding
                    .iter()
                    .map(|x| x.to_f32() * x.to_f32())
                    .sum::<f32>()
                    .sqrt();
                if norm > 0.0 {
                    for value in &mut f16_embedding {
                        *value = f16::from_f32(value.to_f32() / norm);
                    }
                }

                f16_embedding
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        // Process in batches to bound memory use.
        let batch_size = 16;
        let mut all_embeddings = Vec::new();

        for chunk in texts.chunks(batch_size) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model_clone.lock().unwrap();
                model_guard
                    .embed(chunk, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(self.convert_to_f16(batch_embeddings));
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_result_infers_dimension() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
    }

    #[test]
    fn uninitialized_provider_reports_defaults() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.embedding_dimension(), 768);
    }

    #[test]
    fn unknown_model_name_is_a_config_error() {
        let err = builtin_model("not-a-model").unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));
    }

    #[test]
    fn cache_key_is_deterministic_per_config() {
        let provider1 = FastEmbedProvider::new(EmbedConfig::default());
        let provider2 = FastEmbedProvider::new(EmbedConfig::default());
        assert_eq!(provider1.create_cache_key(), provider2.create_cache_key());

        let provider3 = FastEmbedProvider::new(EmbedConfig::new("all-MiniLM-L6-v2"));
        assert_ne!(provider1.create_cache_key(), provider3.create_cache_key());
    }

    #[test]
    fn normalization_produces_unit_vectors() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());
        let converted = provider.convert_to_f16(vec![vec![3.0, 4.0]]);

        let norm: f32 = converted[0]
            .iter()
            .map(|x| x.to_f32() * x.to_f32())
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    #[ignore] // Downloads the real model; run with: cargo test -- --ignored
    async fn embed_texts_with_real_model() -> Result<()> {
        let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;

        let texts = vec![
            "Sea surface temperature rises in summer.".to_string(),
            "Annual renovation targets for social housing.".to_string(),
        ];
        let result = provider.embed_texts(&texts).await?;

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, provider.embedding_dimension());
        for embedding in &result.embeddings {
            assert!(embedding.iter().any(|&x| x.to_f32() != 0.0));
            assert!(embedding.iter().all(|&x| x.to_f32().is_finite()));
        }
        Ok(())
    }
}
