//! Unit model, vector store boundary, and the index state machine.
//!
//! The index is a single on-disk SQLite database owned exclusively by
//! [`IndexManager`]. Its lifecycle is an explicit two-state machine:
//!
//! ```text
//!        build                    merge
//! Empty ───────▶ Populated ◀──────────┐
//!                    │                │
//!                    └────────────────┘
//!                    (build under force also re-enters Populated,
//!                     discarding prior content)
//! ```
//!
//! Vector math (embedding the query, cosine ranking) is delegated to the
//! embedding provider and the [`VectorStore`] implementation; the manager
//! passes retrieval results through unmodified and in store order.
//!
//! Concurrent writers are not supported: the design assumes single-writer
//! access to the index location, and a query racing an ingest may observe
//! partial state.

use anyhow::Result;
use async_trait::async_trait;
use docq_embed::EmbeddingProvider;
use half::f16;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

/// Default number of units retrieved per query.
pub const DEFAULT_K: usize = 20;

/// One retrievable passage: a text chunk or a figure description.
///
/// `content` is never empty; producers filter blank chunks and render a
/// minimal placeholder for empty figures. Metadata keys are shared across
/// variants (`kind`, `source`, `page`) so storage stays uniform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexableUnit {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl IndexableUnit {
    /// A text-chunk unit with document/page/sequence provenance.
    pub fn text_chunk(content: String, source: &str, page: u32, sequence: usize) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("kind".to_string(), "text".to_string());
        metadata.insert("source".to_string(), source.to_string());
        metadata.insert("page".to_string(), page.to_string());
        metadata.insert("sequence".to_string(), sequence.to_string());
        Self { content, metadata }
    }

    /// A figure-analysis unit with page/image provenance.
    pub fn figure(
        content: String,
        source_page: Option<u32>,
        image_path: &str,
        figure_index: usize,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("kind".to_string(), "figure".to_string());
        metadata.insert("source".to_string(), "figure_analysis".to_string());
        metadata.insert(
            "page".to_string(),
            source_page.map(|p| p.to_string()).unwrap_or_default(),
        );
        metadata.insert("image_path".to_string(), image_path.to_string());
        metadata.insert("figure_index".to_string(), figure_index.to_string());
        Self { content, metadata }
    }

    /// `true` for figure-variant units.
    pub fn is_figure(&self) -> bool {
        self.metadata.get("kind").is_some_and(|kind| kind == "figure")
    }
}

/// Structural index errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Query was issued against a location that was never built.
    #[error("no index exists at {location}; ingest a document before querying")]
    NoIndex { location: PathBuf },

    /// Merge was requested while the index is still empty.
    #[error("cannot merge into an empty index at {location}; build it first")]
    MergeIntoEmpty { location: PathBuf },
}

/// Persistence and nearest-neighbor search over embedded units.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert units with their embedding vectors (parallel slices).
    async fn insert_units(
        &self,
        units: &[IndexableUnit],
        embeddings: &[Vec<f16>],
    ) -> Result<()>;

    /// Remove every stored unit.
    async fn clear(&self) -> Result<()>;

    /// Number of stored units.
    async fn unit_count(&self) -> Result<usize>;

    /// The `limit` most similar units to the query vector, best first.
    async fn search_similar(
        &self,
        query: Vec<f16>,
        limit: usize,
    ) -> Result<Vec<(IndexableUnit, f16)>>;
}

/// Whether the index location holds any persisted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    Populated,
}

/// Exclusive owner of the persistent vector index.
pub struct IndexManager {
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    state: IndexState,
    location: PathBuf,
}

impl IndexManager {
    /// Open (or create) the index at `location`. The initial state is read
    /// from the persisted database: any stored units mean `Populated`.
    pub async fn open(location: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        std::fs::create_dir_all(location)?;
        let store = SqliteStore::open(location).await?;
        Self::from_store(Box::new(store), embedder, location.to_path_buf()).await
    }

    /// Wrap an existing store, probing it for the initial state.
    pub async fn from_store(
        store: Box<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        location: PathBuf,
    ) -> Result<Self> {
        let state = if store.unit_count().await? > 0 {
            IndexState::Populated
        } else {
            IndexState::Empty
        };
        Ok(Self {
            store,
            embedder,
            state,
            location,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Number of retrievable units.
    pub async fn unit_count(&self) -> Result<usize> {
        self.store.unit_count().await
    }

    /// Build a fresh index from `units` alone, discarding prior content.
    /// Valid from both states; always ends `Populated`.
    pub async fn build(&mut self, units: &[IndexableUnit]) -> Result<usize> {
        tracing::info!(
            "Building index at {} from {} units",
            self.location.display(),
            units.len()
        );
        self.store.clear().await?;
        let embeddings = self.embed_units(units).await?;
        self.store.insert_units(units, &embeddings).await?;
        self.state = IndexState::Populated;
        Ok(units.len())
    }

    /// Add `units` to an existing index without discarding prior content.
    /// Only valid while `Populated`. Units are re-added unconditionally;
    /// repeated ingestion of the same document duplicates its units.
    pub async fn merge(&mut self, units: &[IndexableUnit]) -> Result<usize> {
        if self.state == IndexState::Empty {
            return Err(IndexError::MergeIntoEmpty {
                location: self.location.clone(),
            }
            .into());
        }
        tracing::info!(
            "Merging {} units into index at {}",
            units.len(),
            self.location.display()
        );
        let embeddings = self.embed_units(units).await?;
        self.store.insert_units(units, &embeddings).await?;
        Ok(units.len())
    }

    /// Merge when the index is populated and `force_rebuild` is off,
    /// otherwise build fresh.
    pub async fn build_or_merge(
        &mut self,
        units: &[IndexableUnit],
        force_rebuild: bool,
    ) -> Result<usize> {
        match (self.state, force_rebuild) {
            (IndexState::Populated, false) => self.merge(units).await,
            _ => self.build(units).await,
        }
    }

    /// Retrieve the `k` units most relevant to `question`, in store order.
    ///
    /// Fails with [`IndexError::NoIndex`] while `Empty`; querying before
    /// any ingestion is a hard error, never an empty success.
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<IndexableUnit>> {
        if self.state == IndexState::Empty {
            return Err(IndexError::NoIndex {
                location: self.location.clone(),
            }
            .into());
        }

        let query_vector = self.embedder.embed_text(question).await?;
        let hits = self.store.search_similar(query_vector, k).await?;
        Ok(hits.into_iter().map(|(unit, _score)| unit).collect())
    }

    async fn embed_units(&self, units: &[IndexableUnit]) -> Result<Vec<Vec<f16>>> {
        let texts: Vec<String> = units.iter().map(|unit| unit.content.clone()).collect();
        let result = self.embedder.embed_texts(&texts).await?;
        Ok(result.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_metadata_keys_are_stable_across_variants() {
        let text = IndexableUnit::text_chunk("some text".to_string(), "doc.pdf", 2, 0);
        let figure =
            IndexableUnit::figure("Title: T".to_string(), Some(4), "figures/page_4.png", 0);

        for key in ["kind", "source", "page"] {
            assert!(text.metadata.contains_key(key), "text missing {key}");
            assert!(figure.metadata.contains_key(key), "figure missing {key}");
        }
        assert!(!text.is_figure());
        assert!(figure.is_figure());
    }

    #[test]
    fn figure_unit_tolerates_unknown_page() {
        let unit = IndexableUnit::figure("(figure)".to_string(), None, "img.png", 1);
        assert_eq!(unit.metadata.get("page").map(String::as_str), Some(""));
        assert_eq!(
            unit.metadata.get("figure_index").map(String::as_str),
            Some("1")
        );
    }
}
