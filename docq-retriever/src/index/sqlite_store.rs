//! SQLite implementation of the vector store.
//!
//! Units are stored in one table: content, metadata as a JSON object, and the
//! embedding as a blob of little-endian f16 values. Similarity search loads
//! the embeddings and ranks by cosine similarity in memory; corpus sizes
//! here are thousands of units, not millions, so brute force is the honest
//! choice over an ANN structure.

use super::{IndexableUnit, VectorStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use half::f16;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Database filename inside the index directory.
pub const DB_FILE: &str = "docq-index.db";

/// SQLite-backed [`VectorStore`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the persistent store inside `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(DB_FILE);

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16),
        )
        .await?;
        Self::with_pool(pool).await
    }

    /// In-memory store for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn row_to_unit(content: String, metadata_json: &str) -> Result<IndexableUnit> {
        let metadata =
            serde_json::from_str(metadata_json).context("parsing stored unit metadata")?;
        Ok(IndexableUnit { content, metadata })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn insert_units(
        &self,
        units: &[IndexableUnit],
        embeddings: &[Vec<f16>],
    ) -> Result<()> {
        if units.len() != embeddings.len() {
            anyhow::bail!(
                "unit/embedding count mismatch: {} units, {} embeddings",
                units.len(),
                embeddings.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (unit, embedding) in units.iter().zip(embeddings) {
            let metadata_json = serde_json::to_string(&unit.metadata)?;
            let embedding_bytes: Vec<u8> = bytemuck::cast_slice(embedding.as_slice()).to_vec();
            sqlx::query("INSERT INTO units (content, metadata, embedding) VALUES (?, ?, ?)")
                .bind(&unit.content)
                .bind(&metadata_json)
                .bind(&embedding_bytes)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM units").execute(&self.pool).await?;
        Ok(())
    }

    async fn unit_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM units")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn search_similar(
        &self,
        query: Vec<f16>,
        limit: usize,
    ) -> Result<Vec<(IndexableUnit, f16)>> {
        let rows = sqlx::query("SELECT content, metadata, embedding FROM units")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(IndexableUnit, f16)> = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.get("content");
            let metadata_json: String = row.get("metadata");
            let embedding_bytes: Vec<u8> = row.get("embedding");

            let embedding: Vec<f16> =
                bytemuck::cast_slice::<u8, f16>(&embedding_bytes[..]).to_vec();
            let similarity = cosine_similarity(&query, &embedding);
            scored.push((Self::row_to_unit(content, &metadata_json)?, similarity));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f16], b: &[f16]) -> f16 {
    if a.len() != b.len() {
        return f16::ZERO;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        let a_f32 = a[i].to_f32();
        let b_f32 = b[i].to_f32();
        dot_product += a_f32 * b_f32;
        norm_a += a_f32 * a_f32;
        norm_b += b_f32 * b_f32;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        f16::ZERO
    } else {
        f16::from_f32(dot_product / (norm_a * norm_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(content: &str, page: u32) -> IndexableUnit {
        IndexableUnit::text_chunk(content.to_string(), "doc.pdf", page, 0)
    }

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().map(|&v| f16::from_f32(v)).collect()
    }

    #[tokio::test]
    async fn insert_search_and_clear_round_trip() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        assert_eq!(store.unit_count().await?, 0);

        let units = vec![unit("solar capacity grows", 1), unit("sea temperature rises", 2)];
        let embeddings = vec![vector(&[1.0, 0.0, 0.0]), vector(&[0.0, 1.0, 0.0])];
        store.insert_units(&units, &embeddings).await?;
        assert_eq!(store.unit_count().await?, 2);

        // Query close to the second vector ranks it first.
        let results = store
            .search_similar(vector(&[0.1, 0.9, 0.0]), 10)
            .await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.content, "sea temperature rises");
        assert!(results[0].1 > results[1].1);

        // Metadata survives the round trip.
        assert_eq!(
            results[0].0.metadata.get("page").map(String::as_str),
            Some("2")
        );

        store.clear().await?;
        assert_eq!(store.unit_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn search_respects_limit() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let units: Vec<IndexableUnit> =
            (0..5).map(|i| unit(&format!("unit {i}"), i)).collect();
        let embeddings: Vec<Vec<f16>> = (0..5)
            .map(|i| vector(&[1.0, i as f32 * 0.1, 0.0]))
            .collect();
        store.insert_units(&units, &embeddings).await?;

        let results = store.search_similar(vector(&[1.0, 0.0, 0.0]), 3).await?;
        assert_eq!(results.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let result = store
            .insert_units(&[unit("lonely", 1)], &[])
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn cosine_similarity_basics() {
        let a = vector(&[1.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &vector(&[1.0, 0.0])), f16::from_f32(1.0));
        assert_eq!(cosine_similarity(&a, &vector(&[0.0, 1.0])), f16::ZERO);
        assert_eq!(
            cosine_similarity(&a, &vector(&[-1.0, 0.0])),
            f16::from_f32(-1.0)
        );
        // Zero vectors and length mismatches degrade to zero.
        assert_eq!(cosine_similarity(&vector(&[0.0, 0.0]), &a), f16::ZERO);
        assert_eq!(cosine_similarity(&a, &vector(&[1.0, 0.0, 0.0])), f16::ZERO);
    }
}
