//! SQLite-backed [`VectorIndex`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors`.
//! Queries load candidate rows and rank them by brute-force cosine
//! similarity in process, which is fast enough for a single codebase of a
//! few hundred thousand chunks. A `file_path` filter is pushed down to SQL;
//! other metadata filters are applied after decoding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use cobol_lens_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use cobol_lens_core::store::{VectorIndex, VectorMatch, VectorQuery, VectorRecord};

/// Rows written per upsert transaction.
pub const MAX_UPSERT_BATCH: usize = 200;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.len() > MAX_UPSERT_BATCH {
            anyhow::bail!(
                "upsert batch of {} exceeds limit of {}",
                records.len(),
                MAX_UPSERT_BATCH
            );
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let file_path = record
                .metadata
                .get("file_path")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let start_line = record
                .metadata
                .get("start_line")
                .and_then(|v| v.as_i64())
                .unwrap_or_default();
            let metadata_json = serde_json::to_string(&record.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (id, file_path, start_line, metadata_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    file_path = excluded.file_path,
                    start_line = excluded.start_line,
                    metadata_json = excluded.metadata_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(file_path)
            .bind(start_line)
            .bind(metadata_json)
            .bind(record.vector.len() as i64)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert vector {}", record.id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let pushed_down = query
            .filter
            .as_ref()
            .filter(|f| f.field == "file_path")
            .and_then(|f| f.equals.as_str());

        let rows: Vec<(String, String, Vec<u8>)> = match pushed_down {
            Some(path) => {
                sqlx::query_as(
                    "SELECT id, metadata_json, embedding FROM chunk_vectors WHERE file_path = ? ORDER BY start_line",
                )
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, metadata_json, embedding FROM chunk_vectors")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut matches: Vec<VectorMatch> = rows
            .into_iter()
            .map(|(id, metadata_json, blob)| {
                let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
                    tracing::warn!(%id, error = %e, "stored metadata is not valid JSON");
                    serde_json::Value::Null
                });
                VectorMatch {
                    score: cosine_similarity(&query.vector, &blob_to_vec(&blob)),
                    id,
                    metadata,
                }
            })
            .filter(|m| match &query.filter {
                Some(f) if pushed_down.is_none() => m.metadata.get(&f.field) == Some(&f.equals),
                _ => true,
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    fn max_upsert_batch(&self) -> usize {
        MAX_UPSERT_BATCH
    }
}
