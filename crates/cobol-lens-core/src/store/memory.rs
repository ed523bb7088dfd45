//! In-memory [`VectorIndex`] for tests and WASM targets.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over all stored vectors.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{VectorIndex, VectorMatch, VectorQuery, VectorRecord};
use crate::embedding::cosine_similarity;

/// In-memory vector index.
pub struct InMemoryVectorIndex {
    records: RwLock<Vec<VectorRecord>>,
    max_batch: usize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::with_max_batch(1000)
    }

    pub fn with_max_batch(max_batch: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            max_batch: max_batch.max(1),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("vector index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.len() > self.max_batch {
            anyhow::bail!(
                "upsert batch of {} exceeds limit of {}",
                records.len(),
                self.max_batch
            );
        }
        let mut stored = self.records.write().map_err(poisoned)?;
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let stored = self.records.read().map_err(poisoned)?;
        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .filter(|r| match &query.filter {
                Some(f) => r.metadata.get(&f.field) == Some(&f.equals),
                None => true,
            })
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(&query.vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    fn max_upsert_batch(&self) -> usize {
        self.max_batch
    }
}
