//! Collaborator wiring shared by the CLI and the HTTP server.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use cobol_lens_core::pipeline::Pipeline;
use cobol_lens_core::store::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::migrate;
use crate::sqlite_index::SqliteVectorIndex;

/// An opened database plus the query pipeline built over it.
pub struct Lens {
    pub pipeline: Arc<Pipeline>,
    pub index: Arc<dyn VectorIndex>,
    pool: SqlitePool,
}

impl Lens {
    /// Connect to the database (applying migrations) and build the
    /// configured embedder and generator.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(pool.clone()));
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        let pipeline = Pipeline::new(embedder, index.clone(), generator)
            .with_max_top_k(config.retrieval.max_top_k)
            .with_preview_chars(config.retrieval.rerank_preview_chars);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            index,
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
