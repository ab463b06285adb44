use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    registry::VectorIndexFactory, EmbeddingProvider, IndexedChunk, ScoredChunk, VectorIndex,
};

const TABLE: &str = "vector_chunk";

#[derive(Debug, Serialize, Deserialize)]
struct VectorRow {
    chunk_id: String,
    collection: String,
    content: String,
    metadata: BTreeMap<String, serde_json::Value>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ScoredRow {
    chunk_id: String,
    content: String,
    metadata: BTreeMap<String, serde_json::Value>,
    score: f32,
}

/// Vector index persisted in SurrealDB, one row per chunk.
///
/// The record id is the chunk id, so re-adding a chunk replaces its row
/// and its vector in place.
pub struct SurrealVectorIndex {
    db: Arc<SurrealDbClient>,
    collection: String,
    embedder: Arc<EmbeddingProvider>,
}

impl SurrealVectorIndex {
    pub fn new(db: Arc<SurrealDbClient>, collection: &str, embedder: Arc<EmbeddingProvider>) -> Self {
        Self {
            db,
            collection: collection.to_owned(),
            embedder,
        }
    }

    async fn ranked(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::VectorIndex(e.to_string()))?;

        let mut response = self
            .db
            .query(format!(
                "SELECT chunk_id, content, metadata, \
                 vector::similarity::cosine(embedding, $embedding) AS score \
                 FROM {TABLE} WHERE collection = $collection \
                 ORDER BY score DESC LIMIT $k"
            ))
            .bind(("embedding", query_embedding))
            .bind(("collection", self.collection.clone()))
            .bind(("k", k))
            .await?;

        let rows: Vec<ScoredRow> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredChunk {
                chunk: IndexedChunk {
                    id: row.chunk_id,
                    content: row.content,
                    metadata: row.metadata,
                },
                score: row.score,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn add_chunks(&self, chunks: &[IndexedChunk]) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(texts)
            .await
            .map_err(|e| AppError::VectorIndex(e.to_string()))?;

        if embeddings.len() != chunks.len() {
            return Err(AppError::VectorIndex(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                embeddings.len()
            )));
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let row = VectorRow {
                chunk_id: chunk.id.clone(),
                collection: self.collection.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                embedding,
            };
            let _: Option<VectorRow> = self.db.upsert((TABLE, chunk.id.as_str())).content(row).await?;
        }

        debug!(
            collection = %self.collection,
            count = chunks.len(),
            "indexed chunk vectors"
        );

        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.db
            .query(format!(
                "DELETE FROM {TABLE} WHERE collection = $collection AND record::id(id) IN $ids"
            ))
            .bind(("collection", self.collection.clone()))
            .bind(("ids", ids.to_vec()))
            .await?;

        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<IndexedChunk>, AppError> {
        let scored = self.ranked(query, k).await?;
        Ok(scored.into_iter().map(|s| s.chunk).collect())
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        self.ranked(query, k).await
    }

    async fn drop_collection(&self) -> Result<(), AppError> {
        self.db
            .query(format!("DELETE FROM {TABLE} WHERE collection = $collection"))
            .bind(("collection", self.collection.clone()))
            .await?;

        Ok(())
    }
}

/// Opens [`SurrealVectorIndex`] handles over a shared database client.
pub struct SurrealIndexFactory {
    db: Arc<SurrealDbClient>,
}

impl SurrealIndexFactory {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorIndexFactory for SurrealIndexFactory {
    async fn open(
        &self,
        collection_name: &str,
        embedder: Arc<EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorIndex>, AppError> {
        Ok(Arc::new(SurrealVectorIndex::new(
            Arc::clone(&self.db),
            collection_name,
            embedder,
        )))
    }
}
