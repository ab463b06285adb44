use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use tokio::sync::RwLock;

use crate::{
    registry::VectorIndexFactory, EmbeddingProvider, IndexedChunk, ScoredChunk, VectorIndex,
};

struct StoredRow {
    chunk: IndexedChunk,
    embedding: Vec<f32>,
}

/// Process-local vector index, used for tests and single-node setups.
pub struct InMemoryVectorIndex {
    collection: String,
    embedder: Arc<EmbeddingProvider>,
    rows: Arc<RwLock<HashMap<String, StoredRow>>>,
}

impl InMemoryVectorIndex {
    pub fn new(collection: &str, embedder: Arc<EmbeddingProvider>) -> Self {
        Self {
            collection: collection.to_owned(),
            embedder,
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn ranked(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::VectorIndex(e.to_string()))?;

        let rows = self.rows.read().await;
        let mut scored: Vec<ScoredChunk> = rows
            .values()
            .map(|row| ScoredChunk {
                chunk: row.chunk.clone(),
                score: cosine_similarity(&query_embedding, &row.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
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

        let mut rows = self.rows.write().await;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            rows.insert(
                chunk.id.clone(),
                StoredRow {
                    chunk: chunk.clone(),
                    embedding,
                },
            );
        }

        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        let mut rows = self.rows.write().await;
        for id in ids {
            rows.remove(id);
        }
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
        self.rows.write().await.clear();
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Factory that hands out one shared index per collection name, so two
/// opens of the same collection see the same data within a process.
#[derive(Default)]
pub struct InMemoryIndexFactory {
    indexes: RwLock<HashMap<String, Arc<InMemoryVectorIndex>>>,
}

impl InMemoryIndexFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndexFactory for InMemoryIndexFactory {
    async fn open(
        &self,
        collection_name: &str,
        embedder: Arc<EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorIndex>, AppError> {
        let mut indexes = self.indexes.write().await;
        let index = indexes
            .entry(collection_name.to_owned())
            .or_insert_with(|| Arc::new(InMemoryVectorIndex::new(collection_name, embedder)))
            .clone();
        Ok(index)
    }
}
