#![allow(clippy::missing_docs_in_private_items)]

//! Uniform contract over pluggable vector-index backends.
//!
//! Backends own the embedding function: callers hand over chunk text and
//! ids, the backend embeds and indexes. Concrete implementations are
//! selected by a configuration string through [`VectorIndexRegistry`].

pub mod embedding;
pub mod memory;
pub mod registry;
pub mod surreal;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;

pub use embedding::EmbeddingProvider;
pub use memory::InMemoryIndexFactory;
pub use registry::{VectorIndexFactory, VectorIndexRegistry};
pub use surreal::SurrealIndexFactory;

/// A chunk as handed to a vector index: stable id, text, metadata.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub id: String,
    pub content: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A search hit with its similarity score (higher is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: IndexedChunk,
    pub score: f32,
}

/// Capability contract every vector backend implements.
///
/// Adding a backend means implementing this trait plus a
/// [`VectorIndexFactory`]; callers never change.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection this handle is bound to.
    fn collection_name(&self) -> &str;

    /// Embed and index the given chunks, replacing entries with the same id.
    async fn add_chunks(&self, chunks: &[IndexedChunk]) -> Result<(), AppError>;

    /// Remove vectors by chunk id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<(), AppError>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<IndexedChunk>, AppError>;

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, AppError>;

    /// Drop every vector belonging to this collection.
    async fn drop_collection(&self) -> Result<(), AppError>;
}

/// Thin retrieval handle with a fixed result count.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, k: usize) -> Self {
        Self { index, k }
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<IndexedChunk>, AppError> {
        self.index.similarity_search(query, self.k).await
    }
}

/// Retriever over a shared index handle.
pub fn as_retriever(index: Arc<dyn VectorIndex>, k: usize) -> Retriever {
    Retriever::new(index, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryVectorIndex;

    #[tokio::test]
    async fn retriever_caps_results_at_k() {
        let embedder = Arc::new(EmbeddingProvider::new_hashed(32).expect("embedder"));
        let index = Arc::new(InMemoryVectorIndex::new("kb_7", embedder));
        let chunks: Vec<IndexedChunk> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|content| IndexedChunk {
                id: (*content).to_owned(),
                content: (*content).to_owned(),
                metadata: BTreeMap::new(),
            })
            .collect();
        index.add_chunks(&chunks).await.expect("add");

        let retriever = as_retriever(index, 2);
        let hits = retriever.retrieve("alpha beta").await.expect("retrieve");
        assert_eq!(hits.len(), 2);
    }
}
