use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{store::StorageManager, types::collection::index_name_for},
};
use vector_index::{EmbeddingProvider, VectorIndex, VectorIndexRegistry};

use crate::splitter::{split_file, SplitChunk};

/// I/O seams of the pipeline, swappable for tests.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    /// Download the staged blob into a local scratch file.
    async fn fetch_to_scratch(&self, temp_key: &str, scratch: &Path) -> Result<(), AppError>;

    /// Split the scratch file into ordered chunks.
    async fn split(&self, scratch: &Path, file_name: &str) -> Result<Vec<SplitChunk>, AppError>;

    /// Open the vector index backing a collection.
    async fn open_index(&self, collection_id: &str) -> Result<Arc<dyn VectorIndex>, AppError>;

    /// Promote the staged blob: copy to the permanent key, then delete
    /// the temp key. The copy must complete before the delete starts.
    async fn promote_blob(&self, temp_key: &str, permanent_key: &str) -> Result<(), AppError>;

    /// Remove a staged blob, used on failure paths.
    async fn discard_temp(&self, temp_key: &str) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    registry: Arc<VectorIndexRegistry>,
    embedder: Arc<EmbeddingProvider>,
    vector_backend: String,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        storage: StorageManager,
        registry: Arc<VectorIndexRegistry>,
        embedder: Arc<EmbeddingProvider>,
        vector_backend: String,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            storage,
            registry,
            embedder,
            vector_backend,
            chunk_size,
            chunk_overlap,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_to_scratch(&self, temp_key: &str, scratch: &Path) -> Result<(), AppError> {
        self.storage.get_to_local(temp_key, scratch).await?;
        Ok(())
    }

    async fn split(&self, scratch: &Path, file_name: &str) -> Result<Vec<SplitChunk>, AppError> {
        // PDF and DOCX extraction are CPU-bound; keep them off the
        // runtime's async workers.
        let scratch: PathBuf = scratch.to_path_buf();
        let file_name = file_name.to_owned();
        let chunk_size = self.chunk_size;
        let chunk_overlap = self.chunk_overlap;

        tokio::task::spawn_blocking(move || {
            split_file(&scratch, &file_name, chunk_size, chunk_overlap)
        })
        .await?
    }

    async fn open_index(&self, collection_id: &str) -> Result<Arc<dyn VectorIndex>, AppError> {
        self.registry
            .open(
                &self.vector_backend,
                &index_name_for(collection_id),
                Arc::clone(&self.embedder),
            )
            .await
    }

    async fn promote_blob(&self, temp_key: &str, permanent_key: &str) -> Result<(), AppError> {
        self.storage.copy(temp_key, permanent_key).await?;
        self.storage.delete(temp_key).await?;
        Ok(())
    }

    async fn discard_temp(&self, temp_key: &str) -> Result<(), AppError> {
        self.storage.delete(temp_key).await?;
        Ok(())
    }
}
