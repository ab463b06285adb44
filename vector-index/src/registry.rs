use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;

use crate::{EmbeddingProvider, VectorIndex};

/// Opens a handle to one backend's index for a collection.
#[async_trait]
pub trait VectorIndexFactory: Send + Sync {
    async fn open(
        &self,
        collection_name: &str,
        embedder: Arc<EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorIndex>, AppError>;
}

/// Backend registry keyed by configuration string, resolved once at startup.
///
/// Callers never name a concrete backend type; adding one means registering
/// another factory here.
#[derive(Default)]
pub struct VectorIndexRegistry {
    factories: HashMap<String, Arc<dyn VectorIndexFactory>>,
}

impl VectorIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &str, factory: Arc<dyn VectorIndexFactory>) {
        self.factories.insert(kind.to_ascii_lowercase(), factory);
    }

    pub fn supported_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub async fn open(
        &self,
        kind: &str,
        collection_name: &str,
        embedder: Arc<EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorIndex>, AppError> {
        let factory = self
            .factories
            .get(&kind.to_ascii_lowercase())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Unsupported vector index kind: {kind}. Supported kinds are: {}",
                    self.supported_kinds().join(", ")
                ))
            })?;

        factory.open(collection_name, embedder).await
    }
}
