use std::path::PathBuf;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_task::IngestionTask},
};
use tracing::error;

use crate::differ::{ChunkDiff, SplitChunkRecord};

use super::{config::IngestionConfig, services::PipelineServices};

/// Mutable state threaded through the pipeline stages for one task.
pub struct PipelineContext<'a> {
    pub task: &'a IngestionTask,
    pub task_id: String,
    pub db: &'a SurrealDbClient,
    pub config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub scratch_path: PathBuf,
    pub new_records: Vec<SplitChunkRecord>,
    pub document_id: Option<String>,
    pub diff: Option<ChunkDiff>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        task: &'a IngestionTask,
        db: &'a SurrealDbClient,
        config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
        scratch_path: PathBuf,
    ) -> Self {
        let task_id = task.id.clone();
        Self {
            task,
            task_id,
            db,
            config,
            services,
            scratch_path,
            new_records: Vec::new(),
            document_id: None,
            diff: None,
        }
    }

    pub fn document_id(&self) -> Result<&str, AppError> {
        self.document_id.as_deref().ok_or_else(|| {
            AppError::Processing("document id expected to be resolved by the split stage".into())
        })
    }

    pub fn diff(&self) -> Result<&ChunkDiff, AppError> {
        self.diff
            .as_ref()
            .ok_or_else(|| AppError::Processing("chunk diff expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            task_id = %self.task_id,
            file_name = %self.task.file_name,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
