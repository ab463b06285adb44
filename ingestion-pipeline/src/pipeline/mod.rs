mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{ingestion_task::IngestionTask, upload::Upload},
    },
    utils::config::AppConfig,
};
use tracing::{info, warn};
use vector_index::{EmbeddingProvider, VectorIndexRegistry};

use self::{context::PipelineContext, state::ready};

/// Drives one ingestion task from staged blob to indexed document.
#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        registry: Arc<VectorIndexRegistry>,
        embedder: Arc<EmbeddingProvider>,
        config: &AppConfig,
    ) -> Self {
        let pipeline_config = IngestionConfig::from_app_config(config);
        let services = DefaultPipelineServices::new(
            storage,
            registry,
            embedder,
            config.vector_index.clone(),
            pipeline_config.chunk_size,
            pipeline_config.chunk_overlap,
        );

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    /// Run a claimed task to a terminal state.
    ///
    /// Success marks the task completed with the resulting document id
    /// and completes the upload. Any stage error marks both failed and
    /// attempts to reclaim the temp blob; that reclaim is best-effort
    /// since the expiry sweep will pick up whatever is left.
    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            collection_id = %task.collection_id,
            file_name = %task.file_name,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        match self.drive_pipeline(&task).await {
            Ok(document_id) => {
                let completed = task.mark_completed(&document_id, &self.db).await?;
                if let Some(upload_id) = completed.upload_id.as_deref() {
                    Upload::mark_completed(&self.db, upload_id).await?;
                }
                info!(
                    task_id = %task.id,
                    document_id = %document_id,
                    "ingestion task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                task.mark_failed(reason.clone(), &self.db).await?;
                if let Some(upload_id) = task.upload_id.as_deref() {
                    Upload::mark_failed(&self.db, upload_id, reason.clone()).await?;
                }

                if let Err(cleanup_err) = self.services.discard_temp(&task.temp_key).await {
                    warn!(
                        task_id = %task.id,
                        temp_key = %task.temp_key,
                        error = %cleanup_err,
                        "failed to reclaim temp blob after task failure"
                    );
                }

                warn!(task_id = %task.id, error = %reason, "ingestion task failed");
                Err(AppError::Processing(reason))
            }
        }
    }

    async fn drive_pipeline(&self, task: &IngestionTask) -> Result<String, AppError> {
        // Scratch space lives exactly as long as this run.
        let scratch_dir = tempfile::tempdir()?;
        let scratch_path = scratch_dir.path().join("staged.bin");

        let mut ctx = PipelineContext::new(
            task,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
            scratch_path,
        );

        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = stages::fetch(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = stages::split(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let split_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = stages::diff(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let diff_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = stages::apply_index(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let index_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = stages::apply_store(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let store_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = stages::promote(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let promote_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = stages::record_document(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let record_duration = stage_start.elapsed();

        info!(
            task_id = %ctx.task_id,
            total_ms = duration_millis(pipeline_started.elapsed()),
            fetch_ms = duration_millis(fetch_duration),
            split_ms = duration_millis(split_duration),
            diff_ms = duration_millis(diff_duration),
            index_ms = duration_millis(index_duration),
            store_ms = duration_millis(store_duration),
            promote_ms = duration_millis(promote_duration),
            record_ms = duration_millis(record_duration),
            "ingestion pipeline finished"
        );

        ctx.document_id().map(str::to_owned)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
