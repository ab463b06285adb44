#![allow(clippy::missing_docs_in_private_items)]

//! Background ingestion: staging, splitting, chunk diffing and the
//! worker pool that drives tasks to a terminal state.

pub mod cleanup;
pub mod differ;
pub mod pipeline;
pub mod splitter;
pub mod staging;

use std::sync::Arc;

use chrono::Utc;
use common::{error::AppError, storage::db::SurrealDbClient, storage::types::ingestion_task::IngestionTask};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use uuid::Uuid;

/// Claim loop for a single worker. Runs until the process stops.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), AppError> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let idle_backoff = Duration::from_millis(500);

    loop {
        match IngestionTask::claim_next_pending(&db, &worker_id, Utc::now()).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, file_name = %task.file_name, "claimed ingestion task");
                if let Err(err) = ingestion_pipeline.process_task(task).await {
                    // Already recorded on the task; the loop keeps going.
                    error!(%worker_id, %task_id, error = %err, "ingestion task failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion task, backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Spawn a fixed-size pool of claim loops sharing one task queue.
///
/// Backpressure is the pool size: at most `worker_count` tasks are in
/// flight, everything else waits as a pending row.
pub async fn run_worker_pool(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
    worker_count: usize,
) -> Result<(), AppError> {
    let worker_count = worker_count.max(1);
    info!(worker_count, "starting ingestion worker pool");

    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..worker_count {
        let db = Arc::clone(&db);
        let pipeline = Arc::clone(&ingestion_pipeline);
        workers.spawn(run_worker_loop(db, pipeline));
    }

    // Worker loops only return on join errors or panics.
    while let Some(joined) = workers.join_next().await {
        joined??;
    }

    Ok(())
}
