use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config,
};
use ingestion_pipeline::{cleanup::cleanup_expired_uploads, run_worker_pool, IngestionPipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vector_index::{EmbeddingProvider, InMemoryIndexFactory, SurrealIndexFactory, VectorIndexRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedder = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client),
    )?);

    let mut registry = VectorIndexRegistry::new();
    registry.register("surreal", Arc::new(SurrealIndexFactory::new(Arc::clone(&db))));
    registry.register("memory", Arc::new(InMemoryIndexFactory::new()));
    let registry = Arc::new(registry);

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        storage.clone(),
        registry,
        embedder,
        &config,
    ));

    info!(
        workers = config.worker_count,
        vector_index = %config.vector_index,
        embedding_backend = %config.embedding_backend,
        "ingestion worker starting"
    );

    // Periodic reclaim of abandoned uploads, independent of the pool.
    let retention = chrono::Duration::hours(config.upload_retention_hours);
    let sweep_db = Arc::clone(&db);
    let sweep_storage = storage.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            match cleanup_expired_uploads(&sweep_db, &sweep_storage, retention).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "cleanup sweep removed expired uploads");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "cleanup sweep failed"),
            }
        }
    });

    run_worker_pool(db, pipeline, config.worker_count).await?;

    Ok(())
}
