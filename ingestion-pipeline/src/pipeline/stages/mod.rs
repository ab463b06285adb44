use std::time::Duration;

use common::{
    error::AppError,
    storage::{
        store::permanent_key,
        types::{chunk::DocumentChunk, document::Document, upload::Upload},
    },
    utils::hashing::{chunk_content_hash, chunk_id},
};
use state_machines::core::GuardError;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use vector_index::IndexedChunk;

use crate::differ::{diff_chunks, SplitChunkRecord, StoredChunkRecord};

use super::{
    context::PipelineContext,
    state::{Diffed, Fetched, IngestionMachine, Indexed, Promoted, Ready, Recorded, SplitDone, Stored},
};

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn fetch(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    ctx.services
        .fetch_to_scratch(&ctx.task.temp_key, &ctx.scratch_path)
        .await?;

    debug!(
        task_id = %ctx.task_id,
        temp_key = %ctx.task.temp_key,
        "staged blob fetched to scratch"
    );

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

/// Split the scratch file, derive each chunk's content hash and id, and
/// resolve the document id the chunk rows will reference. An existing
/// document keeps its id; otherwise one is generated here and reused by
/// the later document upsert.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn split(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), SplitDone>, AppError> {
    let chunks = ctx
        .services
        .split(&ctx.scratch_path, &ctx.task.file_name)
        .await?;

    let collection_id = ctx.task.collection_id.as_str();
    let file_name = ctx.task.file_name.as_str();

    ctx.new_records = chunks
        .into_iter()
        .enumerate()
        .map(|(position, chunk)| {
            let content_hash = chunk_content_hash(&chunk.content, &chunk.metadata);
            SplitChunkRecord {
                id: chunk_id(collection_id, file_name, &content_hash),
                chunk_index: i64::try_from(position).unwrap_or(i64::MAX),
                content: chunk.content,
                metadata: chunk.metadata,
                content_hash,
            }
        })
        .collect();

    let existing = Document::find_by_file_name(ctx.db, collection_id, file_name).await?;
    ctx.document_id = Some(match existing {
        Some(document) => document.id,
        None => Uuid::new_v4().to_string(),
    });

    info!(
        task_id = %ctx.task_id,
        file_name = %file_name,
        chunk_count = ctx.new_records.len(),
        "file split into chunks"
    );

    machine
        .split()
        .map_err(|(_, guard)| map_guard_error("split", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn diff(
    machine: IngestionMachine<(), SplitDone>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Diffed>, AppError> {
    let stored = DocumentChunk::records_for_file(
        ctx.db,
        &ctx.task.collection_id,
        &ctx.task.file_name,
    )
    .await?;
    let old: Vec<StoredChunkRecord> = stored.iter().map(StoredChunkRecord::from).collect();

    let diff = diff_chunks(&old, &ctx.new_records)?;

    info!(
        task_id = %ctx.task_id,
        creates = diff.to_create.len(),
        updates = diff.to_update.len(),
        deletes = diff.to_delete.len(),
        "chunk diff computed"
    );

    ctx.diff = Some(diff);

    machine
        .diff()
        .map_err(|(_, guard)| map_guard_error("diff", &guard))
}

/// Apply the diff to the vector index. Only created chunks are embedded:
/// an updated chunk has the same content hash, so its vector is already
/// correct under the stable chunk id.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn apply_index(
    machine: IngestionMachine<(), Diffed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Indexed>, AppError> {
    let index = ctx.services.open_index(&ctx.task.collection_id).await?;

    let diff = ctx.diff()?;
    let to_add: Vec<IndexedChunk> = diff
        .to_create
        .iter()
        .map(|record| IndexedChunk {
            id: record.id.clone(),
            content: record.content.clone(),
            metadata: record.metadata.clone(),
        })
        .collect();

    if !to_add.is_empty() {
        let tuning = &ctx.config.tuning;
        let strategy = ExponentialBackoff::from_millis(tuning.index_initial_backoff_ms)
            .max_delay(Duration::from_millis(tuning.index_max_backoff_ms))
            .map(jitter)
            .take(tuning.index_attempts);

        Retry::spawn(strategy, || index.add_chunks(&to_add)).await?;
    }

    if !diff.to_delete.is_empty() {
        index.delete(&diff.to_delete).await?;
    }

    debug!(
        task_id = %ctx.task_id,
        added = to_add.len(),
        deleted = diff.to_delete.len(),
        "vector index mutations applied"
    );

    machine
        .index()
        .map_err(|(_, guard)| map_guard_error("index", &guard))
}

/// Mirror the index mutations in the chunk store: upsert created and
/// updated rows, delete vanished ones.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn apply_store(
    machine: IngestionMachine<(), Indexed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Stored>, AppError> {
    let document_id = ctx.document_id()?.to_owned();
    let collection_id = ctx.task.collection_id.clone();
    let file_name = ctx.task.file_name.clone();
    let diff = ctx.diff()?;

    let mut rows = Vec::with_capacity(diff.to_create.len().saturating_add(diff.to_update.len()));
    for record in &diff.to_create {
        rows.push(chunk_row(record, &record.id, &collection_id, &document_id, &file_name));
    }
    for update in &diff.to_update {
        rows.push(chunk_row(&update.record, &update.id, &collection_id, &document_id, &file_name));
    }

    let upserted = rows.len();
    DocumentChunk::upsert_many(ctx.db, rows).await?;
    DocumentChunk::delete_by_ids(ctx.db, &collection_id, &diff.to_delete).await?;

    debug!(
        task_id = %ctx.task_id,
        upserted,
        deleted = diff.to_delete.len(),
        "chunk store mutations applied"
    );

    machine
        .store()
        .map_err(|(_, guard)| map_guard_error("store", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn promote(
    machine: IngestionMachine<(), Stored>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Promoted>, AppError> {
    let permanent = permanent_key(&ctx.task.collection_id, &ctx.task.file_name);
    ctx.services
        .promote_blob(&ctx.task.temp_key, &permanent)
        .await?;

    info!(
        task_id = %ctx.task_id,
        permanent_key = %permanent,
        "staged blob promoted to permanent storage"
    );

    machine
        .promote()
        .map_err(|(_, guard)| map_guard_error("promote", &guard))
}

/// Write the document row under the id resolved at the split stage.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn record_document(
    machine: IngestionMachine<(), Promoted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Recorded>, AppError> {
    let upload_id = ctx.task.upload_id.as_deref().ok_or_else(|| {
        AppError::Processing("ingestion task has no upload to record a document for".into())
    })?;
    let upload: Upload = ctx
        .db
        .get_item(upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Upload {upload_id}")))?;

    let mut document = Document::new(
        ctx.task.collection_id.clone(),
        ctx.task.file_name.clone(),
        permanent_key(&ctx.task.collection_id, &ctx.task.file_name),
        upload.content_hash,
        upload.size,
        upload.mime_type,
    );
    document.id = ctx.document_id()?.to_owned();

    let stored = document.upsert_for_file(ctx.db).await?;
    ctx.document_id = Some(stored.id);

    machine
        .record()
        .map_err(|(_, guard)| map_guard_error("record", &guard))
}

fn chunk_row(
    record: &SplitChunkRecord,
    id: &str,
    collection_id: &str,
    document_id: &str,
    file_name: &str,
) -> DocumentChunk {
    DocumentChunk::new(
        id.to_owned(),
        collection_id.to_owned(),
        document_id.to_owned(),
        file_name.to_owned(),
        record.chunk_index,
        record.content.clone(),
        record.metadata.clone(),
        record.content_hash.clone(),
    )
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Processing(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
