//! Reconciles a file's stored chunk set against a freshly split one.
//!
//! Chunks are bucketed by content hash, so only records with identical
//! content compete for a match. Within a bucket a greedy two-pointer
//! merge pairs entries whose positions are close; everything unpaired
//! degrades to a delete or a create. Matching is FIFO by index, not a
//! minimum-cost assignment: reorderings beyond the proximity threshold
//! degrade to re-creates instead of updates, which trades a little
//! precision for linear runtime. A delete is only emitted for ids with
//! no counterpart anywhere in the new split.

use std::collections::{BTreeMap, HashMap, HashSet};

use common::{error::AppError, storage::types::chunk::DocumentChunk};

/// Maximum index distance at which two same-content chunks are still
/// considered the same logical chunk that moved.
pub const PROXIMITY_THRESHOLD: i64 = 10;

/// A chunk as currently persisted for a file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunkRecord {
    pub id: String,
    pub chunk_index: i64,
    pub content: String,
    pub content_hash: String,
}

impl From<&DocumentChunk> for StoredChunkRecord {
    fn from(chunk: &DocumentChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            chunk_index: chunk.chunk_index,
            content: chunk.content.clone(),
            content_hash: chunk.content_hash.clone(),
        }
    }
}

/// A chunk as produced by the latest split, with its derived identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitChunkRecord {
    pub id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub content_hash: String,
}

/// A stored chunk matched to a new position: same content under the old
/// id, refreshed index and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpdate {
    pub id: String,
    pub record: SplitChunkRecord,
}

#[derive(Debug, Default, PartialEq)]
pub struct ChunkDiff {
    pub to_create: Vec<SplitChunkRecord>,
    pub to_update: Vec<ChunkUpdate>,
    pub to_delete: Vec<String>,
}

impl ChunkDiff {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the create/update/delete sets between the stored chunks of a
/// file and its latest split. Pure; O(n) over both inputs.
pub fn diff_chunks(
    old: &[StoredChunkRecord],
    new: &[SplitChunkRecord],
) -> Result<ChunkDiff, AppError> {
    validate_old(old)?;
    validate_new(new)?;

    let mut buckets: HashMap<&str, (Vec<&StoredChunkRecord>, Vec<&SplitChunkRecord>)> =
        HashMap::new();
    for record in old {
        buckets
            .entry(record.content_hash.as_str())
            .or_default()
            .0
            .push(record);
    }
    for record in new {
        buckets
            .entry(record.content_hash.as_str())
            .or_default()
            .1
            .push(record);
    }

    let mut diff = ChunkDiff::default();
    let current_ids: HashSet<&str> = new.iter().map(|record| record.id.as_str()).collect();

    for (_, (mut old_bucket, mut new_bucket)) in buckets {
        old_bucket.sort_by_key(|r| r.chunk_index);
        new_bucket.sort_by_key(|r| r.chunk_index);

        let mut old_iter = old_bucket.into_iter().peekable();
        let mut new_iter = new_bucket.into_iter().peekable();

        while let (Some(old_rec), Some(new_rec)) = (old_iter.peek(), new_iter.peek()) {
            let distance = (old_rec.chunk_index - new_rec.chunk_index).abs();
            if distance <= PROXIMITY_THRESHOLD {
                diff.to_update.push(ChunkUpdate {
                    id: old_rec.id.clone(),
                    record: (*new_rec).clone(),
                });
                old_iter.next();
                new_iter.next();
            } else if old_rec.chunk_index < new_rec.chunk_index {
                diff.to_delete.push(old_rec.id.clone());
                old_iter.next();
            } else {
                diff.to_create.push((*new_rec).clone());
                new_iter.next();
            }
        }

        diff.to_delete
            .extend(old_iter.map(|record| record.id.clone()));
        diff.to_create.extend(new_iter.cloned());
    }

    // Ids are content-addressed, so a chunk that moved past the threshold
    // appears as a delete and a create under the same id. Only ids absent
    // from the new split may be deleted, otherwise the trailing delete
    // would erase the row just written.
    diff.to_delete.retain(|id| !current_ids.contains(id.as_str()));

    Ok(diff)
}

fn validate_old(records: &[StoredChunkRecord]) -> Result<(), AppError> {
    for record in records {
        if record.id.is_empty() {
            return Err(AppError::MalformedChunkRecord(format!(
                "stored chunk at index {} has no id",
                record.chunk_index
            )));
        }
        if record.content_hash.is_empty() {
            return Err(AppError::MalformedChunkRecord(format!(
                "stored chunk {} has no content hash",
                record.id
            )));
        }
    }
    Ok(())
}

fn validate_new(records: &[SplitChunkRecord]) -> Result<(), AppError> {
    for record in records {
        if record.id.is_empty() || record.content_hash.is_empty() {
            return Err(AppError::MalformedChunkRecord(format!(
                "split chunk at index {} is missing id or content hash",
                record.chunk_index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::hashing::{chunk_content_hash, chunk_id};

    fn new_record(content: &str, index: i64) -> SplitChunkRecord {
        let metadata = BTreeMap::new();
        let hash = chunk_content_hash(content, &metadata);
        SplitChunkRecord {
            id: chunk_id("42", "file.md", &hash),
            chunk_index: index,
            content: content.to_owned(),
            metadata,
            content_hash: hash,
        }
    }

    fn old_record(content: &str, index: i64) -> StoredChunkRecord {
        let record = new_record(content, index);
        StoredChunkRecord {
            id: record.id,
            chunk_index: index,
            content: record.content,
            content_hash: record.content_hash,
        }
    }

    #[test]
    fn identical_sets_are_a_noop() {
        let old = vec![old_record("A", 0), old_record("B", 1), old_record("C", 2)];
        let new = vec![new_record("A", 0), new_record("B", 1), new_record("C", 2)];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert!(diff.is_noop());
        assert_eq!(diff.to_update.len(), 3);
        for update in &diff.to_update {
            assert_eq!(update.id, update.record.id);
        }
    }

    #[test]
    fn pure_insertion_creates_only_the_novel_chunk() {
        let old = vec![old_record("A", 0), old_record("B", 1), old_record("C", 2)];
        let new = vec![
            new_record("A", 0),
            new_record("B", 1),
            new_record("X", 2),
            new_record("C", 3),
        ];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_create.first().map(|r| r.content.as_str()), Some("X"));
        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.to_update.len(), 3);
    }

    #[test]
    fn pure_deletion_deletes_only_the_vanished_chunk() {
        let old = vec![old_record("A", 0), old_record("B", 1), old_record("C", 2)];
        let new = vec![new_record("A", 0), new_record("C", 1)];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_delete, vec![old_record("B", 1).id]);
        assert_eq!(diff.to_update.len(), 2);
    }

    #[test]
    fn distance_at_threshold_matches() {
        let old = vec![old_record("A", 0)];
        let new = vec![new_record("A", PROXIMITY_THRESHOLD)];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert!(diff.is_noop());
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(
            diff.to_update.first().map(|u| u.record.chunk_index),
            Some(PROXIMITY_THRESHOLD)
        );
    }

    #[test]
    fn distance_past_threshold_is_a_recreate_not_a_delete() {
        let old = vec![old_record("A", 0)];
        let new = vec![new_record("A", PROXIMITY_THRESHOLD + 1)];

        // Same content means same id: emitting the delete would erase the
        // row the create just wrote, so the delete must be suppressed.
        let diff = diff_chunks(&old, &new).expect("diff");
        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.to_create.len(), 1);
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn far_move_still_deletes_genuinely_vanished_content() {
        let old = vec![old_record("A", 0), old_record("B", 1)];
        let new = vec![new_record("A", PROXIMITY_THRESHOLD + 5)];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert_eq!(diff.to_delete, vec![old_record("B", 1).id]);
        assert_eq!(diff.to_create.len(), 1);
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn repeated_content_matches_in_index_order() {
        // Two old copies of the same content collapse onto one id; the
        // surviving copy is updated and nothing is deleted out from
        // under it.
        let old = vec![old_record("A", 0), old_record("A", 1)];
        let new = vec![new_record("A", 0)];

        let diff = diff_chunks(&old, &new).expect("diff");
        assert_eq!(diff.to_update.len(), 1);
        assert!(diff.to_delete.is_empty());
        assert!(diff.to_create.is_empty());
    }

    #[test]
    fn empty_sides_are_unambiguous() {
        let old = vec![old_record("A", 0)];
        let new = vec![new_record("B", 0)];

        let all_deletes = diff_chunks(&old, &[]).expect("diff");
        assert_eq!(all_deletes.to_delete.len(), 1);
        assert!(all_deletes.to_create.is_empty());

        let all_creates = diff_chunks(&[], &new).expect("diff");
        assert_eq!(all_creates.to_create.len(), 1);
        assert!(all_creates.to_delete.is_empty());
    }

    #[test]
    fn malformed_records_are_rejected() {
        let mut missing_id = old_record("A", 0);
        missing_id.id = String::new();
        let err = diff_chunks(&[missing_id], &[]).expect_err("must fail");
        assert!(matches!(err, AppError::MalformedChunkRecord(_)));

        let mut missing_hash = new_record("A", 0);
        missing_hash.content_hash = String::new();
        let err = diff_chunks(&[], &[missing_hash]).expect_err("must fail");
        assert!(matches!(err, AppError::MalformedChunkRecord(_)));
    }
}
