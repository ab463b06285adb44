use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over raw bytes. Used for upload/document identity.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Byte-stable serialization of chunk metadata.
///
/// Keys are ordered by the `BTreeMap`, so two independently produced maps
/// with the same entries always serialize identically. This is what keeps
/// chunk-change detection free of false positives.
pub fn canonical_metadata(metadata: &BTreeMap<String, serde_json::Value>) -> String {
    serde_json::to_string(metadata).unwrap_or_default()
}

/// Content hash of a chunk: SHA-256 over the chunk text plus its
/// canonically serialized metadata.
pub fn chunk_content_hash(
    content: &str,
    metadata: &BTreeMap<String, serde_json::Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(canonical_metadata(metadata).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk identifier derived from collection, file name and
/// content hash. Stable across re-processing runs as long as the
/// (file name, content hash) pair is unchanged.
pub fn chunk_id(collection_id: &str, file_name: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{collection_id}:{file_name}:{content_hash}").as_bytes());
    format!("{:x}", hasher.finalize())
}
