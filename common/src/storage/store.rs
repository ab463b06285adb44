use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Object key for a staged upload, scoped under its collection.
pub fn temp_key(collection_id: &str, file_name: &str) -> String {
    format!("{collection_id}/temp/{file_name}")
}

/// Object key for a promoted, permanently stored document.
pub fn permanent_key(collection_id: &str, file_name: &str) -> String {
    format!("{collection_id}/{file_name}")
}

/// Blob gateway over the configured object store backend.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new StorageManager for the configured backend.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager with a custom storage backend.
    ///
    /// Useful for testing scenarios where a specific backend is injected.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Store bytes at the specified location.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve bytes from the specified location, fully buffered.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Download an object into a local scratch file.
    pub async fn get_to_local(
        &self,
        location: &str,
        local_path: &Path,
    ) -> object_store::Result<()> {
        let bytes = self.get(location).await?;
        tokio::fs::write(local_path, &bytes)
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "StorageManager",
                source: e.into(),
            })
    }

    /// Server-side copy of an object to a new location.
    ///
    /// The source object is left untouched; promotion relies on this so a
    /// crash between copy and delete leaves both objects rather than none.
    pub async fn copy(&self, src: &str, dst: &str) -> object_store::Result<()> {
        self.store
            .copy(&ObjPath::from(src), &ObjPath::from(dst))
            .await
    }

    /// Delete a single object.
    pub async fn delete(&self, location: &str) -> object_store::Result<()> {
        self.store.delete(&ObjPath::from(location)).await
    }

    /// Delete all objects below the specified prefix.
    ///
    /// For local filesystem backends, this also attempts to clean up empty
    /// directories.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    /// List all objects below the specified prefix.
    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Cleanup filesystem directories for the local backend, best-effort.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

/// Create a storage backend based on configuration.
async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn memory_storage() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    #[test]
    fn key_conventions() {
        assert_eq!(temp_key("42", "report.pdf"), "42/temp/report.pdf");
        assert_eq!(permanent_key("42", "report.pdf"), "42/report.pdf");
    }

    #[tokio::test]
    async fn put_get_exists_delete_roundtrip() {
        let storage = memory_storage();

        let location = "42/temp/report.pdf";
        let data = b"document bytes";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.expect("exists"));

        storage.delete(location).await.expect("delete");
        assert!(!storage.exists(location).await.expect("exists after delete"));
    }

    #[tokio::test]
    async fn copy_leaves_source_intact() {
        let storage = memory_storage();

        let src = temp_key("42", "report.pdf");
        let dst = permanent_key("42", "report.pdf");
        storage
            .put(&src, Bytes::from_static(b"payload"))
            .await
            .expect("put");

        storage.copy(&src, &dst).await.expect("copy");

        assert!(storage.exists(&src).await.expect("src exists"));
        assert!(storage.exists(&dst).await.expect("dst exists"));
        assert_eq!(storage.get(&dst).await.expect("get dst").as_ref(), b"payload");
    }

    #[tokio::test]
    async fn get_to_local_writes_scratch_file() {
        let storage = memory_storage();

        let location = "7/temp/notes.md";
        storage
            .put(location, Bytes::from_static(b"# notes"))
            .await
            .expect("put");

        let scratch = tempfile::NamedTempFile::new().expect("scratch file");
        storage
            .get_to_local(location, scratch.path())
            .await
            .expect("download");

        let contents = tokio::fs::read(scratch.path()).await.expect("read scratch");
        assert_eq!(contents, b"# notes");
    }

    #[tokio::test]
    async fn list_and_delete_prefix() {
        let storage = memory_storage();

        for (location, data) in [
            ("9/temp/a.txt", b"a" as &[u8]),
            ("9/temp/b.txt", b"b"),
            ("9/kept.txt", b"kept"),
        ] {
            storage
                .put(location, Bytes::from(data.to_vec()))
                .await
                .expect("put");
        }

        let staged = storage.list(Some("9/temp/")).await.expect("list temp");
        assert_eq!(staged.len(), 2);

        storage.delete_prefix("9/temp/").await.expect("delete prefix");
        assert!(!storage.exists("9/temp/a.txt").await.expect("a gone"));
        assert!(storage.exists("9/kept.txt").await.expect("kept remains"));
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let storage = memory_storage();
        assert!(storage.get("nope/missing.bin").await.is_err());
        assert!(!storage.exists("nope/missing.bin").await.expect("exists"));
    }
}
