//! Filesystem-backed content blobs.
//!
//! Each conversation's content lives in `{root}/{id}.html`. The store never
//! creates a blob implicitly: `write` on a missing file is `NotFound`.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{DocumentId, DocumentStore, StorageError, StorageResult};

/// Content directory with one file per document
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the content directory, creating it if needed
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Path of the blob for a document
    pub fn path_for(&self, id: DocumentId) -> PathBuf {
        self.root.join(format!("{}.html", id))
    }
}

fn map_io(id: DocumentId, err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(id),
        ErrorKind::AlreadyExists => StorageError::AlreadyExists(id),
        _ => StorageError::Io(err),
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(id))
            .await
            .map_err(|e| map_io(id, e))?;
        Ok(())
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        let data = fs::read(self.path_for(id)).await.map_err(|e| map_io(id, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        // Opening without `create` keeps this overwrite-only
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.path_for(id))
            .await
            .map_err(|e| map_io(id, e))?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        fs::remove_file(self.path_for(id))
            .await
            .map_err(|e| map_io(id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_write_read() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create(42).await.unwrap();
        assert_eq!(store.read(42).await.unwrap(), Bytes::new());

        store
            .write(42, Bytes::from_static(b"<p>hello</p>"))
            .await
            .unwrap();
        assert_eq!(store.read(42).await.unwrap(), Bytes::from_static(b"<p>hello</p>"));
        assert!(dir.path().join("42.html").exists());
    }

    #[tokio::test]
    async fn test_overwrite_truncates() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create(1).await.unwrap();
        store.write(1, Bytes::from_static(b"a long first version")).await.unwrap();
        store.write(1, Bytes::from_static(b"short")).await.unwrap();
        assert_eq!(store.read(1).await.unwrap(), Bytes::from_static(b"short"));
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create(5).await.unwrap();
        store.write(5, Bytes::from_static(b"keep me")).await.unwrap();

        let err = store.create(5).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(5)));
        // Existing content is untouched
        assert_eq!(store.read(5).await.unwrap(), Bytes::from_static(b"keep me"));
    }

    #[tokio::test]
    async fn test_missing_document() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert!(matches!(store.read(9).await, Err(StorageError::NotFound(9))));
        assert!(matches!(
            store.write(9, Bytes::from_static(b"x")).await,
            Err(StorageError::NotFound(9))
        ));
        // A failed write must not create the file
        assert!(!store.path_for(9).exists());
        assert!(matches!(store.delete(9).await, Err(StorageError::NotFound(9))));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create(3).await.unwrap();
        store.delete(3).await.unwrap();
        assert!(matches!(store.read(3).await, Err(StorageError::NotFound(3))));
    }
}
