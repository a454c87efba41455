//! Blob stores for escrow backups.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use courier_core::error::TransportError;
use courier_core::traits::BlobStore;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// One file per blob under a directory.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, TransportError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(TransportError::Request(format!("invalid blob name {name:?}")));
        }
        Ok(self.dir.join(name))
    }
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

/// Backups hold encoded transfer passwords, so files are owner-only on Unix.
async fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.flush().await?;

    // A leftover temp file keeps its old mode through `open`.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FileBlobStore {
    /// Written to a temporary sibling, then renamed into place.
    async fn put(&self, name: &str, content: &[u8]) -> Result<(), TransportError> {
        let path = self.path_of(name)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        write_private(&tmp, content).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error)?;
        debug!(path = %path.display(), bytes = content.len(), "blob written");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, TransportError> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}

/// In-process store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, content: &[u8]) -> Result<(), TransportError> {
        self.blobs.write().insert(name.to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.blobs.read().get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("backups"));

        assert_eq!(store.get("backup.json").await.unwrap(), None);
        store.put("backup.json", b"{\"a\":1}").await.unwrap();
        store.put("backup.json", b"{\"a\":2}").await.unwrap();
        assert_eq!(store.get("backup.json").await.unwrap().unwrap(), b"{\"a\":2}");
        assert!(!dir.path().join("backups/.backup.json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_writes_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        let stale = dir.path().join(".backup.json.tmp");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.put("backup.json", b"{\"password\":\"YWJj\"}").await.unwrap();
        let mode = std::fs::metadata(dir.path().join("backup.json")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get(".hidden").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemoryBlobStore::new();
        assert!(store.is_empty());
        store.put("a", b"1").await.unwrap();
        store.put("a", b"2").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));
    }
}
