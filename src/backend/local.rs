//! Local filesystem backend
//!
//! Maps the absolute backend namespace onto a root directory of the local
//! filesystem (`/` for `file://` targets, a scratch directory in tests).
//! Each logical connection is a semaphore bounding how many operations
//! addressed to it run at once.

use super::{BackendFuture, ConnectionId, DirEntry, StorageBackend};
use crate::error::BackendError;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::trace;

/// Operations allowed in flight on a single connection
pub const DEFAULT_PERMITS_PER_CONNECTION: usize = 16;

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    connections: Vec<Semaphore>,
}

impl Inner {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

/// Backend operating on a local directory tree through `tokio::fs`
#[derive(Debug, Clone)]
pub struct LocalBackend {
    inner: Arc<Inner>,
}

impl LocalBackend {
    /// Backend rooted at `root` with `connections` logical connections
    pub fn new(root: impl Into<PathBuf>, connections: usize) -> Self {
        Self::with_permits(root, connections, DEFAULT_PERMITS_PER_CONNECTION)
    }

    pub fn with_permits(root: impl Into<PathBuf>, connections: usize, permits: usize) -> Self {
        let connections = (0..connections.max(1))
            .map(|_| Semaphore::new(permits.max(1)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                connections,
            }),
        }
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.len()
    }

    fn run<T, F, Fut>(&self, conn: ConnectionId, path: &str, op: F) -> BackendFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = std::io::Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        Box::pin(async move {
            let slot = &inner.connections[conn.0 % inner.connections.len()];
            let _permit = slot.acquire().await.map_err(|_| BackendError::Rejected {
                path: path.clone(),
                reason: format!("{} closed", conn),
            })?;
            trace!(%conn, path = %path, "local op");
            op(inner.resolve(&path))
                .await
                .map_err(|e| BackendError::from_io(path, &e))
        })
    }
}

impl StorageBackend for LocalBackend {
    fn create_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |full| async move {
            tokio::fs::create_dir_all(&full).await
        })
    }

    fn write_file(&self, conn: ConnectionId, path: &str, contents: Vec<u8>) -> BackendFuture<()> {
        self.run(conn, path, move |full| async move {
            let mut file = tokio::fs::File::create(&full).await?;
            file.write_all(&contents).await?;
            file.flush().await?;
            file.sync_all().await
        })
    }

    fn remove_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |full| async move { tokio::fs::remove_file(&full).await })
    }

    fn remove_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |full| async move { tokio::fs::remove_dir(&full).await })
    }

    fn read_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<u8>> {
        self.run(conn, path, |full| async move { tokio::fs::read(&full).await })
    }

    fn list_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<DirEntry>> {
        self.run(conn, path, |full| async move {
            let mut entries = Vec::new();
            let mut dir = tokio::fs::read_dir(&full).await?;
            while let Some(entry) = dir.next_entry().await? {
                let is_dir = entry.file_type().await?.is_dir();
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir,
                });
            }
            entries.sort();
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_local_operations() {
        let rt = runtime();
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path(), 4);
        let c = ConnectionId(7);

        rt.block_on(async {
            backend.create_dir(c, "/base/sub").await.unwrap();
            backend.create_dir(c, "/base/sub").await.unwrap();
            backend
                .write_file(c, "/base/data", b"contents".to_vec())
                .await
                .unwrap();

            assert_eq!(backend.read_file(c, "/base/data").await.unwrap(), b"contents");
            assert_eq!(
                backend.list_dir(c, "/base").await.unwrap(),
                vec![DirEntry::file("data"), DirEntry::dir("sub")]
            );

            assert!(matches!(
                backend.read_file(c, "/base/missing").await,
                Err(BackendError::NotFound { .. })
            ));
            assert!(backend.remove_dir(c, "/base").await.is_err());

            backend.remove_file(c, "/base/data").await.unwrap();
            backend.remove_dir(c, "/base/sub").await.unwrap();
            assert!(backend.list_dir(c, "/base").await.unwrap().is_empty());
        });

        assert!(tmp.path().join("base").is_dir());
    }

    #[test]
    fn test_write_truncates() {
        let rt = runtime();
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path(), 1);
        let c = ConnectionId(0);

        rt.block_on(async {
            backend.write_file(c, "/f", b"long contents".to_vec()).await.unwrap();
            backend.write_file(c, "/f", b"short".to_vec()).await.unwrap();
            assert_eq!(backend.read_file(c, "/f").await.unwrap(), b"short");
        });
    }

    #[test]
    fn test_write_into_missing_directory() {
        let rt = runtime();
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path(), 2);
        let err = rt
            .block_on(backend.write_file(ConnectionId(1), "/nope/f", vec![1, 2, 3]))
            .unwrap_err();
        assert_eq!(err.path(), "/nope/f");
        assert_eq!(backend.connections(), 2);
    }
}
