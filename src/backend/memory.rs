//! In-process storage backend
//!
//! Keeps a whole namespace in a `BTreeMap` behind a mutex. Useful for
//! exercising the builder and validator without a real storage system:
//! it can add artificial latency, inject failures on chosen paths and
//! report the peak number of concurrently running operations.

use super::{BackendFuture, ConnectionId, DirEntry, StorageBackend};
use crate::error::{BackendError, BackendResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug)]
struct Namespace {
    nodes: BTreeMap<String, Node>,
    faults: BTreeSet<String>,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes,
            faults: BTreeSet::new(),
        }
    }

    fn check_fault(&self, path: &str) -> BackendResult<()> {
        if self.faults.contains(path) {
            return Err(BackendError::Rejected {
                path: path.to_string(),
                reason: "injected fault".into(),
            });
        }
        Ok(())
    }

    fn require_dir(&self, path: &str) -> BackendResult<()> {
        match self.nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(BackendError::NotADirectory { path: path.into() }),
            None => Err(BackendError::NotFound { path: path.into() }),
        }
    }

    fn create_dir(&mut self, path: &str) -> BackendResult<()> {
        self.check_fault(path)?;
        for ancestor in ancestors(path) {
            match self.nodes.get(&ancestor) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(BackendError::NotADirectory { path: ancestor }),
                None => {
                    self.nodes.insert(ancestor, Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn write_file(&mut self, path: &str, contents: Vec<u8>) -> BackendResult<()> {
        self.check_fault(path)?;
        self.require_dir(parent(path))?;
        if let Some(Node::Dir) = self.nodes.get(path) {
            return Err(BackendError::IsADirectory { path: path.into() });
        }
        self.nodes.insert(path.to_string(), Node::File(contents));
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> BackendResult<()> {
        self.check_fault(path)?;
        match self.nodes.get(path) {
            Some(Node::File(_)) => {
                self.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(BackendError::IsADirectory { path: path.into() }),
            None => Err(BackendError::NotFound { path: path.into() }),
        }
    }

    fn remove_dir(&mut self, path: &str) -> BackendResult<()> {
        self.check_fault(path)?;
        self.require_dir(path)?;
        if path == "/" {
            return Err(BackendError::Rejected {
                path: path.into(),
                reason: "cannot remove the root".into(),
            });
        }
        if !self.children(path).is_empty() {
            return Err(BackendError::DirectoryNotEmpty { path: path.into() });
        }
        self.nodes.remove(path);
        Ok(())
    }

    fn read_file(&self, path: &str) -> BackendResult<Vec<u8>> {
        self.check_fault(path)?;
        match self.nodes.get(path) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            Some(Node::Dir) => Err(BackendError::IsADirectory { path: path.into() }),
            None => Err(BackendError::NotFound { path: path.into() }),
        }
    }

    fn list_dir(&self, path: &str) -> BackendResult<Vec<DirEntry>> {
        self.check_fault(path)?;
        self.require_dir(path)?;
        Ok(self.children(path))
    }

    fn children(&self, path: &str) -> Vec<DirEntry> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let name = &key[prefix.len()..];
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                Some(DirEntry {
                    name: name.to_string(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect()
    }
}

#[derive(Debug)]
struct Inner {
    namespace: Mutex<Namespace>,
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    per_connection: Mutex<HashMap<ConnectionId, u64>>,
}

impl Inner {
    fn enter(self: &Arc<Self>, conn: ConnectionId) -> ActiveGuard {
        *self.per_connection.lock().entry(conn).or_insert(0) += 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        ActiveGuard {
            inner: Arc::clone(self),
        }
    }
}

struct ActiveGuard {
    inner: Arc<Inner>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Namespace held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Empty namespace containing only `/`
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Empty namespace whose operations each take at least `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                namespace: Mutex::new(Namespace::new()),
                latency,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                per_connection: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make every operation addressing exactly `path` fail
    pub fn fail_path(&self, path: &str) {
        self.inner.namespace.lock().faults.insert(normalize(path));
    }

    /// Remove a fault installed by [`fail_path`](Self::fail_path)
    pub fn clear_fault(&self, path: &str) {
        self.inner.namespace.lock().faults.remove(&normalize(path));
    }

    /// Synchronously store a file, creating parent directories
    pub fn put(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut ns = self.inner.namespace.lock();
        for ancestor in ancestors(parent(&path)) {
            ns.nodes.entry(ancestor).or_insert(Node::Dir);
        }
        ns.nodes.insert(path, Node::File(contents.into()));
    }

    /// Synchronously read a file
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        match self.inner.namespace.lock().nodes.get(&normalize(path)) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Synchronously remove a file or a whole subtree
    pub fn remove_tree(&self, path: &str) {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let mut ns = self.inner.namespace.lock();
        ns.nodes.retain(|key, _| key != &path && !key.starts_with(&prefix));
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.inner.namespace.lock().nodes.get(&normalize(path)),
            Some(Node::Dir)
        )
    }

    /// Number of regular files in the namespace
    pub fn file_count(&self) -> usize {
        self.inner
            .namespace
            .lock()
            .nodes
            .values()
            .filter(|node| matches!(node, Node::File(_)))
            .count()
    }

    /// Number of directories in the namespace, `/` included
    pub fn dir_count(&self) -> usize {
        self.inner
            .namespace
            .lock()
            .nodes
            .values()
            .filter(|node| matches!(node, Node::Dir))
            .count()
    }

    /// Highest number of operations observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Operations addressed to `conn` so far
    pub fn operations_on(&self, conn: ConnectionId) -> u64 {
        self.inner
            .per_connection
            .lock()
            .get(&conn)
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct connection slots used so far
    pub fn connections_used(&self) -> usize {
        self.inner.per_connection.lock().len()
    }

    fn run<T, F>(&self, conn: ConnectionId, path: &str, op: F) -> BackendFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Namespace, &str) -> BackendResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let path = normalize(path);
        Box::pin(async move {
            let _active = inner.enter(conn);
            if !inner.latency.is_zero() {
                tokio::time::sleep(inner.latency).await;
            }
            let mut ns = inner.namespace.lock();
            op(&mut *ns, &path)
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn create_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |ns, path| ns.create_dir(path))
    }

    fn write_file(&self, conn: ConnectionId, path: &str, contents: Vec<u8>) -> BackendFuture<()> {
        self.run(conn, path, move |ns, path| ns.write_file(path, contents))
    }

    fn remove_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |ns, path| ns.remove_file(path))
    }

    fn remove_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()> {
        self.run(conn, path, |ns, path| ns.remove_dir(path))
    }

    fn read_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<u8>> {
        self.run(conn, path, |ns, path| ns.read_file(path))
    }

    fn list_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<DirEntry>> {
        self.run(conn, path, |ns, path| ns.list_dir(path))
    }
}

/// Canonical absolute form: leading `/`, no empty components
fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Every prefix directory of `path`, outermost first, `path` included
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}
