//! In-memory session for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelCallback;
use crate::features::{
    collect_stream, ByteStream, Capabilities, Delete, Directory, Entry, Find, List, Move, Read,
    Touch, TransferStatus, Write,
};
use crate::session::{Host, Listeners, Session, SessionState, TranscriptListener};
use skiff_common::{EntryType, Error, NetworkErrorKind, RemotePath, Result};

/// Size of the pieces a read stream is split into.
const READ_PIECE: usize = 16 * 1024;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
        etag: String,
    },
    Directory {
        modified: DateTime<Utc>,
    },
}

impl Node {
    fn kind(&self) -> EntryType {
        match self {
            Node::File { .. } => EntryType::File,
            Node::Directory { .. } => EntryType::Directory,
        }
    }

    fn entry(&self, path: &RemotePath) -> Entry {
        match self {
            Node::File {
                data,
                modified,
                etag,
            } => Entry {
                path: path.clone(),
                size: data.len() as u64,
                modified: *modified,
                etag: Some(etag.clone()),
            },
            Node::Directory { modified } => Entry {
                path: path.clone(),
                size: 0,
                modified: *modified,
                etag: None,
            },
        }
    }
}

/// Object tree shared by one or more [`MemorySession`]s.
///
/// Keys are slash-joined paths; the root is always present.
#[derive(Debug)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, Node>>,
}

fn key(path: &RemotePath) -> String {
    path.to_string_path()
}

fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{}/", key)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                modified: Utc::now(),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw file bytes, bypassing any session.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.read().get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Overwrite raw file bytes, bypassing any session.
    pub fn set_file_contents(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        match self.write().get_mut(path) {
            Some(Node::File { data, .. }) => {
                *data = contents;
                Ok(())
            }
            _ => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    /// Every stored path below `prefix`, sorted.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn require_parent(nodes: &BTreeMap<String, Node>, path: &RemotePath) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match nodes.get(&key(&parent)) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(Error::InvalidInput(format!(
                "Parent is a file: {}",
                parent
            ))),
            None => Err(Error::NotFound(format!(
                "Parent directory not found: {}",
                parent
            ))),
        }
    }

    fn touch(&self, path: &RemotePath) -> Result<Entry> {
        let mut nodes = self.write();
        Self::require_parent(&nodes, path)?;
        let k = key(path);
        if let Some(node) = nodes.get(&k) {
            if node.kind() == EntryType::Directory {
                return Err(Error::AlreadyExists(format!("Directory exists: {}", path)));
            }
            return Ok(node.entry(path));
        }
        let node = Node::File {
            data: Vec::new(),
            modified: Utc::now(),
            etag: Uuid::new_v4().to_string(),
        };
        let entry = node.entry(path);
        nodes.insert(k, node);
        Ok(entry)
    }

    fn find(&self, path: &RemotePath) -> bool {
        self.read()
            .get(&key(path))
            .is_some_and(|n| n.kind() == path.kind())
    }

    fn put(&self, path: &RemotePath, data: Vec<u8>) -> Result<Entry> {
        let mut nodes = self.write();
        Self::require_parent(&nodes, path)?;
        let k = key(path);
        if matches!(nodes.get(&k), Some(Node::Directory { .. })) {
            return Err(Error::AlreadyExists(format!("Directory exists: {}", path)));
        }
        let node = Node::File {
            data,
            modified: Utc::now(),
            etag: Uuid::new_v4().to_string(),
        };
        let entry = node.entry(path);
        nodes.insert(k, node);
        Ok(entry)
    }

    fn get(&self, path: &RemotePath, status: &TransferStatus) -> Result<Vec<u8>> {
        match self.read().get(&key(path)) {
            Some(Node::File { data, .. }) => {
                let start = (status.offset as usize).min(data.len());
                let end = match status.length {
                    Some(len) => start.saturating_add(len as usize).min(data.len()),
                    None => data.len(),
                };
                Ok(data[start..end].to_vec())
            }
            Some(Node::Directory { .. }) => Err(Error::InvalidInput(format!(
                "Cannot read directory: {}",
                path
            ))),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    fn delete(&self, path: &RemotePath) -> Result<()> {
        let mut nodes = self.write();
        let k = key(path);
        match nodes.get(&k).map(Node::kind) {
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
            Some(kind) if kind != path.kind() => {
                Err(Error::NotFound(format!("No {:?} at {}", path.kind(), path)))
            }
            Some(EntryType::File) => {
                nodes.remove(&k);
                Ok(())
            }
            Some(EntryType::Directory) => {
                if path.is_root() {
                    return Err(Error::InvalidInput("Cannot delete root".to_string()));
                }
                let prefix = child_prefix(&k);
                if nodes.keys().any(|other| other.starts_with(&prefix)) {
                    return Err(Error::Conflict(format!("Directory not empty: {}", path)));
                }
                nodes.remove(&k);
                Ok(())
            }
        }
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<Entry>> {
        let nodes = self.read();
        let k = key(path);
        match nodes.get(&k) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
            }
            None => return Err(Error::NotFound(format!("Directory not found: {}", path))),
        }

        let prefix = child_prefix(&k);
        let mut results = Vec::new();
        for (entry_key, node) in nodes.range(prefix.clone()..) {
            let Some(relative) = entry_key.strip_prefix(&prefix) else {
                break;
            };
            if relative.is_empty() || relative.contains('/') {
                continue;
            }
            let child = path.join(relative, node.kind())?;
            results.push(node.entry(&child));
        }
        Ok(results)
    }

    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry> {
        let mut nodes = self.write();
        let from = key(source);
        let to = key(target);

        match nodes.get(&from) {
            Some(node) if node.kind() == source.kind() => {}
            _ => return Err(Error::NotFound(format!("Source not found: {}", source))),
        }
        if nodes.contains_key(&to) {
            return Err(Error::AlreadyExists(format!(
                "Destination already exists: {}",
                target
            )));
        }
        if target.starts_with(source) {
            return Err(Error::InvalidInput(format!(
                "Cannot move {} into itself",
                source
            )));
        }
        Self::require_parent(&nodes, target)?;

        let from_prefix = child_prefix(&from);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| k.starts_with(&from_prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let new_key = format!("{}{}", child_prefix(&to), &old[from_prefix.len()..]);
                nodes.insert(new_key, node);
            }
        }

        let mut node = nodes
            .remove(&from)
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", source)))?;
        match &mut node {
            Node::File { modified, etag, .. } => {
                *modified = Utc::now();
                *etag = Uuid::new_v4().to_string();
            }
            Node::Directory { modified } => *modified = Utc::now(),
        }
        let entry = node.entry(target);
        nodes.insert(to, node);
        Ok(entry)
    }

    fn mkdir(&self, path: &RemotePath) -> Result<Entry> {
        let mut nodes = self.write();
        Self::require_parent(&nodes, path)?;
        let k = key(path);
        if nodes.contains_key(&k) {
            return Err(Error::AlreadyExists(format!("Path already exists: {}", path)));
        }
        let node = Node::Directory {
            modified: Utc::now(),
        };
        let entry = node.entry(&path.with_kind(EntryType::Directory)?);
        nodes.insert(k, node);
        Ok(entry)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryBackend {
    store: Arc<MemoryStore>,
    state: AtomicU8,
    listeners: Listeners,
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_delay_ms: AtomicU64,
    fail_next: Mutex<Option<NetworkErrorKind>>,
}

impl MemoryBackend {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Fail unless connected, and consume any injected fault.
    fn begin(&self, command: &str, path: &RemotePath) -> Result<()> {
        if self.state() != SessionState::Connected {
            return Err(Error::network(
                NetworkErrorKind::ConnectionReset,
                "Session is not connected",
            ));
        }
        let injected = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.listeners.log(true, &format!("{} {}", command, path));
        if let Some(kind) = injected {
            self.listeners.log(false, "connection lost");
            return Err(Error::network(kind, format!("{} {} failed", command, path)));
        }
        Ok(())
    }
}

#[async_trait]
impl Touch for MemoryBackend {
    async fn touch(&self, file: &RemotePath, _status: &TransferStatus) -> Result<Entry> {
        self.begin("TOUCH", file)?;
        self.store.touch(file)
    }
}

#[async_trait]
impl Find for MemoryBackend {
    async fn find(&self, path: &RemotePath) -> Result<bool> {
        self.begin("STAT", path)?;
        Ok(self.store.find(path))
    }
}

#[async_trait]
impl Delete for MemoryBackend {
    async fn delete(&self, paths: &[RemotePath]) -> Result<()> {
        for path in paths {
            self.begin("DELETE", path)?;
            self.store.delete(path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Write for MemoryBackend {
    async fn write(
        &self,
        file: &RemotePath,
        data: ByteStream,
        _status: &TransferStatus,
    ) -> Result<Entry> {
        self.begin("PUT", file)?;
        let data = collect_stream(data).await?;
        self.store.put(file, data)
    }
}

#[async_trait]
impl Read for MemoryBackend {
    async fn read(&self, file: &RemotePath, status: &TransferStatus) -> Result<ByteStream> {
        self.begin("GET", file)?;
        let data = self.store.get(file, status)?;
        let pieces: Vec<Result<Vec<u8>>> =
            data.chunks(READ_PIECE).map(|c| Ok(c.to_vec())).collect();
        Ok(Box::pin(futures::stream::iter(pieces)))
    }
}

#[async_trait]
impl List for MemoryBackend {
    async fn list(&self, directory: &RemotePath) -> Result<Vec<Entry>> {
        self.begin("LIST", directory)?;
        self.store.list(directory)
    }
}

#[async_trait]
impl Move for MemoryBackend {
    async fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry> {
        self.begin("MOVE", source)?;
        self.store.rename(source, target)
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn mkdir(&self, directory: &RemotePath) -> Result<Entry> {
        self.begin("MKDIR", directory)?;
        self.store.mkdir(directory)
    }
}

/// Session over a [`MemoryStore`].
///
/// Operations fail with a network error while the session is not open,
/// and a single failure can be injected with [`fail_next`](Self::fail_next).
pub struct MemorySession {
    host: Host,
    backend: Arc<MemoryBackend>,
}

impl MemorySession {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self::with_store(hostname, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(hostname: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            host: Host::new("memory", hostname),
            backend: Arc::new(MemoryBackend {
                store,
                state: AtomicU8::new(SessionState::Disconnected.to_u8()),
                listeners: Listeners::default(),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                open_delay_ms: AtomicU64::new(0),
                fail_next: Mutex::new(None),
            }),
        }
    }

    /// Make every `open` take at least `delay`.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.backend
            .open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.backend.store
    }

    /// Number of completed `open` calls.
    pub fn open_count(&self) -> usize {
        self.backend.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.backend.closes.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.backend.listeners.len()
    }

    /// Make the next operation fail with a network error of `kind`.
    pub fn fail_next(&self, kind: NetworkErrorKind) {
        *self
            .backend
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }
}

#[async_trait]
impl Session for MemorySession {
    fn host(&self) -> &Host {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.backend.state()
    }

    async fn open(&self, cancel: &dyn CancelCallback) -> Result<()> {
        if self.backend.state() == SessionState::Connected {
            return Ok(());
        }
        cancel.verify()?;
        self.backend.set_state(SessionState::Connecting);
        self.backend.listeners.log(true, &format!("CONNECT {}", self.host));
        let delay = self.backend.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Err(e) = cancel.verify() {
            self.backend.set_state(SessionState::Disconnected);
            return Err(e);
        }
        self.backend.set_state(SessionState::Connected);
        self.backend.opens.fetch_add(1, Ordering::SeqCst);
        self.backend.listeners.log(false, "connected");
        debug!(host = %self.host, "Memory session opened");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.backend.state() == SessionState::Disconnected {
            return Ok(());
        }
        self.backend.set_state(SessionState::Closing);
        self.backend.listeners.log(true, "QUIT");
        self.backend.set_state(SessionState::Disconnected);
        self.backend.closes.fetch_add(1, Ordering::SeqCst);
        debug!(host = %self.host, "Memory session closed");
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::from_backend(self.backend.clone())
    }

    fn add_listener(&self, listener: Arc<dyn TranscriptListener>) {
        self.backend.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn TranscriptListener>) {
        self.backend.listeners.remove(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::DisabledCancelCallback;
    use crate::features::stream_from_bytes;

    async fn connected() -> (MemorySession, Capabilities) {
        let session = MemorySession::new("test");
        session.open(&DisabledCancelCallback).await.unwrap();
        let caps = session.capabilities();
        (session, caps)
    }

    fn file(p: &str) -> RemotePath {
        RemotePath::file(p).unwrap()
    }

    fn dir(p: &str) -> RemotePath {
        RemotePath::directory(p).unwrap()
    }

    #[tokio::test]
    async fn test_write_read() {
        let (_session, caps) = connected().await;
        let path = file("/test.txt");

        caps.write()
            .unwrap()
            .write(&path, stream_from_bytes(b"Hello, World!".to_vec()), &TransferStatus::new())
            .await
            .unwrap();
        let stream = caps.read().unwrap().read(&path, &TransferStatus::new()).await.unwrap();

        assert_eq!(collect_stream(stream).await.unwrap(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_range_read() {
        let (_session, caps) = connected().await;
        let path = file("/range.bin");
        caps.write()
            .unwrap()
            .write(&path, stream_from_bytes((0u8..100).collect()), &TransferStatus::new())
            .await
            .unwrap();

        let status = TransferStatus::new().with_offset(10).with_length(5);
        let stream = caps.read().unwrap().read(&path, &status).await.unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), vec![10, 11, 12, 13, 14]);

        let past_end = TransferStatus::new().with_offset(95).with_length(50);
        let stream = caps.read().unwrap().read(&path, &past_end).await.unwrap();
        assert_eq!(collect_stream(stream).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_find_respects_kind() {
        let (_session, caps) = connected().await;
        caps.directory().unwrap().mkdir(&dir("/d")).await.unwrap();

        let find = caps.find().unwrap();
        assert!(find.find(&dir("/d")).await.unwrap());
        assert!(!find.find(&file("/d")).await.unwrap());
        assert!(!find.find(&file("/missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_requires_empty_directory() {
        let (_session, caps) = connected().await;
        caps.directory().unwrap().mkdir(&dir("/d")).await.unwrap();
        caps.touch().unwrap().touch(&file("/d/f"), &TransferStatus::new()).await.unwrap();

        let delete = caps.delete().unwrap();
        assert!(matches!(
            delete.delete(&[dir("/d")]).await,
            Err(Error::Conflict(_))
        ));
        delete.delete(&[file("/d/f"), dir("/d")]).await.unwrap();
        assert!(!caps.find().unwrap().find(&dir("/d")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let (_session, caps) = connected().await;
        let mkdir = caps.directory().unwrap();
        mkdir.mkdir(&dir("/dir")).await.unwrap();
        mkdir.mkdir(&dir("/dir/sub")).await.unwrap();
        caps.touch().unwrap().touch(&file("/dir/a"), &TransferStatus::new()).await.unwrap();
        caps.touch().unwrap().touch(&file("/dir/sub/b"), &TransferStatus::new()).await.unwrap();
        caps.touch().unwrap().touch(&file("/dirx"), &TransferStatus::new()).await.unwrap();

        let listing = caps.list().unwrap().list(&dir("/dir")).await.unwrap();
        let mut names: Vec<_> = listing.iter().map(|e| e.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "sub"]);
        assert!(listing.iter().any(|e| e.is_directory()));
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let (session, caps) = connected().await;
        let mkdir = caps.directory().unwrap();
        mkdir.mkdir(&dir("/old")).await.unwrap();
        mkdir.mkdir(&dir("/old/inner")).await.unwrap();
        caps.touch().unwrap().touch(&file("/old/inner/f"), &TransferStatus::new()).await.unwrap();

        caps.rename().unwrap().rename(&dir("/old"), &dir("/new")).await.unwrap();

        assert_eq!(
            session.store().paths_under("/new"),
            vec!["/new", "/new/inner", "/new/inner/f"]
        );
        assert!(session.store().paths_under("/old").is_empty());
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let session = MemorySession::new("test");
        let result = session.capabilities().find().unwrap().find(&file("/x")).await;
        assert!(matches!(result, Err(Error::Network { .. })));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let (session, caps) = connected().await;
        session.fail_next(NetworkErrorKind::Timeout);

        let find = caps.find().unwrap();
        assert!(matches!(
            find.find(&file("/x")).await,
            Err(Error::Network { kind: NetworkErrorKind::Timeout, .. })
        ));
        assert!(find.find(&file("/x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_close_counts() {
        let session = MemorySession::new("test");
        session.open(&DisabledCancelCallback).await.unwrap();
        session.open(&DisabledCancelCallback).await.unwrap();
        assert_eq!(session.open_count(), 1);
        assert_eq!(session.state(), SessionState::Connected);

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.close_count(), 1);
    }
}
