//! Local filesystem session.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::cancel::CancelCallback;
use crate::features::{
    ByteStream, Capabilities, Delete, Directory, Entry, Find, List, Move, Read, Touch,
    TransferStatus, Write,
};
use crate::session::{Host, Listeners, Session, SessionState, TranscriptListener};
use skiff_common::{EntryType, Error, RemotePath, Result};

/// Session rooted at a local directory.
///
/// Useful for the command-line client and for tests that need real I/O.
pub struct LocalSession {
    host: Host,
    backend: Arc<LocalBackend>,
}

struct LocalBackend {
    root: PathBuf,
    state: AtomicU8,
    listeners: Listeners,
}

impl LocalSession {
    /// Create a session over `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self {
            host: Host::new("local", root.display().to_string()),
            backend: Arc::new(LocalBackend {
                root,
                state: AtomicU8::new(SessionState::Disconnected.to_u8()),
                listeners: Listeners::default(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.backend.root
    }
}

impl LocalBackend {
    fn to_fs_path(&self, path: &RemotePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn begin(&self, command: &str, path: &RemotePath) -> Result<()> {
        if SessionState::from_u8(self.state.load(Ordering::SeqCst)) != SessionState::Connected {
            return Err(Error::network(
                skiff_common::NetworkErrorKind::ConnectionReset,
                "Session is not connected",
            ));
        }
        self.listeners.log(true, &format!("{} {}", command, path));
        Ok(())
    }

    async fn require_parent(&self, path: &RemotePath) -> Result<()> {
        if let Some(parent) = path.parent() {
            match fs::metadata(self.to_fs_path(&parent)).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::InvalidInput(format!("Parent is a file: {}", parent)));
                }
                Err(_) => {
                    return Err(Error::NotFound(format!(
                        "Parent directory not found: {}",
                        parent
                    )));
                }
            }
        }
        Ok(())
    }

    async fn kind_of(&self, path: &RemotePath) -> Option<EntryType> {
        let meta = fs::metadata(self.to_fs_path(path)).await.ok()?;
        Some(if meta.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        })
    }

    async fn entry(&self, path: &RemotePath) -> Result<Entry> {
        let fs_meta = fs::metadata(self.to_fs_path(path)).await?;
        Ok(create_entry(path, &fs_meta))
    }
}

fn create_entry(path: &RemotePath, fs_meta: &std::fs::Metadata) -> Entry {
    let modified: DateTime<Utc> = fs_meta
        .modified()
        .map(|t| t.into())
        .unwrap_or_else(|_| Utc::now());
    let size = if fs_meta.is_file() { fs_meta.len() } else { 0 };
    Entry {
        path: path.clone(),
        size,
        modified,
        etag: Some(format!("{}-{}", modified.timestamp_millis(), size)),
    }
}

#[async_trait]
impl Touch for LocalBackend {
    async fn touch(&self, file: &RemotePath, _status: &TransferStatus) -> Result<Entry> {
        self.begin("TOUCH", file)?;
        self.require_parent(file).await?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.to_fs_path(file))
            .await?;
        self.entry(file).await
    }
}

#[async_trait]
impl Find for LocalBackend {
    async fn find(&self, path: &RemotePath) -> Result<bool> {
        self.begin("STAT", path)?;
        Ok(self.kind_of(path).await == Some(path.kind()))
    }
}

#[async_trait]
impl Delete for LocalBackend {
    async fn delete(&self, paths: &[RemotePath]) -> Result<()> {
        for path in paths {
            self.begin("DELETE", path)?;
            let fs_path = self.to_fs_path(path);
            match self.kind_of(path).await {
                Some(kind) if kind == path.kind() => {}
                _ => return Err(Error::NotFound(format!("Path not found: {}", path))),
            }
            if path.is_directory() {
                let mut entries = fs::read_dir(&fs_path).await?;
                if entries.next_entry().await?.is_some() {
                    return Err(Error::Conflict(format!("Directory not empty: {}", path)));
                }
                fs::remove_dir(&fs_path).await?;
            } else {
                fs::remove_file(&fs_path).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Write for LocalBackend {
    async fn write(
        &self,
        file: &RemotePath,
        mut data: ByteStream,
        _status: &TransferStatus,
    ) -> Result<Entry> {
        self.begin("PUT", file)?;
        self.require_parent(file).await?;
        if self.kind_of(file).await == Some(EntryType::Directory) {
            return Err(Error::AlreadyExists(format!("Directory exists: {}", file)));
        }

        let mut out = fs::File::create(self.to_fs_path(file)).await?;
        while let Some(chunk) = data.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        self.entry(file).await
    }
}

#[async_trait]
impl Read for LocalBackend {
    async fn read(&self, file: &RemotePath, status: &TransferStatus) -> Result<ByteStream> {
        self.begin("GET", file)?;
        match self.kind_of(file).await {
            Some(EntryType::File) => {}
            Some(EntryType::Directory) => {
                return Err(Error::InvalidInput(format!("Cannot read directory: {}", file)));
            }
            None => return Err(Error::NotFound(format!("File not found: {}", file))),
        }

        let mut handle = fs::File::open(self.to_fs_path(file)).await?;
        if status.offset > 0 {
            handle.seek(SeekFrom::Start(status.offset)).await?;
        }
        let reader = handle.take(status.length.unwrap_or(u64::MAX));
        let stream = ReaderStream::new(reader)
            .map_ok(|bytes| bytes.to_vec())
            .map_err(Error::from);
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl List for LocalBackend {
    async fn list(&self, directory: &RemotePath) -> Result<Vec<Entry>> {
        self.begin("LIST", directory)?;
        if self.kind_of(directory).await != Some(EntryType::Directory) {
            return Err(Error::NotFound(format!("Directory not found: {}", directory)));
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(self.to_fs_path(directory)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                debug!(path = ?entry.path(), "Skipping non-UTF-8 file name");
                continue;
            };
            let fs_meta = entry.metadata().await?;
            let kind = if fs_meta.is_dir() {
                EntryType::Directory
            } else {
                EntryType::File
            };
            let child = directory.join(&name, kind)?;
            results.push(create_entry(&child, &fs_meta));
        }
        Ok(results)
    }
}

#[async_trait]
impl Move for LocalBackend {
    async fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry> {
        self.begin("MOVE", source)?;
        if self.kind_of(source).await != Some(source.kind()) {
            return Err(Error::NotFound(format!("Source not found: {}", source)));
        }
        if self.kind_of(target).await.is_some() {
            return Err(Error::AlreadyExists(format!(
                "Destination already exists: {}",
                target
            )));
        }
        self.require_parent(target).await?;

        fs::rename(self.to_fs_path(source), self.to_fs_path(target)).await?;
        self.entry(target).await
    }
}

#[async_trait]
impl Directory for LocalBackend {
    async fn mkdir(&self, directory: &RemotePath) -> Result<Entry> {
        self.begin("MKDIR", directory)?;
        self.require_parent(directory).await?;
        if self.kind_of(directory).await.is_some() {
            return Err(Error::AlreadyExists(format!(
                "Path already exists: {}",
                directory
            )));
        }
        fs::create_dir(self.to_fs_path(directory)).await?;
        self.entry(directory).await
    }
}

#[async_trait]
impl Session for LocalSession {
    fn host(&self) -> &Host {
        &self.host
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.backend.state.load(Ordering::SeqCst))
    }

    async fn open(&self, cancel: &dyn CancelCallback) -> Result<()> {
        cancel.verify()?;
        self.backend
            .state
            .store(SessionState::Connecting.to_u8(), Ordering::SeqCst);
        match fs::metadata(&self.backend.root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                self.backend
                    .state
                    .store(SessionState::Disconnected.to_u8(), Ordering::SeqCst);
                return Err(Error::NotFound(format!(
                    "Root directory missing: {}",
                    self.backend.root.display()
                )));
            }
        }
        self.backend
            .state
            .store(SessionState::Connected.to_u8(), Ordering::SeqCst);
        debug!(root = %self.backend.root.display(), "Local session opened");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.backend
            .state
            .store(SessionState::Disconnected.to_u8(), Ordering::SeqCst);
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
