//! Native storage capabilities.
//!
//! Each storage operation is its own trait so a backend can implement a
//! subset and so the vault layer can wrap each one independently. A
//! [`Capabilities`] table carries the implementations a session offers.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use skiff_common::{Error, RemotePath, Result};

/// Byte stream type for read/write operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Full path, including whether it is a file or directory.
    pub path: RemotePath,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// ETag or revision ID for conflict detection.
    pub etag: Option<String>,
}

impl Entry {
    pub fn new(path: RemotePath, size: u64) -> Self {
        Self {
            path,
            size,
            modified: Utc::now(),
            etag: None,
        }
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }

    pub fn is_directory(&self) -> bool {
        self.path.is_directory()
    }
}

/// Parameters of a single transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Byte offset to start at.
    pub offset: u64,
    /// Number of bytes, or `None` for everything after `offset`.
    pub length: Option<u64>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Whether this transfer covers only part of the object.
    pub fn is_range(&self) -> bool {
        self.offset > 0 || self.length.is_some()
    }
}

/// Create an empty file.
#[async_trait]
pub trait Touch: Send + Sync {
    async fn touch(&self, file: &RemotePath, status: &TransferStatus) -> Result<Entry>;
}

/// Existence check.
#[async_trait]
pub trait Find: Send + Sync {
    /// True if an object of the path's entry type exists.
    async fn find(&self, path: &RemotePath) -> Result<bool>;
}

/// Delete files and empty directories, in the order given.
#[async_trait]
pub trait Delete: Send + Sync {
    async fn delete(&self, paths: &[RemotePath]) -> Result<()>;
}

/// Upload content, replacing any existing file.
#[async_trait]
pub trait Write: Send + Sync {
    async fn write(
        &self,
        file: &RemotePath,
        data: ByteStream,
        status: &TransferStatus,
    ) -> Result<Entry>;
}

/// Download content, optionally a byte range.
#[async_trait]
pub trait Read: Send + Sync {
    async fn read(&self, file: &RemotePath, status: &TransferStatus) -> Result<ByteStream>;
}

/// List the direct children of a directory.
#[async_trait]
pub trait List: Send + Sync {
    async fn list(&self, directory: &RemotePath) -> Result<Vec<Entry>>;
}

/// Move or rename a file or directory, including everything below it.
#[async_trait]
pub trait Move: Send + Sync {
    async fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry>;
}

/// Create a directory. The parent must exist.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn mkdir(&self, directory: &RemotePath) -> Result<Entry>;
}

/// Capability kinds, for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Touch,
    Find,
    Delete,
    Write,
    Read,
    List,
    Move,
    Directory,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The set of native operations a session supports.
///
/// Cloning is cheap; every slot is reference counted.
#[derive(Clone, Default)]
pub struct Capabilities {
    touch: Option<Arc<dyn Touch>>,
    find: Option<Arc<dyn Find>>,
    delete: Option<Arc<dyn Delete>>,
    write: Option<Arc<dyn Write>>,
    read: Option<Arc<dyn Read>>,
    list: Option<Arc<dyn List>>,
    rename: Option<Arc<dyn Move>>,
    directory: Option<Arc<dyn Directory>>,
}

macro_rules! capability {
    ($field:ident, $with:ident, $trait:ident, $kind:ident) => {
        pub fn $with(mut self, feature: Arc<dyn $trait>) -> Self {
            self.$field = Some(feature);
            self
        }

        pub fn $field(&self) -> Result<Arc<dyn $trait>> {
            self.$field.clone().ok_or_else(|| {
                Error::Unsupported(format!("{} is not supported", FeatureKind::$kind))
            })
        }
    };
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill every slot from one backend implementing all operations.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: Touch + Find + Delete + Write + Read + List + Move + Directory + 'static,
    {
        Self {
            touch: Some(backend.clone()),
            find: Some(backend.clone()),
            delete: Some(backend.clone()),
            write: Some(backend.clone()),
            read: Some(backend.clone()),
            list: Some(backend.clone()),
            rename: Some(backend.clone()),
            directory: Some(backend),
        }
    }

    capability!(touch, with_touch, Touch, Touch);
    capability!(find, with_find, Find, Find);
    capability!(delete, with_delete, Delete, Delete);
    capability!(write, with_write, Write, Write);
    capability!(read, with_read, Read, Read);
    capability!(list, with_list, List, List);
    capability!(rename, with_rename, Move, Move);
    capability!(directory, with_directory, Directory, Directory);

    pub fn supports(&self, kind: FeatureKind) -> bool {
        match kind {
            FeatureKind::Touch => self.touch.is_some(),
            FeatureKind::Find => self.find.is_some(),
            FeatureKind::Delete => self.delete.is_some(),
            FeatureKind::Write => self.write.is_some(),
            FeatureKind::Read => self.read.is_some(),
            FeatureKind::List => self.list.is_some(),
            FeatureKind::Move => self.rename.is_some(),
            FeatureKind::Directory => self.directory.is_some(),
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = [
            FeatureKind::Touch,
            FeatureKind::Find,
            FeatureKind::Delete,
            FeatureKind::Write,
            FeatureKind::Read,
            FeatureKind::List,
            FeatureKind::Move,
            FeatureKind::Directory,
        ];
        f.debug_list()
            .entries(kinds.iter().filter(|k| self.supports(**k)))
            .finish()
    }
}

/// Collect a byte stream into one buffer.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>> {
    use futures::StreamExt;
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// Wrap an in-memory buffer as a single-item byte stream.
pub fn stream_from_bytes(data: Vec<u8>) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
