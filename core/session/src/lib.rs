//! Session abstraction for skiff.
//!
//! A [`Session`] is an opaque handle to one remote backend. It opens and
//! closes a transport and exposes the storage operations it supports as a
//! [`Capabilities`] table of native features. Concrete protocols live
//! behind this interface; the pool and the vault layer only see the traits.
//!
//! Two reference backends ship with the crate: [`MemorySession`] for tests
//! and [`LocalSession`] backed by a directory on the local filesystem.

pub mod cancel;
pub mod features;
pub mod local;
pub mod memory;
pub mod registry;
pub mod session;

pub use cancel::{CancelCallback, DisabledCancelCallback};
pub use features::{
    collect_stream, stream_from_bytes, ByteStream, Capabilities, Delete, Directory, Entry,
    FeatureKind, Find, List, Move, Read, Touch, TransferStatus, Write,
};
pub use local::LocalSession;
pub use memory::{MemorySession, MemoryStore};
pub use registry::{create_default_registry, ProtocolRegistry, SessionFactory};
pub use session::{Host, Session, SessionState, TracingTranscript, TranscriptListener};
