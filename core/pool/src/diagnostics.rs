//! Failure classification.

use std::io;

use skiff_common::Error;

/// What a failure says about the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The transport is unusable and must be reopened.
    Network,
    /// The transport is fine; the operation itself failed.
    Other,
}

/// Classify `error` by its structural kind. Messages are never inspected.
pub fn classify(error: &Error) -> FailureKind {
    match error {
        Error::Network { .. } => FailureKind::Network,
        Error::Io(e) if is_transport_io(e.kind()) => FailureKind::Network,
        _ => FailureKind::Other,
    }
}

fn is_transport_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::UnexpectedEof
    )
}
