//! Error types
//!
//! One error type for the whole stack. Infrastructure failures
//! ([`Error::Transport`], [`Error::Capacity`]) are produced on the host side
//! of the process boundary; data errors ([`Error::NativeOpen`],
//! [`Error::HandleNotFound`], [`Error::InvalidState`], [`Error::Engine`]) are
//! produced inside a worker and travel back as [`RemoteError`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum Error {
    /// The worker process or the connection to it is broken
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No worker could be borrowed in time
    #[error("Pool exhausted: {0}")]
    Capacity(#[from] CapacityError),

    /// The engine refused to load a document or page
    #[error("Native load failed: {0}")]
    NativeOpen(#[from] NativeError),

    /// A token does not resolve (closed, unknown, or owned by another document)
    #[error("Handle not found: {0}")]
    HandleNotFound(String),

    /// The operation needs state that is not there (closed document, closed instance)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A native call failed or is not supported by the engine backend
    #[error("Engine error: {0}")]
    Engine(String),

    /// Pool configuration is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pool has been closed
    #[error("Pool is closed")]
    PoolClosed,
}

/// Failures of the process boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("worker process has exited")]
    Exited,

    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),

    #[error("worker did not announce itself within {0:?}")]
    StartTimeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("ping failed: {0}")]
    PingFailed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a borrow gave up
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("no worker became available within {0:?}")]
    Timeout(Duration),

    #[error("borrow was cancelled")]
    Cancelled,
}

/// Classified native load failures
///
/// The engine reports numeric codes; they never leave the instance unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NativeError {
    #[error("unknown error")]
    Unknown,
    #[error("unable to read file")]
    File,
    #[error("incorrect format")]
    Format,
    #[error("invalid password")]
    Password,
    #[error("invalid encryption")]
    Security,
    #[error("incorrect page")]
    Page,
    #[error("unexpected error")]
    Unexpected,
}

impl NativeError {
    /// Classify an engine last-error code
    pub fn from_code(code: u32) -> Self {
        use crate::engine::codes;

        match code {
            codes::ERR_UNKNOWN => NativeError::Unknown,
            codes::ERR_FILE => NativeError::File,
            codes::ERR_FORMAT => NativeError::Format,
            codes::ERR_PASSWORD => NativeError::Password,
            codes::ERR_SECURITY => NativeError::Security,
            codes::ERR_PAGE => NativeError::Page,
            _ => NativeError::Unexpected,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Serializable error kinds that may come back from a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    NativeOpen,
    HandleNotFound,
    InvalidState,
    Engine,
}

/// Wire form of an application error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeError>,
}

impl From<&Error> for RemoteError {
    fn from(err: &Error) -> Self {
        let (kind, native) = match err {
            Error::NativeOpen(native) => (RemoteErrorKind::NativeOpen, Some(*native)),
            Error::HandleNotFound(_) => (RemoteErrorKind::HandleNotFound, None),
            Error::InvalidState(_) => (RemoteErrorKind::InvalidState, None),
            // Host-side failures never originate in a worker; flatten them.
            _ => (RemoteErrorKind::Engine, None),
        };

        let message = match err {
            Error::HandleNotFound(msg) | Error::InvalidState(msg) | Error::Engine(msg) => {
                msg.clone()
            }
            other => other.to_string(),
        };

        RemoteError {
            kind,
            message,
            native,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::NativeOpen => {
                Error::NativeOpen(err.native.unwrap_or(NativeError::Unexpected))
            }
            RemoteErrorKind::HandleNotFound => Error::HandleNotFound(err.message),
            RemoteErrorKind::InvalidState => Error::InvalidState(err.message),
            RemoteErrorKind::Engine => Error::Engine(err.message),
        }
    }
}

impl From<crate::engine::EngineError> for Error {
    fn from(err: crate::engine::EngineError) -> Self {
        match err {
            crate::engine::EngineError::Code(code) => Error::NativeOpen(NativeError::from_code(code)),
            other => Error::Engine(other.to_string()),
        }
    }
}

impl Error {
    /// Whether the worker that produced this error should be treated as suspect
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Capacity(_) | Error::PoolClosed)
    }
}
