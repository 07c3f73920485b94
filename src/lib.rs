//! PDF Worker Pool
//!
//! Safe access to a single-threaded, non-reentrant native PDF engine.
//!
//! # Modules
//!
//! - `handles`: opaque tokens in place of native pointers, per-document tables
//! - `instance`: one engine behind a mutex, plus the operation catalog
//! - `rpc`: request/response bridge across the process boundary
//! - `worker`: supervised `pdf-worker` subprocesses
//! - `pool`: bounded, health-checked object pool
//! - `document`: `DocumentPool` and `Document`, the caller-facing API
//!
//! Use an [`Instance`] directly for in-process access, or a [`DocumentPool`]
//! to run every document in its own worker process.

pub mod config;
pub mod document;
pub mod engine;
pub mod enums;
pub mod error;
pub mod handles;
pub mod instance;
pub mod pool;
pub mod requests;
pub mod responses;
pub mod rpc;
pub mod worker;

pub use config::{PoolConfig, WorkerCommand};
pub use document::{Document, DocumentPool, DocumentSource, OpenOptions};
pub use error::{Error, NativeError, Result};
pub use handles::DocumentRef;
pub use instance::Instance;
pub use pool::PoolStats;
pub use requests::PageSelector;
