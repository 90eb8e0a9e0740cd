//! # rfl-server
//!
//! Serves file blobs to shallow clients.
//!
//! - [`host::Repository`]: what the host version-control engine provides
//! - [`BlobServer`]: blob cache, `getfiles` streaming, commit precompute and gc

pub mod gc;
pub mod host;
mod precompute;
pub mod server;

pub use gc::ServerGcStats;
pub use host::{FileChange, MemoryRepository, Repository};
pub use server::{blob_key, BlobServer, DEFAULT_PRECOMPUTE_LIMIT};

use std::io;

use rfl_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] anyhow::Error),

    #[error("cannot fetch remote files from shallow repo")]
    Shallow,

    #[error("invalid file path: {0:?}")]
    InvalidPath(String),

    #[error("malformed getfiles request: {0:?}")]
    InvalidRequest(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
