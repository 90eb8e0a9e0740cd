//! # rfl-fetch
//!
//! Client side of the remote file protocol.
//!
//! A [`FetchCoordinator`] resolves `(path, id)` pairs into the shared
//! [`LocalCache`](rfl_store::LocalCache):
//!
//! ```text
//! request(ids)
//!   ├── CacheTransport: get <keys>        -> hits / misses
//!   ├── Upstream peer:  getfiles <misses> -> <len>\n<lz4 blob> per id
//!   ├── LocalCache::write(server_key, decompressed payload)
//!   └── CacheTransport: set <resolved keys>
//! ```
//!
//! All I/O is synchronous and blocking; one coordinator serves one repository.

pub mod coordinator;
pub mod peer;
pub mod progress;
pub mod stats;
pub mod transport;

pub use coordinator::{FetchCoordinator, FetchOptions, LOCAL_STORE_DIR};
pub use peer::{CommandUpstream, PeerStream, Upstream};
pub use progress::{NoProgress, Progress};
pub use stats::FetchStats;
pub use transport::{CacheTransport, DaemonTransport, NullTransport};

use std::io;

use rfl_store::StoreError;
use thiserror::Error;

/// Errors that abort a fetch
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no remote file server configured; set client.fallback_path in .rfl/config.toml")]
    NoFallback,

    #[error("connection closed early")]
    ConnectionClosedEarly,

    #[error("only received {received} of {expected} bytes")]
    ShortRead { received: usize, expected: usize },

    #[error("unexpected response from server: {0:?}")]
    Protocol(String),

    #[error("cache connection already open")]
    AlreadyConnected,

    #[error("unable to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to download {0} files")]
    Unresolved(usize),
}

pub type Result<T> = std::result::Result<T, FetchError>;
