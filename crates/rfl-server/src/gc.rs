//! Server blob cache garbage collection.
//!
//! A blob is removed only when it is unreachable from every head's manifest
//! AND older than the expiration window.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use rfl_config::{log_server_info, log_server_warn, ServerConfig};

use crate::host::Repository;
use crate::server::{blob_key, BlobServer};
use crate::Result;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a server cache gc pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerGcStats {
    pub scanned: u64,
    pub reachable: u64,
    pub removed: u64,
    pub removed_bytes: u64,
}

impl<R: Repository> BlobServer<R> {
    /// Remove unreachable blobs older than `expiration_days`.
    pub fn gc(&self, expiration_days: u64) -> Result<ServerGcStats> {
        self.gc_at(expiration_days, SystemTime::now())
    }

    /// Run [`BlobServer::gc`] if serving is enabled in `config`.
    pub fn gc_configured(&self, config: &ServerConfig) -> Result<Option<ServerGcStats>> {
        if !config.enabled {
            return Ok(None);
        }
        self.gc(config.expiration_days).map(Some)
    }

    pub(crate) fn gc_at(&self, expiration_days: u64, now: SystemTime) -> Result<ServerGcStats> {
        let root = self.cache_root();
        let mut needed: HashSet<PathBuf> = HashSet::new();
        for head in self.repository().heads()? {
            for (path, node) in self.repository().manifest(&head)? {
                if let Ok(key) = blob_key(&path, &node) {
                    needed.insert(root.join(key));
                }
            }
        }

        let expiration = now
            .checked_sub(DAY.saturating_mul(expiration_days.min(u32::MAX as u64) as u32))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut stats = ServerGcStats::default();
        for entry in walkdir::WalkDir::new(root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log_server_warn!("skipping unreadable cache path", error = tracing::field::display(&e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            stats.scanned += 1;
            if needed.contains(entry.path()) {
                stats.reachable += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let modified = metadata.modified()?;
            if modified >= expiration {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    stats.removed += 1;
                    stats.removed_bytes += metadata.len();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        log_server_info!(
            "server cache gc finished",
            scanned = stats.scanned,
            removed = stats.removed
        );
        Ok(stats)
    }
}
