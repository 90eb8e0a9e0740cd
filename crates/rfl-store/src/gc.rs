//! # Local cache garbage collection
//!
//! One walk over the cache root. Entries that are in the keep set or were
//! accessed within [`KEEP_RECENT`] survive the walk; everything else is
//! removed immediately. Survivors then go oldest-access-first until the
//! retained size fits under the configured limit.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{LocalCache, Result, USAGE_LOG};

/// Entries accessed more recently than this are never collected by the walk.
pub const KEEP_RECENT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cache size limit (effectively unbounded).
pub const DEFAULT_CACHE_LIMIT: u64 = 1000 * 1024 * 1024 * 1024;

/// Statistics from a gc run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Files visited
    pub scanned: u64,
    /// Files removed, by the walk or by limit enforcement
    pub removed: u64,
    /// Total size before the run
    pub original_bytes: u64,
    /// Retained size after the run
    pub retained_bytes: u64,
}

impl GcStats {
    pub fn summary(&self) -> String {
        const GB: f64 = 1024.0 * 1024.0 * 1024.0;
        format!(
            "finished: removed {} of {} files ({:.2} GB to {:.2} GB)",
            self.removed,
            self.scanned,
            self.original_bytes as f64 / GB,
            self.retained_bytes as f64 / GB
        )
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Retained {
    accessed: SystemTime,
    seq: u64,
    path: PathBuf,
    size: u64,
}

impl LocalCache {
    /// Collect garbage, keeping `keep` keys and anything used in the last day,
    /// then trimming least-recently-accessed entries down to `limit` bytes.
    pub fn gc(&self, keep: &HashSet<String>, limit: u64) -> Result<GcStats> {
        self.gc_at(keep, limit, SystemTime::now())
    }

    pub(crate) fn gc_at(
        &self,
        keep: &HashSet<String>,
        limit: u64,
        now: SystemTime,
    ) -> Result<GcStats> {
        let mut stats = GcStats::default();
        let recent = now.checked_sub(KEEP_RECENT).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut queue: BinaryHeap<Reverse<Retained>> = BinaryHeap::new();
        let mut seq = 0u64;

        for entry in WalkDir::new(self.root()).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable cache path");
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() == USAGE_LOG {
                continue;
            }
            stats.scanned += 1;

            let path = entry.path().to_path_buf();
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "file was removed by another process");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let size = meta.len();
            let accessed = meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
            stats.original_bytes += size;

            let key = self.key_of(&path);
            let kept = key.as_deref().is_some_and(|k| keep.contains(k));
            if kept || accessed > recent {
                queue.push(Reverse(Retained {
                    accessed,
                    seq,
                    path,
                    size,
                }));
                seq += 1;
                stats.retained_bytes += size;
            } else {
                match fs::remove_file(&path) {
                    Ok(()) => stats.removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "unable to remove cache file"),
                }
            }
        }

        if stats.retained_bytes > limit {
            let excess = stats.retained_bytes - limit;
            info!(excess, limit, "enforcing cache limit");
            while stats.retained_bytes > limit {
                let Some(Reverse(oldest)) = queue.pop() else {
                    break;
                };
                match fs::remove_file(&oldest.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %oldest.path.display(), error = %e, "unable to remove cache file");
                        continue;
                    }
                }
                stats.retained_bytes -= oldest.size;
                stats.removed += 1;
            }
        }

        info!(
            removed = stats.removed,
            scanned = stats.scanned,
            retained_bytes = stats.retained_bytes,
            "cache gc complete"
        );
        Ok(stats)
    }
}
