//! # rfl-store
//!
//! Content-addressed file cache for shallow repositories.
//!
//! Each cached file revision lives at `<cache root>/<key>` where the key is
//! derived from the repository name, the file path and the content id (see
//! [`key`]). Entries are written once through an atomic rename and never
//! modified afterwards; they disappear only through [`LocalCache::gc`] or
//! corruption quarantine.
//!
//! ## Directory Layout
//!
//! ```text
//! <cache root>/
//! ├── repos                          # usage log, one repository per line
//! └── <repo>/
//!     └── ab/
//!         └── cdef0123.../           # rest of sha1(path)
//!             └── <40-hex id>        # blob payload
//! ```

pub mod blob;
pub mod gc;
pub mod key;
mod node;
pub mod perms;

pub use blob::Ancestor;
pub use gc::{GcStats, DEFAULT_CACHE_LIMIT};
pub use node::{FileId, NodeId, NODE_HEX_LEN, NODE_LEN};

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::Gid;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Name of the usage log at the cache root.
pub const USAGE_LOG: &str = "repos";

/// Suffix given to quarantined entries.
pub const CORRUPT_SUFFIX: &str = ".corrupt";

/// Cache entries are read-only once in place; replacement goes through rename.
pub const ENTRY_MODE: u32 = 0o444;

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("key not in local cache: {key}")]
    NotFound { key: String },

    #[error("local cache write was corrupted: {path}")]
    Corrupt { path: PathBuf },

    #[error("invalid blob: {0}")]
    InvalidBlob(String),

    #[error("cache key escapes the cache root: {0:?}")]
    InvalidKey(String),

    #[error("invalid content id: {0}")]
    InvalidNode(String),

    #[error("decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of [`LocalCache::validate_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateStats {
    pub checked: u64,
    pub quarantined: u64,
}

/// Content-addressed on-disk cache.
///
/// Safe to share between processes and users: writers never lock, they
/// publish complete files with a rename. Two writers of the same key write the
/// same bytes, so the last one wins harmlessly.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
    validate: bool,
    validate_log: Option<PathBuf>,
    group: Option<Gid>,
}

impl LocalCache {
    /// Open a cache rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        perms::create_shared_dirs(&root, &root, None)?;
        Ok(Self {
            root,
            validate: false,
            validate_log: None,
            group: None,
        })
    }

    /// Check every entry's structure on write, read and lookup, appending
    /// failures to `log` when given.
    pub fn with_validation(mut self, log: Option<PathBuf>) -> Self {
        self.validate = true;
        self.validate_log = log;
        self
    }

    /// Hand newly created directories to `group`.
    pub fn with_group(mut self, group: Option<Gid>) -> Self {
        self.group = group;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validates(&self) -> bool {
        self.validate
    }

    /// Location of `key` under the root. Keys that are absolute or climb out
    /// with `..` are rejected.
    pub fn path_of(&self, key: &str) -> Result<PathBuf> {
        if !key::is_relative_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Inverse of [`path_of`](Self::path_of) for paths under the root.
    pub fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Whether a usable entry exists for `key`.
    ///
    /// With validation enabled a structurally broken entry is quarantined and
    /// reported as absent so the caller fetches it again.
    pub fn contains(&self, key: &str) -> bool {
        let Ok(path) = self.path_of(key) else {
            return false;
        };
        if !self.validate {
            return path.exists();
        }
        match fs::read(&path) {
            Ok(data) => {
                if blob::is_valid_payload(&data) {
                    true
                } else {
                    self.record_corruption(&path, "contains");
                    self.quarantine(&path);
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Read an entry. Missing, unreadable, empty and (when validating) corrupt
    /// entries all surface as [`StoreError::NotFound`].
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_of(key)?;
        let data = fs::read(&path).map_err(|_| StoreError::NotFound {
            key: key.to_string(),
        })?;

        if data.is_empty() {
            debug!(path = %path.display(), "removing empty cache entry");
            let _ = fs::remove_file(&path);
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }

        if self.validate && !blob::is_valid_payload(&data) {
            self.record_corruption(&path, "read");
            self.quarantine(&path);
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }

        Ok(data)
    }

    /// Publish `data` under `key`.
    ///
    /// The bytes go to a temporary file in the target directory which is
    /// flushed and renamed into place, so readers see either nothing or the
    /// complete entry.
    #[instrument(skip(self, data), level = "debug")]
    pub fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(key)?;
        let dir = path.parent().unwrap_or(&self.root);
        perms::create_shared_dirs(&self.root, dir, self.group)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(data)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(ENTRY_MODE))?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        if self.validate {
            let written = fs::read(&path).unwrap_or_default();
            if !blob::is_valid_payload(&written) {
                self.record_corruption(&path, "write");
                return Err(StoreError::Corrupt { path });
            }
        }
        Ok(())
    }

    /// Walk the whole cache, quarantining entries that fail the structural
    /// check regardless of the validation setting.
    pub fn validate_all(&self) -> Result<ValidateStats> {
        let mut stats = ValidateStats::default();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable cache path");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file()
                || name == USAGE_LOG
                || name.ends_with(CORRUPT_SUFFIX)
                || name.starts_with(".tmp")
            {
                continue;
            }
            stats.checked += 1;
            let data = match fs::read(entry.path()) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !blob::is_valid_payload(&data) {
                self.record_corruption(entry.path(), "validate");
                self.quarantine(entry.path());
                stats.quarantined += 1;
            }
        }
        Ok(stats)
    }

    /// Quarantine the entry at `key` after a check made by the caller failed.
    pub fn quarantine_key(&self, key: &str, op: &str) {
        let Ok(path) = self.path_of(key) else {
            return;
        };
        self.record_corruption(&path, op);
        self.quarantine(&path);
    }

    /// Record that the repository at `repo_root` uses this cache.
    pub fn mark_repo(&self, repo_root: &Path) -> Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(USAGE_LOG))?;
        writeln!(log, "{}", repo_root.display())?;
        Ok(())
    }

    /// Distinct repositories recorded in the usage log, in first-seen order.
    pub fn repos(&self) -> Result<Vec<PathBuf>> {
        let contents = match fs::read_to_string(self.root.join(USAGE_LOG)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut seen = HashSet::new();
        Ok(contents
            .lines()
            .filter(|line| !line.is_empty())
            .filter(|line| seen.insert(*line))
            .map(PathBuf::from)
            .collect())
    }

    fn quarantine(&self, path: &Path) {
        let mut target = path.as_os_str().to_owned();
        target.push(CORRUPT_SUFFIX);
        if let Err(e) = fs::rename(path, &target) {
            warn!(path = %path.display(), error = %e, "unable to quarantine corrupt entry");
        }
    }

    fn record_corruption(&self, path: &Path, op: &str) {
        warn!(path = %path.display(), op, "corrupt cache entry");
        let Some(log) = &self.validate_log else {
            return;
        };
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .and_then(|mut f| writeln!(f, "corrupt {} during {}", path.display(), op));
        if let Err(e) = appended {
            warn!(log = %log.display(), error = %e, "unable to write validation log");
        }
    }
}
