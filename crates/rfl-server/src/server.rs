//! Blob generation, the server-side blob cache and the `getfiles` stream.
//!
//! ```text
//! client -> getfiles\n
//! client -> <40 hex id><path>\n  (repeated, flushed per batch)
//! server <- <len>\n<lz4 blob>    (one per request, in order; "0\n" for the null id)
//! client -> \n                   (end of requests)
//! ```

use std::io::{BufRead, Write};
use std::path::Path;

use nix::unistd::Gid;
use rfl_config::{log_server_debug, log_server_warn, Config};
use rfl_store::perms::{resolve_group, UmaskGuard};
use rfl_store::{blob, key, LocalCache, NodeId, StoreError, NODE_HEX_LEN};

use crate::host::Repository;
use crate::{Result, ServerError};

/// Blobs precomputed per incoming commit by default.
pub const DEFAULT_PRECOMPUTE_LIMIT: usize = 500;

/// Serves compressed file blobs out of a full repository.
///
/// Blobs are cached at `<cache root>/<path>/<hex id>` and shared by every
/// server process pointing at the same root.
pub struct BlobServer<R> {
    repo: R,
    cache: LocalCache,
    validate: bool,
    precompute_limit: usize,
}

impl<R: Repository> BlobServer<R> {
    pub fn new(repo: R, cache_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            repo,
            cache: LocalCache::new(cache_root)?,
            validate: false,
            precompute_limit: DEFAULT_PRECOMPUTE_LIMIT,
        })
    }

    /// Server for the repository stored at `repo_path`, using `[server]` and
    /// the `[cache]` group setting.
    pub fn from_config(repo: R, repo_path: &Path, config: &Config) -> Result<Self> {
        let group = config.cache.group.as_deref().and_then(resolve_group);
        Ok(Self::new(repo, config.server.cache_root(repo_path))?
            .with_group(group)
            .with_validation(config.server.validate)
            .with_precompute_limit(config.server.precompute_limit))
    }

    /// Check cached blobs before serving them, regenerating broken ones.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_group(mut self, group: Option<Gid>) -> Self {
        self.cache = self.cache.with_group(group);
        self
    }

    pub fn with_precompute_limit(mut self, limit: usize) -> Self {
        self.precompute_limit = limit;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn cache_root(&self) -> &Path {
        self.cache.root()
    }

    pub(crate) fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub(crate) fn precompute_limit(&self) -> usize {
        self.precompute_limit
    }

    /// Build the uncompressed blob for one file revision.
    pub fn create_blob(&self, path: &str, node: &NodeId) -> Result<Vec<u8>> {
        let content = self.repo.file_data(path, node)?;
        let ancestry = self.repo.file_ancestry(path, node)?;
        Ok(blob::create_blob(&content, &ancestry))
    }

    /// Compressed blob for one file revision, from the cache when possible.
    pub fn get_blob(&self, path: &str, node: &NodeId) -> Result<Vec<u8>> {
        let key = blob_key(path, node)?;
        match self.cache.read(&key) {
            Ok(data) if !self.validate || is_valid_blob(&data) => return Ok(data),
            Ok(_) => self.cache.quarantine_key(&key, "getfiles"),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let compressed = blob::compress(&self.create_blob(path, node)?);
        self.persist(&key, &compressed);
        Ok(compressed)
    }

    /// Answer one `getfiles` session: requests until an empty line or EOF.
    /// Returns the number of blobs sent.
    pub fn getfiles<I: BufRead, O: Write>(&self, input: &mut I, output: &mut O) -> Result<usize> {
        if self.repo.is_shallow() {
            return Err(ServerError::Shallow);
        }
        let _umask = UmaskGuard::shared();

        let mut sent = 0;
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let request = line.strip_suffix('\n').unwrap_or(&line);
            if request.is_empty() {
                break;
            }
            let (node, path) = parse_request(request)?;
            if node.is_null() {
                output.write_all(b"0\n")?;
                output.flush()?;
                continue;
            }

            let data = self.get_blob(path, &node)?;
            writeln!(output, "{}", data.len())?;
            output.write_all(&data)?;
            output.flush()?;
            sent += 1;
        }
        log_server_debug!("getfiles finished", blobs = sent as u64);
        Ok(sent)
    }

    /// Dispatch commands read from a peer connection until it closes.
    pub fn serve<I: BufRead, O: Write>(&self, input: &mut I, output: &mut O) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }
            match line.trim_end_matches('\n') {
                "" => continue,
                "getfiles" => {
                    self.getfiles(input, output)?;
                }
                other => return Err(ServerError::UnknownCommand(other.to_string())),
            }
        }
    }

    /// Store a blob in the cache. Failures are logged, never raised: a server
    /// that can only read the cache still serves.
    pub(crate) fn persist(&self, key: &str, data: &[u8]) {
        if let Err(e) = self.cache.write(key, data) {
            log_server_warn!(
                "unable to cache blob",
                key = key,
                error = tracing::field::display(&e)
            );
        }
    }
}

/// Cache key `<path>/<hex id>`. Paths that would leave the cache root are
/// rejected.
pub fn blob_key(path: &str, node: &NodeId) -> Result<String> {
    if !key::is_relative_key(path) {
        return Err(ServerError::InvalidPath(path.to_string()));
    }
    Ok(format!("{}/{}", path, node.to_hex()))
}

fn parse_request(request: &str) -> Result<(NodeId, &str)> {
    let invalid = || ServerError::InvalidRequest(request.to_string());
    if request.len() < NODE_HEX_LEN || !request.is_char_boundary(NODE_HEX_LEN) {
        return Err(invalid());
    }
    let (hex, path) = request.split_at(NODE_HEX_LEN);
    let node = NodeId::from_hex(hex).ok_or_else(invalid)?;
    Ok((node, path))
}

fn is_valid_blob(data: &[u8]) -> bool {
    blob::decompress(data)
        .map(|payload| blob::is_valid_payload(&payload))
        .unwrap_or(false)
}
