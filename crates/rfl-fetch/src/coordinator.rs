//! Batched resolution of file ids through the cache daemon and upstream.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rfl_config::{log_fetch_debug, log_fetch_info, log_fetch_warn, Config};
use rfl_store::key::{local_key, server_key};
use rfl_store::perms::{resolve_group, UmaskGuard};
use rfl_store::{blob, FileId, LocalCache};

use crate::peer::{CommandUpstream, PeerStream, Upstream};
use crate::progress::{NoProgress, Progress};
use crate::transport::{CacheTransport, DaemonTransport, NullTransport};
use crate::{stats, FetchError, Result};

/// Repository-local store, relative to the repository root.
pub const LOCAL_STORE_DIR: &str = ".rfl/store";

/// Upstream requests per round.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Per-repository fetch settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Namespace for keys in the shared cache
    pub repo_name: String,
    /// Cache daemon command; the cache root is appended as its argument
    pub cache_process: Option<String>,
    pub batch_size: usize,
    /// Paths that are never fetched
    pub skip_files: Vec<String>,
    /// Repository store holding `data/<local key>` entries
    pub local_store: Option<PathBuf>,
    /// Recorded in the cache usage log after each request
    pub repo_root: Option<PathBuf>,
    /// Print fetch statistics on close
    pub debug: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            repo_name: String::new(),
            cache_process: None,
            batch_size: DEFAULT_BATCH_SIZE,
            skip_files: vec![".hgtags".to_string()],
            local_store: None,
            repo_root: None,
            debug: false,
        }
    }
}

/// Makes requested file revisions present in the local cache.
///
/// Misses in the shared cache daemon are fetched from the upstream server in
/// rounds of `batch_size`, written to the [`LocalCache`] and pushed back to the
/// daemon. A request either resolves every id or reports the ones it could not.
pub struct FetchCoordinator {
    cache: LocalCache,
    transport: Box<dyn CacheTransport>,
    cache_command: String,
    upstream: Option<Box<dyn Upstream>>,
    progress: Box<dyn Progress>,
    options: FetchOptions,
}

impl FetchCoordinator {
    /// The transport is chosen once: a daemon when `cache_process` is set,
    /// otherwise the always-miss stand-in.
    pub fn new(cache: LocalCache, options: FetchOptions) -> Self {
        let transport: Box<dyn CacheTransport> = match options.cache_process {
            Some(_) => Box::new(DaemonTransport::new()),
            None => Box::new(NullTransport::new()),
        };
        let cache_command = options
            .cache_process
            .as_ref()
            .map(|cmd| format!("{} {}", cmd, cache.root().display()))
            .unwrap_or_default();
        Self {
            cache,
            transport,
            cache_command,
            upstream: None,
            progress: Box::new(NoProgress),
            options,
        }
    }

    /// Build a coordinator for the repository at `repo_root` from loaded
    /// configuration.
    pub fn from_config(config: &Config, repo_root: &Path) -> Result<Self> {
        let group = config.cache.group.as_deref().and_then(resolve_group);
        let mut cache = LocalCache::new(config.cache.root())?.with_group(group);
        if config.cache.validate {
            cache = cache.with_validation(config.cache.validate_log.clone());
        }

        let repo_name = if config.client.repo_name.is_empty() {
            repo_root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            config.client.repo_name.clone()
        };
        let options = FetchOptions {
            repo_name,
            cache_process: config.client.cache_process.clone(),
            batch_size: config.client.batch_size,
            skip_files: config.client.skip_files.clone(),
            local_store: Some(repo_root.join(LOCAL_STORE_DIR)),
            repo_root: Some(repo_root.to_path_buf()),
            debug: config.client.debug,
        };

        let mut coordinator = Self::new(cache, options);
        if let Some(fallback) = &config.client.fallback_path {
            coordinator = coordinator.with_upstream(Box::new(CommandUpstream::new(fallback.clone())));
        }
        Ok(coordinator)
    }

    /// Replace the transport chosen by [`FetchCoordinator::new`].
    pub fn with_transport(mut self, transport: Box<dyn CacheTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_upstream(mut self, upstream: Box<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Shared cache key for `file`.
    pub fn key_for(&self, file: &FileId) -> String {
        server_key(&self.options.repo_name, &file.path, &file.node)
    }

    /// Resolve `files` into the local cache, returning the ids the upstream
    /// server had no content for.
    pub fn request(&mut self, files: &[FileId]) -> Result<Vec<FileId>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let _umask = UmaskGuard::shared();

        if !self.transport.is_connected() {
            self.transport.connect(&self.cache_command)?;
        }

        let mut idmap: HashMap<String, &FileId> = HashMap::with_capacity(files.len());
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let key = self.key_for(file);
            if idmap.insert(key.clone(), file).is_none() {
                keys.push(key);
            }
        }
        let total = keys.len();

        self.transport.send(&frame("get", &keys));
        self.progress.update(0, total);

        let missed = self.collect_misses(&keys, &idmap);
        let mut done = total - missed.len();
        self.progress.update(done, total);

        let mut unresolved = Vec::new();
        if !missed.is_empty() {
            let upstream = self.upstream.as_ref().ok_or(FetchError::NoFallback)?;
            let mut peer = upstream.open()?;
            peer.call_stream("getfiles")?;

            let batch_size = self.options.batch_size.max(1);
            for batch in missed.chunks(batch_size) {
                let writer = peer.writer();
                for key in batch {
                    let file = idmap[key];
                    writeln!(writer, "{}{}", file.node.to_hex(), file.path)?;
                }
                writer.flush()?;
                log_fetch_debug!("sent upstream batch", files = batch.len() as u64);

                for key in batch {
                    if !self.receive_blob(&mut peer, key)? {
                        unresolved.push(idmap[key].clone());
                    }
                    done += 1;
                    self.progress.update(done, total);
                }
            }

            let writer = peer.writer();
            writer.write_all(b"\n")?;
            writer.flush()?;
            peer.close()?;

            let unresolved_keys: HashSet<String> =
                unresolved.iter().map(|file| self.key_for(file)).collect();
            let resolved: Vec<String> = missed
                .into_iter()
                .filter(|key| !unresolved_keys.contains(key))
                .collect();
            if !resolved.is_empty() {
                self.transport.send(&frame("set", &resolved));
            }
        }
        self.progress.complete();

        if let Some(root) = &self.options.repo_root {
            if let Err(e) = self.cache.mark_repo(root) {
                log_fetch_warn!("unable to update cache usage log", error = tracing::field::display(&e));
            }
        }
        Ok(unresolved)
    }

    /// Make `files` available locally, failing unless every one resolves.
    ///
    /// Paths on the skip list are ignored. Ids already in the shared cache or
    /// the repository store are not requested again unless `force` is set.
    pub fn prefetch(&mut self, files: &[FileId], force: bool) -> Result<()> {
        let missing: Vec<FileId> = files
            .iter()
            .filter(|file| !self.options.skip_files.contains(&file.path))
            .filter(|file| force || !self.is_present(file))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        stats::record_fetch(missing.len());
        let start = Instant::now();
        let unresolved = self.request(&missing)?;
        stats::record_cost(start.elapsed());

        if !unresolved.is_empty() {
            return Err(FetchError::Unresolved(unresolved.len()));
        }
        Ok(())
    }

    /// End the daemon session, printing the fetch summary in debug mode.
    pub fn close(&mut self) {
        let summary = stats::snapshot();
        if self.options.debug && !summary.is_empty() {
            eprintln!("{}", summary);
        }
        self.transport.close();
    }

    fn is_present(&self, file: &FileId) -> bool {
        if self.cache.contains(&self.key_for(file)) {
            return true;
        }
        self.options.local_store.as_ref().is_some_and(|store| {
            store
                .join("data")
                .join(local_key(&file.path, &file.node))
                .exists()
        })
    }

    /// Read daemon responses up to the terminator. A lost daemon turns every
    /// requested key into a miss.
    fn collect_misses(&mut self, keys: &[String], idmap: &HashMap<String, &FileId>) -> Vec<String> {
        let total = keys.len();
        let mut missed = Vec::new();
        let mut seen = HashSet::new();
        let mut hits = 0usize;
        loop {
            let Some(line) = self.transport.receive_line() else {
                log_fetch_warn!(
                    "cache connection closed early, fetching everything from the server",
                    files = total as u64
                );
                return keys.to_vec();
            };
            if line == "0" {
                return missed;
            }
            if let Some(count) = line.strip_prefix("_hits_") {
                match count.trim_end_matches('_').parse::<usize>() {
                    Ok(n) => {
                        hits += n;
                        self.progress.update(hits.min(total), total);
                    }
                    Err(_) => log_fetch_warn!("malformed hit report from cache", line = line.as_str()),
                }
                continue;
            }
            if !idmap.contains_key(&line) {
                log_fetch_warn!("cache reported an unrequested key", key = line.as_str());
                continue;
            }
            if seen.insert(line.clone()) {
                missed.push(line);
            }
        }
    }

    /// Read one `<len>\n<bytes>` response and store it under `key`. Returns
    /// false for the zero-length "no content" reply.
    fn receive_blob(&self, peer: &mut PeerStream, key: &str) -> Result<bool> {
        let reader = peer.reader();
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.strip_suffix('\n').unwrap_or(&line);
        if line.is_empty() {
            return Err(FetchError::ConnectionClosedEarly);
        }
        let size: usize = line
            .parse()
            .map_err(|_| FetchError::Protocol(line.to_string()))?;
        if size == 0 {
            log_fetch_info!("server has no content", key = key);
            return Ok(false);
        }

        let mut data = Vec::with_capacity(size.min(1 << 20));
        reader.take(size as u64).read_to_end(&mut data)?;
        if data.len() != size {
            return Err(FetchError::ShortRead {
                received: data.len(),
                expected: size,
            });
        }

        let payload = blob::decompress(&data)?;
        self.cache.write(key, &payload)?;
        stats::record_blob(size, &payload);
        Ok(true)
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// `<verb>\n<N>\n<key_1>\n...<key_N>\n`
fn frame(verb: &str, keys: &[String]) -> String {
    let mut request = format!("{}\n{}\n", verb, keys.len());
    for key in keys {
        request.push_str(key);
        request.push('\n');
    }
    request
}
