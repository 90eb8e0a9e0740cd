//! Eager blob generation after a commit lands on the server.

use rfl_config::{log_server_debug, log_server_info, log_server_warn};
use rfl_store::blob;
use rfl_store::perms::UmaskGuard;
use rfl_store::NodeId;

use crate::host::Repository;
use crate::server::{blob_key, BlobServer};
use crate::Result;

impl<R: Repository> BlobServer<R> {
    /// Generate blobs for every file at every head descending from `node`,
    /// stopping after the configured limit so the commit is not held up.
    /// Returns the number of blobs generated.
    pub fn precompute_after_commit(&self, node: &NodeId) -> Result<usize> {
        let _umask = UmaskGuard::shared();
        let limit = self.precompute_limit();
        let mut generated = 0;

        for head in self.repository().heads_since(node)? {
            for (path, filenode) in self.repository().manifest(&head)? {
                let key = match blob_key(&path, &filenode) {
                    Ok(key) => key,
                    Err(e) => {
                        log_server_warn!("skipping unservable path", error = tracing::field::display(&e));
                        continue;
                    }
                };
                if self.cache().contains(&key) {
                    continue;
                }
                if generated >= limit {
                    log_server_info!("precompute limit reached", limit = limit as u64);
                    return Ok(generated);
                }

                let compressed = blob::compress(&self.create_blob(&path, &filenode)?);
                self.persist(&key, &compressed);
                generated += 1;
            }
        }
        log_server_debug!("precomputed blobs", blobs = generated as u64);
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use crate::host::{FileChange, MemoryRepository, Repository};
    use crate::server::BlobServer;
    use tempfile::TempDir;

    fn repo_with_files(count: usize) -> (MemoryRepository, rfl_store::NodeId) {
        let mut repo = MemoryRepository::new();
        let changes: Vec<FileChange> = (0..count)
            .map(|i| FileChange::new(format!("f{i}.txt"), format!("content {i}")))
            .collect();
        let commit = repo.commit(None, &changes).unwrap();
        (repo, commit)
    }

    #[test]
    fn test_precompute_fills_cache() {
        let temp = TempDir::new().unwrap();
        let (repo, commit) = repo_with_files(5);
        let manifest = repo.manifest(&commit).unwrap();
        let server = BlobServer::new(repo, temp.path()).unwrap();

        assert_eq!(server.precompute_after_commit(&commit).unwrap(), 5);
        for (path, node) in manifest {
            assert!(temp.path().join(&path).join(node.to_hex()).exists());
        }
        // nothing left to do
        assert_eq!(server.precompute_after_commit(&commit).unwrap(), 0);
    }

    #[test]
    fn test_precompute_respects_limit() {
        let temp = TempDir::new().unwrap();
        let (repo, commit) = repo_with_files(10);
        let server = BlobServer::new(repo, temp.path())
            .unwrap()
            .with_precompute_limit(3);

        assert_eq!(server.precompute_after_commit(&commit).unwrap(), 3);
        assert_eq!(server.precompute_after_commit(&commit).unwrap(), 3);
    }

    #[test]
    fn test_precompute_covers_descendant_heads_only() {
        let temp = TempDir::new().unwrap();
        let mut repo = MemoryRepository::new();
        let root = repo.commit(None, &[FileChange::new("a", "1")]).unwrap();
        let left = repo.commit(Some(root), &[FileChange::new("b", "2")]).unwrap();
        let _right = repo.commit(Some(root), &[FileChange::new("c", "3")]).unwrap();
        let server = BlobServer::new(repo, temp.path()).unwrap();

        // heads after `left`: just `left` itself, holding a and b
        assert_eq!(server.precompute_after_commit(&left).unwrap(), 2);
        assert!(!temp.path().join("c").exists());
    }
}
