//! Cache key derivation.
//!
//! Keys are relative paths under a cache root. The path hash is split into a
//! two-level fan-out so no single directory collects every file revision.
//!
//! ```text
//! <repo>/ab/cdef0123.../<hex id>     # server_key (shared cache, daemon)
//! abcdef0123.../<hex id>             # local_key (repository-local store)
//! ```
//!
//! An empty repository name drops the namespace segment.

use std::path::{Component, Path};

use sha1::{Digest, Sha1};

use crate::node::NodeId;

/// SHA-1 of a file path, in hex.
pub fn path_hash(path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key for the shared cache and the cache daemon, namespaced by repository.
pub fn server_key(repo_name: &str, path: &str, node: &NodeId) -> String {
    let hash = path_hash(path);
    if repo_name.is_empty() {
        return format!("{}/{}/{}", &hash[..2], &hash[2..], node.to_hex());
    }
    format!("{}/{}/{}/{}", repo_name, &hash[..2], &hash[2..], node.to_hex())
}

/// Key for the repository-local store (one repository, no namespace).
pub fn local_key(path: &str, node: &NodeId) -> String {
    format!("{}/{}", path_hash(path), node.to_hex())
}

/// Whether `key` stays below whatever root it is joined to: non-empty, no
/// NUL, and made only of plain names (no root, `.` or `..`).
pub fn is_relative_key(key: &str) -> bool {
    !key.is_empty()
        && !key.contains('\0')
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// The hex content id at the end of a key.
pub fn node_of_key(key: &str) -> Option<NodeId> {
    let (_, tail) = key.rsplit_once('/')?;
    NodeId::from_hex(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(byte: u8) -> NodeId {
        NodeId::new([byte; 20])
    }

    #[test]
    fn test_path_hash_is_sha1() {
        // sha1("") is a well-known constant
        assert_eq!(path_hash(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_server_key_layout() {
        let key = server_key("repo", "", &node(0xab));
        assert_eq!(
            key,
            format!(
                "repo/da/39a3ee5e6b4b0d3255bfef95601890afd80709/{}",
                "ab".repeat(20)
            )
        );
    }

    #[test]
    fn test_local_key_layout() {
        let key = local_key("", &node(1));
        assert_eq!(
            key,
            format!("da39a3ee5e6b4b0d3255bfef95601890afd80709/{}", "01".repeat(20))
        );
    }

    #[test]
    fn test_keys_are_deterministic() {
        for path in ["a.txt", "dir/b.rs", "deep/nested/path/c"] {
            assert_eq!(
                server_key("r", path, &node(3)),
                server_key("r", path, &node(3))
            );
            assert_eq!(local_key(path, &node(3)), local_key(path, &node(3)));
        }
    }

    #[test]
    fn test_distinct_inputs_distinct_keys() {
        assert_ne!(local_key("a", &node(1)), local_key("b", &node(1)));
        assert_ne!(local_key("a", &node(1)), local_key("a", &node(2)));
        assert_ne!(
            server_key("r1", "a", &node(1)),
            server_key("r2", "a", &node(1))
        );
        assert_ne!(path_hash("a")[..2], path_hash("b")[..2]);
    }

    #[test]
    fn test_empty_repo_name_stays_relative() {
        let key = server_key("", "a.txt", &node(4));
        assert!(!key.starts_with('/'));
        assert!(is_relative_key(&key));
        assert_eq!(key.split('/').count(), 3);
    }

    #[test]
    fn test_relative_key_check() {
        assert!(is_relative_key("repo/ab/cd/k"));
        assert!(is_relative_key(&local_key("x", &node(1))));
        for bad in ["", "/abs/k", "../k", "repo/../../k", "./k", "a\0b"] {
            assert!(!is_relative_key(bad), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_node_of_key() {
        let key = server_key("repo", "x/y", &node(9));
        assert_eq!(node_of_key(&key), Some(node(9)));
        assert_eq!(node_of_key("no-slash"), None);
    }
}
