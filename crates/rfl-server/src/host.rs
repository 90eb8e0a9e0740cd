//! What the blob server needs from the host version-control engine.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{anyhow, bail, Context};
use rfl_store::{Ancestor, FileId, NodeId};
use sha1::{Digest, Sha1};

/// Read access to a full (non-shallow) repository.
pub trait Repository {
    /// Raw content of one file revision.
    fn file_data(&self, path: &str, node: &NodeId) -> anyhow::Result<Vec<u8>>;

    /// The revision itself followed by every ancestor, across renames.
    fn file_ancestry(&self, path: &str, node: &NodeId) -> anyhow::Result<Vec<Ancestor>>;

    /// Current head changesets.
    fn heads(&self) -> anyhow::Result<Vec<NodeId>>;

    /// Heads descending from `node`, including `node` itself if it is a head.
    fn heads_since(&self, node: &NodeId) -> anyhow::Result<Vec<NodeId>>;

    /// `(path, file revision)` pairs tracked at changeset `head`.
    fn manifest(&self, head: &NodeId) -> anyhow::Result<Vec<(String, NodeId)>>;

    /// Shallow repositories hold no history and cannot serve blobs.
    fn is_shallow(&self) -> bool {
        false
    }
}

/// A file change recorded by [`MemoryRepository::commit`].
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub data: Vec<u8>,
    /// Revision this file was copied or renamed from
    pub copy_from: Option<FileId>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            copy_from: None,
        }
    }

    pub fn copied_from(mut self, source: FileId) -> Self {
        self.copy_from = Some(source);
        self
    }
}

#[derive(Debug, Clone)]
struct FileRevision {
    data: Vec<u8>,
    parents: Vec<FileId>,
    linknode: NodeId,
}

#[derive(Debug, Clone)]
struct Changeset {
    parent: Option<NodeId>,
    manifest: Vec<(String, NodeId)>,
}

/// Linear-history repository kept in memory.
///
/// Ids are SHA-1 over the parent ids and the content, so identical histories
/// produce identical ids.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    files: HashMap<FileId, FileRevision>,
    changesets: HashMap<NodeId, Changeset>,
    order: Vec<NodeId>,
    shallow: bool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shallow(&mut self, shallow: bool) {
        self.shallow = shallow;
    }

    /// Record a changeset on top of `parent` and return its id.
    pub fn commit(&mut self, parent: Option<NodeId>, changes: &[FileChange]) -> anyhow::Result<NodeId> {
        let mut manifest: HashMap<String, NodeId> = match parent {
            Some(p) => self
                .changesets
                .get(&p)
                .with_context(|| format!("unknown parent changeset {p}"))?
                .manifest
                .iter()
                .cloned()
                .collect(),
            None => HashMap::new(),
        };

        let mut added = Vec::with_capacity(changes.len());
        for change in changes {
            let parents: Vec<FileId> = match &change.copy_from {
                Some(source) => {
                    if !self.files.contains_key(source) {
                        bail!("unknown copy source {}@{}", source.path, source.node);
                    }
                    vec![source.clone()]
                }
                None => manifest
                    .get(&change.path)
                    .map(|node| vec![FileId::new(change.path.clone(), *node)])
                    .unwrap_or_default(),
            };
            let mut hasher = Sha1::new();
            for p in &parents {
                hasher.update(p.node.as_bytes());
            }
            hasher.update(&change.data);
            let node = node_from_digest(hasher);
            manifest.insert(change.path.clone(), node);
            added.push((FileId::new(change.path.clone(), node), change.data.clone(), parents));
        }

        let mut manifest: Vec<(String, NodeId)> = manifest.into_iter().collect();
        manifest.sort();
        let mut hasher = Sha1::new();
        if let Some(p) = parent {
            hasher.update(p.as_bytes());
        }
        for (path, node) in &manifest {
            hasher.update(path.as_bytes());
            hasher.update(node.as_bytes());
        }
        let changeset = node_from_digest(hasher);

        for (id, data, parents) in added {
            self.files.entry(id).or_insert(FileRevision {
                data,
                parents,
                linknode: changeset,
            });
        }
        self.changesets.insert(changeset, Changeset { parent, manifest });
        self.order.push(changeset);
        Ok(changeset)
    }

    fn revision(&self, path: &str, node: &NodeId) -> anyhow::Result<&FileRevision> {
        self.files
            .get(&FileId::new(path, *node))
            .ok_or_else(|| anyhow!("no revision {node} of {path}"))
    }

    fn is_ancestor(&self, ancestor: &NodeId, mut node: NodeId) -> bool {
        loop {
            if node == *ancestor {
                return true;
            }
            match self.changesets.get(&node).and_then(|c| c.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }
}

fn node_from_digest(hasher: Sha1) -> NodeId {
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest);
    NodeId::new(bytes)
}

impl Repository for MemoryRepository {
    fn file_data(&self, path: &str, node: &NodeId) -> anyhow::Result<Vec<u8>> {
        Ok(self.revision(path, node)?.data.clone())
    }

    fn file_ancestry(&self, path: &str, node: &NodeId) -> anyhow::Result<Vec<Ancestor>> {
        let mut ancestry = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([FileId::new(path, *node)]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let revision = self.revision(&id.path, &id.node)?;
            let parent = |i: usize| revision.parents.get(i).map(|p| p.node).unwrap_or(NodeId::NULL);
            let copy_from = revision
                .parents
                .first()
                .filter(|p| p.path != id.path)
                .map(|p| p.path.clone());
            ancestry.push(Ancestor {
                node: id.node,
                p1: parent(0),
                p2: parent(1),
                linknode: revision.linknode,
                copy_from,
            });
            queue.extend(revision.parents.iter().cloned());
        }
        Ok(ancestry)
    }

    fn heads(&self) -> anyhow::Result<Vec<NodeId>> {
        let parents: HashSet<NodeId> = self.changesets.values().filter_map(|c| c.parent).collect();
        Ok(self
            .order
            .iter()
            .filter(|node| !parents.contains(node))
            .copied()
            .collect())
    }

    fn heads_since(&self, node: &NodeId) -> anyhow::Result<Vec<NodeId>> {
        if !self.changesets.contains_key(node) {
            bail!("unknown changeset {node}");
        }
        Ok(self
            .heads()?
            .into_iter()
            .filter(|head| self.is_ancestor(node, *head))
            .collect())
    }

    fn manifest(&self, head: &NodeId) -> anyhow::Result<Vec<(String, NodeId)>> {
        self.changesets
            .get(head)
            .map(|c| c.manifest.clone())
            .ok_or_else(|| anyhow!("unknown changeset {head}"))
    }

    fn is_shallow(&self) -> bool {
        self.shallow
    }
}
