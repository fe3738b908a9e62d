//! In-memory content-addressed store.
//!
//! Object ids are SHA-256 digests of a kind tag plus a canonical JSON
//! encoding, so equal content always gets an equal id regardless of the order
//! in which objects were written.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::Store;
use crate::errors::StoreError;
use crate::object::{Commit, CommitData, CommitId, Conflict, ConflictId, FileId, Tree, TreeId};

#[derive(Debug, Default)]
struct MemoryObjects {
    files: HashMap<FileId, Vec<u8>>,
    trees: HashMap<TreeId, Tree>,
    conflicts: HashMap<ConflictId, Conflict>,
    commits: HashMap<CommitId, CommitData>,
}

/// A [`Store`] that keeps every object in process memory.
///
/// The object maps are wrapped in a `Mutex` so that `MemoryStore` is
/// `Send + Sync`.
#[derive(Debug)]
pub struct MemoryStore {
    empty_tree_id: TreeId,
    objects: Mutex<MemoryObjects>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let empty = Tree::new();
        let empty_tree_id = TreeId::from_bytes(&digest_json("tree", &empty).unwrap_or_default());
        let mut objects = MemoryObjects::default();
        objects.trees.insert(empty_tree_id.clone(), empty);
        Self {
            empty_tree_id,
            objects: Mutex::new(objects),
        }
    }

    /// Number of commits written so far.
    pub fn commit_count(&self) -> usize {
        self.objects().commits.len()
    }

    fn objects(&self) -> MutexGuard<'_, MemoryObjects> {
        self.objects.lock().unwrap_or_else(|poisoned| {
            warn!("memory store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn digest(kind: &str, bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

fn digest_json<T: Serialize>(kind: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    let encoded = serde_json::to_vec(value)?;
    Ok(digest(kind, &encoded))
}

impl Store for MemoryStore {
    fn empty_tree_id(&self) -> &TreeId {
        &self.empty_tree_id
    }

    fn read_file(&self, id: &FileId) -> Result<Vec<u8>, StoreError> {
        self.objects()
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                kind: "file",
                id: id.hex(),
            })
    }

    fn write_file(&self, contents: &[u8]) -> Result<FileId, StoreError> {
        let id = FileId::from_bytes(&digest("file", contents));
        self.objects().files.entry(id.clone()).or_insert_with(|| contents.to_vec());
        Ok(id)
    }

    fn get_tree(&self, id: &TreeId) -> Result<Tree, StoreError> {
        self.objects()
            .trees
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                kind: "tree",
                id: id.hex(),
            })
    }

    fn write_tree(&self, tree: &Tree) -> Result<TreeId, StoreError> {
        let id = TreeId::from_bytes(&digest_json("tree", tree)?);
        self.objects().trees.entry(id.clone()).or_insert_with(|| tree.clone());
        Ok(id)
    }

    fn get_conflict(&self, id: &ConflictId) -> Result<Conflict, StoreError> {
        self.objects()
            .conflicts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                kind: "conflict",
                id: id.hex(),
            })
    }

    fn write_conflict(&self, conflict: &Conflict) -> Result<ConflictId, StoreError> {
        let id = ConflictId::from_bytes(&digest_json("conflict", conflict)?);
        self.objects()
            .conflicts
            .entry(id.clone())
            .or_insert_with(|| conflict.clone());
        Ok(id)
    }

    fn get_commit(&self, id: &CommitId) -> Result<Commit, StoreError> {
        let data = self
            .objects()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                kind: "commit",
                id: id.hex(),
            })?;
        Ok(Commit::from_data(id.clone(), data))
    }

    fn write_commit(&self, data: CommitData) -> Result<Commit, StoreError> {
        let id = CommitId::from_bytes(&digest_json("commit", &data)?);
        self.objects()
            .commits
            .entry(id.clone())
            .or_insert_with(|| data.clone());
        Ok(Commit::from_data(id, data))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
