//! Object stores and path-level tree helpers.
//!
//! The engines only ever talk to a `&dyn Store`. Two implementations exist:
//! [`MemoryStore`] (SHA-256 content addressing, used for tests and
//! embedding) and [`GitStore`] (a real git repository via `git2`).

pub mod git;
pub mod memory;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::StoreError;
use crate::object::{Commit, CommitData, CommitId, Conflict, ConflictId, FileId, Tree, TreeId, TreeValue};
use crate::repo_path::RepoPathBuf;

pub use git::GitStore;
pub use memory::MemoryStore;

/// Immutable, content-addressed object storage.
pub trait Store: Send + Sync + fmt::Debug {
    /// Id of the tree with no entries.
    fn empty_tree_id(&self) -> &TreeId;

    fn read_file(&self, id: &FileId) -> Result<Vec<u8>, StoreError>;

    fn write_file(&self, contents: &[u8]) -> Result<FileId, StoreError>;

    fn get_tree(&self, id: &TreeId) -> Result<Tree, StoreError>;

    fn write_tree(&self, tree: &Tree) -> Result<TreeId, StoreError>;

    fn get_conflict(&self, id: &ConflictId) -> Result<Conflict, StoreError>;

    fn write_conflict(&self, conflict: &Conflict) -> Result<ConflictId, StoreError>;

    fn get_commit(&self, id: &CommitId) -> Result<Commit, StoreError>;

    /// Write a commit. Writing identical data twice yields the same id.
    fn write_commit(&self, data: CommitData) -> Result<Commit, StoreError>;

    /// Used by [`create_backend`](crate::backend::create_backend) to detect
    /// git-backed stores.
    fn as_any(&self) -> &dyn Any;
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// The value stored at `path` below `root`, or `None` if nothing is there.
///
/// The root path yields the root tree itself (or `None` when it is empty).
pub fn value_at(store: &dyn Store, root: &TreeId, path: &RepoPathBuf) -> Result<Option<TreeValue>, StoreError> {
    let mut current = TreeValue::Tree { id: root.clone() };
    for component in path.components() {
        let tree_id = match &current {
            TreeValue::Tree { id } => id.clone(),
            _ => return Ok(None),
        };
        let tree = store.get_tree(&tree_id)?;
        match tree.get(component) {
            Some(value) => current = value.clone(),
            None => return Ok(None),
        }
    }
    match current {
        TreeValue::Tree { ref id } if id == store.empty_tree_id() => Ok(None),
        value => Ok(Some(value)),
    }
}

/// Write a new root tree in which `path` holds `value` (or nothing).
///
/// Directories emptied by a removal are dropped, and a directory value equal
/// to the empty tree is treated as a removal, so no empty nested tree is ever
/// written. Non-directory entries standing where a directory is needed are
/// replaced. At the root path only a directory value is meaningful; anything
/// else yields the empty tree. An edit that changes nothing returns `root`.
pub fn set_value_at(
    store: &dyn Store,
    root: &TreeId,
    path: &RepoPathBuf,
    value: Option<TreeValue>,
) -> Result<TreeId, StoreError> {
    let components: Vec<&str> = path.components().collect();
    if components.is_empty() {
        return Ok(match value {
            Some(TreeValue::Tree { id }) => id,
            _ => store.empty_tree_id().clone(),
        });
    }
    set_in_tree(store, Some(root), &components, value)
}

fn set_in_tree(
    store: &dyn Store,
    tree_id: Option<&TreeId>,
    components: &[&str],
    value: Option<TreeValue>,
) -> Result<TreeId, StoreError> {
    let mut tree = match tree_id {
        Some(id) => store.get_tree(id)?,
        None => Tree::new(),
    };
    let Some((name, rest)) = components.split_first() else {
        return store.write_tree(&tree);
    };

    let new_value = if rest.is_empty() {
        value.filter(|v| v.as_tree_id() != Some(store.empty_tree_id()))
    } else {
        let child = tree.get(name).and_then(TreeValue::as_tree_id).cloned();
        let child_id = set_in_tree(store, child.as_ref(), rest, value)?;
        if &child_id == store.empty_tree_id() {
            None
        } else {
            Some(TreeValue::Tree { id: child_id })
        }
    };

    if let Some(id) = tree_id {
        if tree.get(name) == new_value.as_ref() {
            return Ok(id.clone());
        }
    }
    match new_value {
        Some(v) => tree.set(*name, v),
        None => {
            tree.remove(name);
        }
    }
    store.write_tree(&tree)
}

/// All non-directory entries below `root`, depth-first in path order.
/// Conflicts are leaves.
pub fn leaf_entries(store: &dyn Store, root: &TreeId) -> Result<Vec<(RepoPathBuf, TreeValue)>, StoreError> {
    let mut out = Vec::new();
    let mut stack = vec![(RepoPathBuf::root(), root.clone())];
    while let Some((dir, tree_id)) = stack.pop() {
        let tree = store.get_tree(&tree_id)?;
        let mut subdirs = Vec::new();
        for (name, value) in tree.entries() {
            let path = dir.join_component(name);
            match value {
                TreeValue::Tree { id } => subdirs.push((path, id.clone())),
                other => out.push((path, other.clone())),
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Batches path edits on top of a base tree.
pub struct TreeEditor<'a> {
    store: &'a dyn Store,
    base: TreeId,
    edits: BTreeMap<RepoPathBuf, Option<TreeValue>>,
}

impl<'a> TreeEditor<'a> {
    pub fn new(store: &'a dyn Store, base: TreeId) -> Self {
        Self {
            store,
            base,
            edits: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, path: RepoPathBuf, value: TreeValue) -> &mut Self {
        self.edits.insert(path, Some(value));
        self
    }

    pub fn remove(&mut self, path: RepoPathBuf) -> &mut Self {
        self.edits.insert(path, None);
        self
    }

    /// Write a regular file with `contents` at `path`.
    pub fn write_file(&mut self, path: RepoPathBuf, contents: &[u8]) -> Result<&mut Self, StoreError> {
        let id = self.store.write_file(contents)?;
        Ok(self.set(
            path,
            TreeValue::File {
                id,
                executable: false,
            },
        ))
    }

    pub fn write(self) -> Result<TreeId, StoreError> {
        let mut root = self.base;
        for (path, value) in self.edits {
            root = set_value_at(self.store, &root, &path, value)?;
        }
        Ok(root)
    }
}
