//! Three-way merge of whole trees.
//!
//! Directories are merged entry by entry, files line by line. Anything that
//! cannot be resolved becomes a [`TreeValue::Conflict`] carrying the base,
//! ours, and theirs values, so a merge always produces a tree.

use std::collections::BTreeSet;

use tracing::debug;

use super::content::{merge_contents, ContentMerge};
use crate::errors::StoreError;
use crate::object::{Conflict, Tree, TreeId, TreeValue};
use crate::repo_path::RepoPathBuf;
use crate::store::Store;

pub const CONFLICT_LABELS: [&str; 3] = ["base", "ours", "theirs"];

/// A merged tree and the paths (relative to the merged tree) left conflicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMerge {
    pub tree: TreeId,
    pub conflicts: Vec<RepoPathBuf>,
}

impl TreeMerge {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub fn merge_trees(store: &dyn Store, base: &TreeId, ours: &TreeId, theirs: &TreeId) -> Result<TreeMerge, StoreError> {
    let mut merger = TreeMerger {
        store,
        conflicts: Vec::new(),
    };
    let tree = merger.merge_tree_ids(&RepoPathBuf::root(), base, ours, theirs)?;
    Ok(TreeMerge {
        tree,
        conflicts: merger.conflicts,
    })
}

struct TreeMerger<'a> {
    store: &'a dyn Store,
    conflicts: Vec<RepoPathBuf>,
}

impl TreeMerger<'_> {
    fn merge_tree_ids(
        &mut self,
        dir: &RepoPathBuf,
        base: &TreeId,
        ours: &TreeId,
        theirs: &TreeId,
    ) -> Result<TreeId, StoreError> {
        if ours == theirs || base == theirs {
            return Ok(ours.clone());
        }
        if base == ours {
            return Ok(theirs.clone());
        }

        let base_tree = self.store.get_tree(base)?;
        let ours_tree = self.store.get_tree(ours)?;
        let theirs_tree = self.store.get_tree(theirs)?;
        let names: BTreeSet<&str> = base_tree
            .entries()
            .chain(ours_tree.entries())
            .chain(theirs_tree.entries())
            .map(|(name, _)| name)
            .collect();

        let mut merged = Tree::new();
        for name in names {
            let value = self.merge_values(
                &dir.join_component(name),
                base_tree.get(name),
                ours_tree.get(name),
                theirs_tree.get(name),
            )?;
            if let Some(value) = value {
                merged.set(name, value);
            }
        }
        self.store.write_tree(&merged)
    }

    fn merge_values(
        &mut self,
        path: &RepoPathBuf,
        base: Option<&TreeValue>,
        ours: Option<&TreeValue>,
        theirs: Option<&TreeValue>,
    ) -> Result<Option<TreeValue>, StoreError> {
        if ours == theirs || base == theirs {
            return Ok(ours.cloned());
        }
        if base == ours {
            return Ok(theirs.cloned());
        }

        if let Some((base_id, ours_id, theirs_id)) = self.as_directories(base, ours, theirs) {
            let merged = self.merge_tree_ids(path, &base_id, &ours_id, &theirs_id)?;
            if &merged == self.store.empty_tree_id() {
                return Ok(None);
            }
            return Ok(Some(TreeValue::Tree { id: merged }));
        }

        if let (
            Some(TreeValue::File {
                id: ours_id,
                executable: ours_exec,
            }),
            Some(TreeValue::File {
                id: theirs_id,
                executable: theirs_exec,
            }),
        ) = (ours, theirs)
        {
            let (base_contents, base_exec) = match base {
                Some(TreeValue::File { id, executable }) => (Some(self.store.read_file(id)?), *executable),
                None => (Some(Vec::new()), *ours_exec),
                Some(_) => (None, *ours_exec),
            };
            if let Some(base_contents) = base_contents {
                let ours_contents = self.store.read_file(ours_id)?;
                let theirs_contents = self.store.read_file(theirs_id)?;
                if let ContentMerge::Clean(merged) = merge_contents(&base_contents, &ours_contents, &theirs_contents) {
                    let executable = if *ours_exec == base_exec { *theirs_exec } else { *ours_exec };
                    let id = self.store.write_file(&merged)?;
                    debug!(path = %path, "merged file contents");
                    return Ok(Some(TreeValue::File { id, executable }));
                }
            }
        }

        debug!(path = %path, "recording conflict");
        let conflict = Conflict::three_way(base.cloned(), ours.cloned(), theirs.cloned(), CONFLICT_LABELS);
        let id = self.store.write_conflict(&conflict)?;
        self.conflicts.push(path.clone());
        Ok(Some(TreeValue::Conflict { id }))
    }

    /// Tree ids for all three sides when each is a directory or absent, with
    /// absent sides read as the empty tree. `None` if any side is something
    /// else.
    fn as_directories(
        &self,
        base: Option<&TreeValue>,
        ours: Option<&TreeValue>,
        theirs: Option<&TreeValue>,
    ) -> Option<(TreeId, TreeId, TreeId)> {
        let empty = self.store.empty_tree_id();
        let side = |value: Option<&TreeValue>| match value {
            None => Some(empty.clone()),
            Some(TreeValue::Tree { id }) => Some(id.clone()),
            Some(_) => None,
        };
        if ![base, ours, theirs].iter().any(|v| v.is_some_and(TreeValue::is_tree)) {
            return None;
        }
        Some((side(base)?, side(ours)?, side(theirs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{value_at, MemoryStore};
    use crate::test_support::{path, write_tree};

    #[test]
    fn test_one_sided_changes_win() {
        let store = MemoryStore::new();
        let base = write_tree(&store, &[("a", "1\n"), ("b", "1\n")]);
        let ours = write_tree(&store, &[("a", "2\n"), ("b", "1\n")]);
        let theirs = write_tree(&store, &[("a", "1\n"), ("b", "1\n"), ("c/new", "n\n")]);
        let merged = merge_trees(&store, &base, &ours, &theirs).unwrap();
        assert!(merged.is_clean());
        assert_eq!(
            merged.tree,
            write_tree(&store, &[("a", "2\n"), ("b", "1\n"), ("c/new", "n\n")])
        );
    }

    #[test]
    fn test_file_edits_merge_by_line() {
        let store = MemoryStore::new();
        let base = write_tree(&store, &[("d/f", "a\nb\nc\nd\ne\n")]);
        let ours = write_tree(&store, &[("d/f", "A\nb\nc\nd\ne\n")]);
        let theirs = write_tree(&store, &[("d/f", "a\nb\nc\nd\nE\n")]);
        let merged = merge_trees(&store, &base, &ours, &theirs).unwrap();
        assert!(merged.is_clean());
        assert_eq!(merged.tree, write_tree(&store, &[("d/f", "A\nb\nc\nd\nE\n")]));
    }

    #[test]
    fn test_overlapping_edits_become_conflict_value() {
        let store = MemoryStore::new();
        let base = write_tree(&store, &[("f", "x\n")]);
        let ours = write_tree(&store, &[("f", "ours\n")]);
        let theirs = write_tree(&store, &[("f", "theirs\n")]);
        let merged = merge_trees(&store, &base, &ours, &theirs).unwrap();
        assert_eq!(merged.conflicts, vec![path("f")]);

        let Some(TreeValue::Conflict { id }) = value_at(&store, &merged.tree, &path("f")).unwrap() else {
            panic!("expected a conflict value");
        };
        let conflict = store.get_conflict(&id).unwrap();
        let labels: Vec<&str> = conflict.terms.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, CONFLICT_LABELS.to_vec());
        assert_eq!(conflict.terms[1].value, value_at(&store, &ours, &path("f")).unwrap());
    }

    #[test]
    fn test_delete_versus_modify_conflicts() {
        let store = MemoryStore::new();
        let base = write_tree(&store, &[("keep", "k"), ("f", "1\n")]);
        let ours = write_tree(&store, &[("keep", "k")]);
        let theirs = write_tree(&store, &[("keep", "k"), ("f", "2\n")]);
        let merged = merge_trees(&store, &base, &ours, &theirs).unwrap();
        assert_eq!(merged.conflicts, vec![path("f")]);
    }

    #[test]
    fn test_empty_base_adds_everything() {
        let store = MemoryStore::new();
        let empty = store.empty_tree_id().clone();
        let theirs = write_tree(&store, &[("a", "1"), ("b/c", "2")]);
        let merged = merge_trees(&store, &empty, &empty, &theirs).unwrap();
        assert!(merged.is_clean());
        assert_eq!(merged.tree, theirs);
    }
}
