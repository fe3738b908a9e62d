//! Moving tree content between the repository root and a prefix.
//!
//! Trees are content addressed and nested trees are referenced by id, so
//! relocation never copies entries: moving re-homes the root tree id under
//! the prefix, and extracting picks the tree id found at the prefix. That is
//! what makes `extract_subtree(move_tree_to_prefix(t, p), p) == t` hold
//! exactly, conflicts included.

use crate::errors::StoreError;
use crate::object::{TreeId, TreeValue};
use crate::prefix::Prefix;
use crate::store::{set_value_at, value_at, Store};

/// A new tree with every entry of `tree` re-homed under `prefix`.
pub fn move_tree_to_prefix(store: &dyn Store, tree: &TreeId, prefix: &Prefix) -> Result<TreeId, StoreError> {
    replace_subtree(store, store.empty_tree_id(), prefix, tree)
}

/// A new tree holding everything found under `prefix`, with the prefix
/// stripped. A file sitting exactly at the prefix has no relative path and is
/// left out.
pub fn extract_subtree(store: &dyn Store, tree: &TreeId, prefix: &Prefix) -> Result<TreeId, StoreError> {
    match value_at(store, tree, prefix.as_path())? {
        Some(TreeValue::Tree { id }) => Ok(id),
        _ => Ok(store.empty_tree_id().clone()),
    }
}

/// `root` with the content under `prefix` replaced by `subtree`. An empty
/// `subtree` removes the prefix directory altogether.
pub fn replace_subtree(
    store: &dyn Store,
    root: &TreeId,
    prefix: &Prefix,
    subtree: &TreeId,
) -> Result<TreeId, StoreError> {
    set_value_at(
        store,
        root,
        prefix.as_path(),
        Some(TreeValue::Tree { id: subtree.clone() }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Conflict;
    use crate::store::{leaf_entries, MemoryStore};
    use crate::test_support::{path, prefix, write_tree};

    #[test]
    fn test_move_and_extract_scenario() {
        let store = MemoryStore::new();
        let tree = write_tree(&store, &[("a.txt", "a"), ("b/c.txt", "c")]);
        let moved = move_tree_to_prefix(&store, &tree, &prefix("lib")).unwrap();
        let paths: Vec<String> = leaf_entries(&store, &moved)
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(paths, vec!["lib/a.txt", "lib/b/c.txt"]);
        assert_eq!(extract_subtree(&store, &moved, &prefix("lib")).unwrap(), tree);
    }

    #[test]
    fn test_round_trip_empty_tree() {
        let store = MemoryStore::new();
        let empty = store.empty_tree_id().clone();
        let moved = move_tree_to_prefix(&store, &empty, &prefix("deep/lib")).unwrap();
        assert_eq!(moved, empty);
        assert_eq!(extract_subtree(&store, &moved, &prefix("deep/lib")).unwrap(), empty);
    }

    #[test]
    fn test_round_trip_with_conflict_entry() {
        let store = MemoryStore::new();
        let base = write_tree(&store, &[("keep.txt", "k")]);
        let conflict = Conflict::three_way(None, None, None, ["base", "ours", "theirs"]);
        let conflict_id = store.write_conflict(&conflict).unwrap();
        let tree = set_value_at(
            &store,
            &base,
            &path("x/conflicted.txt"),
            Some(TreeValue::Conflict { id: conflict_id.clone() }),
        )
        .unwrap();
        let p = prefix("vendor/x");
        let moved = move_tree_to_prefix(&store, &tree, &p).unwrap();
        assert_eq!(
            value_at(&store, &moved, &path("vendor/x/x/conflicted.txt")).unwrap(),
            Some(TreeValue::Conflict { id: conflict_id })
        );
        assert_eq!(extract_subtree(&store, &moved, &p).unwrap(), tree);
    }

    #[test]
    fn test_extract_ignores_file_at_prefix() {
        let store = MemoryStore::new();
        let tree = write_tree(&store, &[("lib", "just a file"), ("other/y", "y")]);
        assert_eq!(
            &extract_subtree(&store, &tree, &prefix("lib")).unwrap(),
            store.empty_tree_id()
        );
    }

    #[test]
    fn test_replace_subtree_keeps_siblings() {
        let store = MemoryStore::new();
        let root = write_tree(&store, &[("lib/old.txt", "old"), ("src/main.rs", "main")]);
        let sub = write_tree(&store, &[("new.txt", "new")]);
        let replaced = replace_subtree(&store, &root, &prefix("lib"), &sub).unwrap();
        assert_eq!(
            replaced,
            write_tree(&store, &[("lib/new.txt", "new"), ("src/main.rs", "main")])
        );
        let cleared = replace_subtree(&store, &root, &prefix("lib"), store.empty_tree_id()).unwrap();
        assert_eq!(cleared, write_tree(&store, &[("src/main.rs", "main")]));
    }
}
