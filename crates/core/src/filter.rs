//! Classifying commits by whether they change a prefix.

use crate::errors::StoreError;
use crate::object::Commit;
use crate::prefix::Prefix;
use crate::relocate::extract_subtree;
use crate::store::Store;

/// True if the content under `prefix` differs from that of any parent. A
/// root commit is compared against an empty prefix.
///
/// Trees are content addressed, so comparing the extracted tree ids is the
/// restricted diff.
pub fn commit_touches_prefix(store: &dyn Store, commit: &Commit, prefix: &Prefix) -> Result<bool, StoreError> {
    let own = extract_subtree(store, &commit.tree, prefix)?;
    if commit.parents.is_empty() {
        return Ok(&own != store.empty_tree_id());
    }
    for parent_id in &commit.parents {
        let parent = store.get_commit(parent_id)?;
        if extract_subtree(store, &parent.tree, prefix)? != own {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Pair each commit with [`commit_touches_prefix`]. Nothing is written.
pub fn filter_by_prefix(
    store: &dyn Store,
    commits: impl IntoIterator<Item = Commit>,
    prefix: &Prefix,
) -> Result<Vec<(Commit, bool)>, StoreError> {
    commits
        .into_iter()
        .map(|commit| {
            let touches = commit_touches_prefix(store, &commit, prefix)?;
            Ok((commit, touches))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{commit_files, prefix};

    #[test]
    fn test_classifies_linear_history() {
        let store = MemoryStore::new();
        let c1 = commit_files(&store, &[], &[("lib/x", "1")], "C1", 1);
        let c2 = commit_files(&store, &[&c1.id], &[("lib/x", "1"), ("other/y", "y")], "C2", 2);
        let c3 = commit_files(&store, &[&c2.id], &[("lib/x", "2"), ("other/y", "y")], "C3", 3);
        let touched: Vec<bool> = filter_by_prefix(&store, vec![c1, c2, c3], &prefix("lib"))
            .unwrap()
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(touched, vec![true, false, true]);
    }

    #[test]
    fn test_merge_touches_if_any_parent_differs() {
        let store = MemoryStore::new();
        let p1 = commit_files(&store, &[], &[("lib/x", "1")], "P1", 1);
        let p2 = commit_files(&store, &[], &[("other/y", "y")], "P2", 2);
        let merge = commit_files(&store, &[&p1.id, &p2.id], &[("lib/x", "1"), ("other/y", "y")], "M", 3);
        assert!(commit_touches_prefix(&store, &merge, &prefix("lib")).unwrap());

        let same = commit_files(&store, &[&p1.id, &p1.id], &[("lib/x", "1")], "same", 4);
        assert!(!commit_touches_prefix(&store, &same, &prefix("lib")).unwrap());
    }

    #[test]
    fn test_merge_matching_first_parent_still_touches() {
        let store = MemoryStore::new();
        let base = commit_files(&store, &[], &[("lib/x", "1")], "base", 1);
        let first = commit_files(&store, &[&base.id], &[("lib/x", "1"), ("other/y", "y")], "first", 2);
        let second = commit_files(&store, &[&base.id], &[("lib/x", "2")], "second", 3);
        let merge = commit_files(
            &store,
            &[&first.id, &second.id],
            &[("lib/x", "1"), ("other/y", "y")],
            "merge keeps first side",
            4,
        );
        let classified = filter_by_prefix(&store, vec![first, merge], &prefix("lib")).unwrap();
        assert!(!classified[0].1);
        assert!(classified[1].1);
    }

    #[test]
    fn test_root_commit_without_prefix_content() {
        let store = MemoryStore::new();
        let root = commit_files(&store, &[], &[("README", "r")], "root", 1);
        assert!(!commit_touches_prefix(&store, &root, &prefix("lib")).unwrap());
    }
}
