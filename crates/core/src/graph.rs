//! Ancestor traversal over a [`Store`].

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::{StoreError, SubtreeError};
use crate::object::{Commit, CommitId};
use crate::store::Store;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Commits reachable from `heads`, parents before children.
///
/// Commits for which `is_boundary` returns true are neither returned nor
/// walked through. The order is a depth-first post-order that follows parent
/// order, so it only depends on the graph itself. A commit reached again
/// while its own ancestors are still being visited fails with
/// [`SubtreeError::CyclicHistory`].
pub fn topo_order<F>(store: &dyn Store, heads: &[CommitId], mut is_boundary: F) -> Result<Vec<Commit>, SubtreeError>
where
    F: FnMut(&Commit) -> Result<bool, SubtreeError>,
{
    let mut marks: HashMap<CommitId, Mark> = HashMap::new();
    let mut boundaries: HashSet<CommitId> = HashSet::new();
    let mut loaded: HashMap<CommitId, Commit> = HashMap::new();
    let mut order = Vec::new();
    let mut stack: Vec<(CommitId, bool)> = heads.iter().rev().map(|id| (id.clone(), false)).collect();

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            marks.insert(id.clone(), Mark::Done);
            if let Some(commit) = loaded.remove(&id) {
                order.push(commit);
            }
            continue;
        }
        match marks.get(&id) {
            Some(Mark::Done) => continue,
            Some(Mark::InProgress) => return Err(SubtreeError::CyclicHistory(id)),
            None => {}
        }
        if boundaries.contains(&id) {
            continue;
        }
        let commit = store.get_commit(&id)?;
        if is_boundary(&commit)? {
            boundaries.insert(id);
            continue;
        }
        marks.insert(id.clone(), Mark::InProgress);
        stack.push((id.clone(), true));
        for parent in commit.parents.iter().rev() {
            stack.push((parent.clone(), false));
        }
        loaded.insert(id, commit);
    }
    Ok(order)
}

/// Every ancestor of `head` (including itself), children before parents.
pub fn ancestors_newest_first(store: &dyn Store, head: &CommitId) -> Result<Vec<Commit>, SubtreeError> {
    let mut order = topo_order(store, std::slice::from_ref(head), |_| Ok(false))?;
    order.reverse();
    Ok(order)
}

/// Ids of `head` and all its ancestors.
pub fn ancestor_ids(store: &dyn Store, head: &CommitId) -> Result<HashSet<CommitId>, StoreError> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([head.clone()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        queue.extend(store.get_commit(&id)?.parents);
    }
    Ok(seen)
}

/// True if `ancestor` is `descendant` or one of its ancestors.
pub fn is_ancestor(store: &dyn Store, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, StoreError> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([descendant.clone()]);
    while let Some(id) = queue.pop_front() {
        if &id == ancestor {
            return Ok(true);
        }
        if seen.insert(id.clone()) {
            queue.extend(store.get_commit(&id)?.parents);
        }
    }
    Ok(false)
}

/// Best common ancestors of `a` and `b`: common ancestors that are not an
/// ancestor of another common ancestor. Ordered newest first along `a`.
pub fn merge_bases(store: &dyn Store, a: &CommitId, b: &CommitId) -> Result<Vec<CommitId>, SubtreeError> {
    let of_b = ancestor_ids(store, b)?;
    let common: Vec<Commit> = ancestors_newest_first(store, a)?
        .into_iter()
        .filter(|c| of_b.contains(&c.id))
        .collect();
    // Every ancestor of a common ancestor is itself common, so a common
    // commit is dominated exactly when it is the parent of another one.
    let dominated: HashSet<&CommitId> = common.iter().flat_map(|c| c.parents.iter()).collect();
    Ok(common
        .iter()
        .filter(|c| !dominated.contains(&c.id))
        .map(|c| c.id.clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::commit_files;

    #[test]
    fn test_topo_order_parents_first() {
        let store = MemoryStore::new();
        let root = commit_files(&store, &[], &[("a", "1")], "root", 1);
        let left = commit_files(&store, &[&root.id], &[("a", "2")], "left", 2);
        let right = commit_files(&store, &[&root.id], &[("a", "3")], "right", 3);
        let merge = commit_files(&store, &[&left.id, &right.id], &[("a", "4")], "merge", 4);

        let ids: Vec<CommitId> = topo_order(&store, &[merge.id.clone()], |_| Ok(false))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![root.id, left.id, right.id, merge.id]);
    }

    #[test]
    fn test_topo_order_stops_at_boundary() {
        let store = MemoryStore::new();
        let root = commit_files(&store, &[], &[("a", "1")], "root", 1);
        let mid = commit_files(&store, &[&root.id], &[("a", "2")], "mid", 2);
        let tip = commit_files(&store, &[&mid.id], &[("a", "3")], "tip", 3);
        let boundary = mid.id.clone();
        let ids: Vec<CommitId> = topo_order(&store, &[tip.id.clone()], |c| Ok(c.id == boundary))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![tip.id]);
    }

    #[test]
    fn test_merge_bases_and_ancestry() {
        let store = MemoryStore::new();
        let root = commit_files(&store, &[], &[("a", "1")], "root", 1);
        let base = commit_files(&store, &[&root.id], &[("a", "2")], "base", 2);
        let ours = commit_files(&store, &[&base.id], &[("a", "3")], "ours", 3);
        let theirs = commit_files(&store, &[&base.id], &[("b", "1")], "theirs", 4);

        assert_eq!(merge_bases(&store, &ours.id, &theirs.id).unwrap(), vec![base.id.clone()]);
        assert!(is_ancestor(&store, &root.id, &theirs.id).unwrap());
        assert!(is_ancestor(&store, &theirs.id, &theirs.id).unwrap());
        assert!(!is_ancestor(&store, &ours.id, &theirs.id).unwrap());
    }

    #[test]
    fn test_criss_cross_has_two_merge_bases() {
        let store = MemoryStore::new();
        let root = commit_files(&store, &[], &[("a", "1")], "root", 1);
        let x = commit_files(&store, &[&root.id], &[("x", "1")], "x", 2);
        let y = commit_files(&store, &[&root.id], &[("y", "1")], "y", 3);
        let m1 = commit_files(&store, &[&x.id, &y.id], &[("m", "1")], "m1", 4);
        let m2 = commit_files(&store, &[&y.id, &x.id], &[("m", "2")], "m2", 5);
        let mut bases = merge_bases(&store, &m1.id, &m2.id).unwrap();
        bases.sort();
        let mut expected = vec![x.id, y.id];
        expected.sort();
        assert_eq!(bases, expected);
    }

    #[test]
    fn test_unrelated_histories_have_no_merge_base() {
        let store = MemoryStore::new();
        let a = commit_files(&store, &[], &[("a", "1")], "a", 1);
        let b = commit_files(&store, &[], &[("b", "1")], "b", 2);
        assert!(merge_bases(&store, &a.id, &b.id).unwrap().is_empty());
    }
}
