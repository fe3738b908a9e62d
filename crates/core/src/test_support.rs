//! Fixtures shared by the unit tests.

use crate::object::{Commit, CommitData, CommitId, Signature, Timestamp, TreeId};
use crate::prefix::{parse_prefix, Prefix};
use crate::repo_path::RepoPathBuf;
use crate::store::{Store, TreeEditor};

pub fn path(value: &str) -> RepoPathBuf {
    RepoPathBuf::from_internal_string(value).unwrap()
}

pub fn prefix(value: &str) -> Prefix {
    parse_prefix(value).unwrap()
}

pub fn signature(seconds: i64) -> Signature {
    Signature::new("Test Author", "author@example.com", Timestamp::new(seconds, 60))
}

/// Write a tree holding `files` (path, contents) on top of the empty tree.
pub fn write_tree(store: &dyn Store, files: &[(&str, &str)]) -> TreeId {
    let mut editor = TreeEditor::new(store, store.empty_tree_id().clone());
    for (file_path, contents) in files {
        editor.write_file(path(file_path), contents.as_bytes()).unwrap();
    }
    editor.write().unwrap()
}

/// Write a commit whose timestamps derive from `seconds` so that ids are
/// stable across test runs.
pub fn commit(store: &dyn Store, parents: &[&CommitId], tree: TreeId, description: &str, seconds: i64) -> Commit {
    store
        .write_commit(CommitData {
            parents: parents.iter().map(|p| (*p).clone()).collect(),
            tree,
            description: description.to_string(),
            author: signature(seconds),
            committer: signature(seconds),
        })
        .unwrap()
}

/// Write a commit whose tree holds `files`.
pub fn commit_files(
    store: &dyn Store,
    parents: &[&CommitId],
    files: &[(&str, &str)],
    description: &str,
    seconds: i64,
) -> Commit {
    let tree = write_tree(store, files);
    commit(store, parents, tree, description, seconds)
}
