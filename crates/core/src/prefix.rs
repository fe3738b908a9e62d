//! The directory a subtree is anchored at.

use std::fmt;

use crate::errors::{StoreError, SubtreeError};
use crate::object::{TreeId, TreeValue};
use crate::repo_path::RepoPathBuf;
use crate::store::{value_at, Store};

/// A non-root repository path naming a subtree's directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix(RepoPathBuf);

impl Prefix {
    /// Wrap an already-normalized path. Fails for the root path.
    pub fn new(path: RepoPathBuf) -> Result<Self, SubtreeError> {
        if path.is_root() {
            return Err(SubtreeError::InvalidPrefix {
                prefix: String::new(),
                detail: "prefix must not be the repository root".into(),
            });
        }
        Ok(Self(path))
    }

    pub fn as_path(&self) -> &RepoPathBuf {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_internal_str()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<RepoPathBuf> for Prefix {
    fn as_ref(&self) -> &RepoPathBuf {
        &self.0
    }
}

/// Parse user or trailer text into a [`Prefix`].
///
/// A single trailing `/` is accepted, since `git subtree` writes `dir/` into
/// some of its messages.
pub fn parse_prefix(text: &str) -> Result<Prefix, SubtreeError> {
    let invalid = |detail: &str| SubtreeError::InvalidPrefix {
        prefix: text.to_string(),
        detail: detail.to_string(),
    };
    let trimmed = text.strip_suffix('/').unwrap_or(text);
    if trimmed.is_empty() {
        return Err(invalid("prefix must not be empty or the repository root"));
    }
    let path = RepoPathBuf::from_internal_string(trimmed).map_err(|e| invalid(e.reason))?;
    Prefix::new(path).map_err(|_| invalid("prefix must not be the repository root"))
}

/// The first path on the way to `prefix` (outermost first, the prefix itself
/// last) that holds something other than a directory.
pub fn prefix_conflicts_with_file(
    store: &dyn Store,
    tree: &TreeId,
    prefix: &Prefix,
) -> Result<Option<RepoPathBuf>, StoreError> {
    for candidate in prefix.as_path().ancestors_and_self() {
        match value_at(store, tree, &candidate)? {
            None => return Ok(None),
            Some(TreeValue::Tree { .. }) => continue,
            Some(_) => return Ok(Some(candidate)),
        }
    }
    Ok(None)
}

/// True if the tree has at least one entry at or under `prefix`.
pub fn has_subtree_at_prefix(store: &dyn Store, tree: &TreeId, prefix: &Prefix) -> Result<bool, StoreError> {
    Ok(value_at(store, tree, prefix.as_path())?.is_some())
}
