//! Normalized repository-relative paths.
//!
//! A [`RepoPathBuf`] is a `/`-separated path relative to the repository root.
//! Components are never empty and never `.` or `..`, so two paths naming the
//! same location always compare equal. The empty string is the root path.

use std::fmt;

use thiserror::Error;

/// Reason a string was rejected as a repository path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository path '{path}': {reason}")]
pub struct InvalidRepoPathError {
    pub path: String,
    pub reason: &'static str,
}

/// An owned, normalized, repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPathBuf {
    value: String,
}

impl RepoPathBuf {
    /// The repository root (empty path).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path in internal (`/`-separated) form.
    pub fn from_internal_string(value: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let value = value.into();
        if value.is_empty() {
            return Ok(Self::root());
        }
        let reject = |reason| InvalidRepoPathError {
            path: value.clone(),
            reason,
        };
        if value.starts_with('/') {
            return Err(reject("must be relative"));
        }
        for component in value.split('/') {
            match component {
                "" => return Err(reject("contains an empty component")),
                "." | ".." => return Err(reject("contains '.' or '..' component")),
                c if c.contains('\0') => return Err(reject("contains a NUL byte")),
                _ => {}
            }
        }
        Ok(Self { value })
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_internal_str(&self) -> &str {
        &self.value
    }

    /// Iterate over the path's components, outermost first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.value.split('/').filter(|c| !c.is_empty())
    }

    /// The containing directory, or `None` for the root.
    pub fn parent(&self) -> Option<RepoPathBuf> {
        if self.is_root() {
            return None;
        }
        match self.value.rfind('/') {
            Some(pos) => Some(Self {
                value: self.value[..pos].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Append one already-validated component.
    pub fn join_component(&self, name: &str) -> RepoPathBuf {
        debug_assert!(!name.is_empty() && !name.contains('/'));
        if self.is_root() {
            Self {
                value: name.to_string(),
            }
        } else {
            Self {
                value: format!("{}/{}", self.value, name),
            }
        }
    }

    /// Concatenate two paths; either side may be the root.
    pub fn join(&self, suffix: &RepoPathBuf) -> RepoPathBuf {
        if self.is_root() {
            suffix.clone()
        } else if suffix.is_root() {
            self.clone()
        } else {
            Self {
                value: format!("{}/{}", self.value, suffix.value),
            }
        }
    }

    /// True if `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &RepoPathBuf) -> bool {
        self.strip_prefix(other).is_some()
    }

    /// The remainder of `self` below `prefix`; `Some(root)` if they are equal.
    pub fn strip_prefix(&self, prefix: &RepoPathBuf) -> Option<RepoPathBuf> {
        if prefix.is_root() {
            return Some(self.clone());
        }
        if self.value == prefix.value {
            return Some(Self::root());
        }
        self.value
            .strip_prefix(prefix.value.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| Self {
                value: rest.to_string(),
            })
    }

    /// Every non-root ancestor of this path, outermost first, ending with the
    /// path itself. The root yields nothing.
    pub fn ancestors_and_self(&self) -> Vec<RepoPathBuf> {
        let mut current = RepoPathBuf::root();
        let mut out = Vec::new();
        for component in self.components() {
            current = current.join_component(component);
            out.push(current.clone());
        }
        out
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
