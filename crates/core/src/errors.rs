//! Error types for the subtree core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Merge conflicts are deliberately absent from this module: a conflicted
//! merge is a successful result whose tree carries conflict values.

use thiserror::Error;

use crate::object::CommitId;
use crate::repo_path::RepoPathBuf;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subtree(#[from] SubtreeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Object store errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing objects in a [`Store`](crate::store::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// The requested object does not exist in the store.
    #[error("{kind} object not found: {id}")]
    ObjectNotFound { kind: &'static str, id: String },

    /// A revision expression could not be resolved to a commit.
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// The stored object could not be decoded.
    #[error("corrupt {kind} object {id}: {detail}")]
    Corrupt {
        kind: &'static str,
        id: String,
        detail: String,
    },

    /// JSON encoding of an object failed.
    #[error("object encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Subtree errors
// ---------------------------------------------------------------------------

/// Validation and structural errors from subtree operations.
#[derive(Debug, Error)]
pub enum SubtreeError {
    /// The prefix path is invalid (empty, root, or malformed).
    #[error("invalid prefix '{prefix}': {detail}")]
    InvalidPrefix { prefix: String, detail: String },

    /// A file exists on the prefix path, so it cannot be a directory.
    #[error("prefix conflicts with existing file: {0}")]
    PrefixConflict(RepoPathBuf),

    /// No content exists under the prefix.
    #[error("no subtree found at prefix: {0}")]
    NoSubtreeAtPrefix(RepoPathBuf),

    /// Content already exists under the prefix.
    #[error("subtree already exists at prefix: {0}")]
    SubtreeExists(RepoPathBuf),

    /// Prior joins disagree about which synthetic commit an original maps to.
    #[error("ambiguous split base: {original} maps to both {first} and {second}")]
    AmbiguousSplitBase {
        original: CommitId,
        first: CommitId,
        second: CommitId,
    },

    /// More than one best common ancestor exists.
    #[error("ambiguous merge base between {ours} and {theirs}")]
    AmbiguousMergeBase { ours: CommitId, theirs: CommitId },

    /// A commit was reached again while its own ancestors were being visited.
    #[error("commit graph contains a cycle through {0}")]
    CyclicHistory(CommitId),

    /// Underlying object store error.
    #[error("subtree store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Errors from remote fetch/push backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The selected backend cannot talk to remotes.
    #[error("remote operations require a git-backed repository")]
    RemoteNotSupported,

    /// Fetching from a remote failed.
    #[error("failed to fetch from '{repository}': {detail}")]
    FetchFailed { repository: String, detail: String },

    /// Pushing to a remote failed or was rejected.
    #[error("failed to push to '{repository}': {detail}")]
    PushFailed { repository: String, detail: String },

    /// The requested remote ref does not exist.
    #[error("remote ref not found: {0}")]
    RefNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// The blocking worker running the transport panicked or was cancelled.
    #[error("backend task failed: {0}")]
    TaskFailed(String),

    /// Underlying object store error.
    #[error("backend store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Operation errors
// ---------------------------------------------------------------------------

/// Errors from the composed `add`/`merge`/`pull`/`push`/`split` operations.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Subtree(#[from] SubtreeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<OpsError> for CoreError {
    fn from(err: OpsError) -> Self {
        match err {
            OpsError::Subtree(e) => CoreError::Subtree(e),
            OpsError::Backend(e) => CoreError::Backend(e),
            OpsError::Store(e) => CoreError::Store(e),
        }
    }
}
