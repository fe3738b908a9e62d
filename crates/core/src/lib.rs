//! Subtree core library.
//!
//! This crate embeds one project's history inside a directory of another
//! repository and recovers it again: prefix handling, tree relocation,
//! trailer metadata, history splitting, subtree merging, object stores, and
//! remote transport.

pub mod backend;
pub mod config;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod merge;
pub mod metadata;
pub mod object;
pub mod ops;
pub mod prefix;
pub mod relocate;
pub mod repo_path;
pub mod split;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-exports for convenience.
pub use backend::{create_backend, Backend, GitBackend, LocalBackend};
pub use config::SubtreeConfig;
pub use errors::{BackendError, ConfigError, CoreError, OpsError, StoreError, SubtreeError};
pub use merge::{IncomingLayout, MergeOutcome, SubtreeMergeEngine};
pub use metadata::SubtreeMetadata;
pub use ops::{AddSource, CommitSettings, SubtreeOps};
pub use prefix::{parse_prefix, Prefix};
pub use split::{EmptyCommitPolicy, SplitEngine, SplitOptions, SplitResult};
pub use store::{GitStore, MemoryStore, Store};
