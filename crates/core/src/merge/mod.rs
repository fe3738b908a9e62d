//! Merging external history into a subtree.
//!
//! - [`content`]: line-based file merge via `diffy`
//! - [`tree`]: three-way tree merge with conflicts as values
//! - [`subtree`]: the merge engine behind add, merge, and pull

pub mod content;
pub mod subtree;
pub mod tree;

pub use content::{merge_contents, ContentMerge};
pub use subtree::{IncomingLayout, MergeMetadata, MergeOutcome, MergeRequest, SubtreeMergeEngine};
pub use tree::{merge_trees, TreeMerge};
