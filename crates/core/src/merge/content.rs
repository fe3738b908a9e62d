//! Line-based three-way merge of file contents.
//!
//! Uses the `diffy` crate. Only UTF-8 text is merged line by line; anything
//! else merges only through the trivial cases.

use tracing::debug;

/// The result of merging one file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentMerge {
    /// The merged bytes.
    Clean(Vec<u8>),
    /// Overlapping edits. `regions` counts the conflicting hunks when the
    /// inputs were text, and is zero for binary content.
    Conflicted { regions: usize },
}

impl ContentMerge {
    pub fn is_clean(&self) -> bool {
        matches!(self, ContentMerge::Clean(_))
    }
}

/// Merge `ours` and `theirs` against their common `base`.
pub fn merge_contents(base: &[u8], ours: &[u8], theirs: &[u8]) -> ContentMerge {
    // If either side is identical to base, the other side wins cleanly.
    if ours == base {
        return ContentMerge::Clean(theirs.to_vec());
    }
    if theirs == base || ours == theirs {
        return ContentMerge::Clean(ours.to_vec());
    }

    let (Ok(base), Ok(ours), Ok(theirs)) = (
        std::str::from_utf8(base),
        std::str::from_utf8(ours),
        std::str::from_utf8(theirs),
    ) else {
        debug!("binary contents differ on both sides");
        return ContentMerge::Conflicted { regions: 0 };
    };

    match diffy::merge(base, ours, theirs) {
        Ok(merged) => {
            debug!("clean line merge");
            ContentMerge::Clean(merged.into_bytes())
        }
        Err(marked) => {
            let regions = marked.lines().filter(|line| line.starts_with("<<<<<<<")).count();
            debug!(regions, "line merge left conflicts");
            ContentMerge::Conflicted { regions }
        }
    }
}
