//! Subtree provenance carried in commit-description trailers.
//!
//! Trailers use the same keys as `git subtree`, so either tool can read the
//! other's history:
//!
//! ```text
//! Split 'vendor/lib/' into commit '8a0c...'
//!
//! git-subtree-dir: vendor/lib
//! git-subtree-mainline: 3f1e...
//! git-subtree-split: 8a0c...
//! ```
//!
//! Older histories may use the `subtree-dir`/`subtree-mainline`/`subtree-split`
//! spelling. Both are recognized; only the `git-subtree-*` keys are emitted.
//! Metadata is never stored anywhere but the description text, so it is
//! recomputed on every read.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::object::CommitId;
use crate::prefix::{parse_prefix, Prefix};
use crate::repo_path::RepoPathBuf;

pub const DIR_KEY: &str = "git-subtree-dir";
pub const MAINLINE_KEY: &str = "git-subtree-mainline";
pub const SPLIT_KEY: &str = "git-subtree-split";

pub const LEGACY_DIR_KEY: &str = "subtree-dir";
pub const LEGACY_MAINLINE_KEY: &str = "subtree-mainline";
pub const LEGACY_SPLIT_KEY: &str = "subtree-split";

/// A `Key: value` line from the final paragraph of a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub key: String,
    pub value: String,
}

static TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9-]*):[ \t]*(.*?)[ \t]*$").expect("trailer pattern is a valid regex")
});

/// Parse the trailer block of `description`.
///
/// The block is the last paragraph. Every line in it has to be a trailer or a
/// whitespace-indented continuation of the previous one; otherwise the
/// description has no trailers at all.
pub fn parse_trailers(description: &str) -> Vec<Trailer> {
    let lines: Vec<&str> = description.lines().map(|line| line.trim_end_matches('\r')).collect();
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |pos| pos + 1);
    let start = lines[..end]
        .iter()
        .rposition(|line| line.trim().is_empty())
        .map_or(0, |pos| pos + 1);

    let mut trailers: Vec<Trailer> = Vec::new();
    for line in &lines[start..end] {
        if line.starts_with([' ', '\t']) {
            match trailers.last_mut() {
                Some(previous) => {
                    if !previous.value.is_empty() {
                        previous.value.push(' ');
                    }
                    previous.value.push_str(line.trim());
                }
                None => return Vec::new(),
            }
            continue;
        }
        match TRAILER.captures(line) {
            Some(caps) => trailers.push(Trailer {
                key: caps[1].to_string(),
                value: caps[2].to_string(),
            }),
            None => return Vec::new(),
        }
    }
    trailers
}

/// Provenance parsed from one commit description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubtreeMetadata {
    /// Directory the subtree lives in (`git-subtree-dir`).
    pub subtree_dir: Option<RepoPathBuf>,
    /// The host commit a synthetic commit was projected from
    /// (`git-subtree-mainline`).
    pub mainline_commit: Option<CommitId>,
    /// The synthetic commit joined back into the host history
    /// (`git-subtree-split`).
    pub split_commit: Option<CommitId>,
}

struct Field<T> {
    native: Option<T>,
    legacy: Option<T>,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self {
            native: None,
            legacy: None,
        }
    }
}

impl<T> Field<T> {
    fn resolve(self) -> Option<T> {
        self.native.or(self.legacy)
    }
}

impl SubtreeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(prefix: &Prefix) -> Self {
        Self {
            subtree_dir: Some(prefix.as_path().clone()),
            ..Self::default()
        }
    }

    pub fn mainline(mut self, commit: CommitId) -> Self {
        self.mainline_commit = Some(commit);
        self
    }

    pub fn split(mut self, commit: CommitId) -> Self {
        self.split_commit = Some(commit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subtree_dir.is_none() && self.mainline_commit.is_none() && self.split_commit.is_none()
    }

    /// True if the directory trailer names `prefix`.
    pub fn is_for(&self, prefix: &Prefix) -> bool {
        self.subtree_dir.as_ref() == Some(prefix.as_path())
    }

    /// Parse metadata out of `description`.
    ///
    /// A `git-subtree-*` value beats a legacy value for the same field; within
    /// one spelling the last occurrence wins. Values that do not parse are
    /// ignored.
    pub fn parse(description: &str) -> Self {
        let mut dir: Field<RepoPathBuf> = Field::default();
        let mut mainline: Field<CommitId> = Field::default();
        let mut split: Field<CommitId> = Field::default();

        for trailer in parse_trailers(description) {
            let value = trailer.value.as_str();
            match trailer.key.as_str() {
                DIR_KEY => dir.native = parse_dir(value).or(dir.native),
                LEGACY_DIR_KEY => dir.legacy = parse_dir(value).or(dir.legacy),
                MAINLINE_KEY => mainline.native = CommitId::try_from_hex(value).or(mainline.native),
                LEGACY_MAINLINE_KEY => mainline.legacy = CommitId::try_from_hex(value).or(mainline.legacy),
                SPLIT_KEY => split.native = CommitId::try_from_hex(value).or(split.native),
                LEGACY_SPLIT_KEY => split.legacy = CommitId::try_from_hex(value).or(split.legacy),
                _ => {}
            }
        }

        Self {
            subtree_dir: dir.resolve(),
            mainline_commit: mainline.resolve(),
            split_commit: split.resolve(),
        }
    }

    /// True if at least one field parses out of `description`.
    pub fn has_metadata(description: &str) -> bool {
        !Self::parse(description).is_empty()
    }

    /// `Key: value\n` for every set field, in dir, mainline, split order.
    pub fn format_trailers(&self) -> String {
        let mut out = String::new();
        if let Some(dir) = &self.subtree_dir {
            out.push_str(&format!("{DIR_KEY}: {dir}\n"));
        }
        if let Some(id) = &self.mainline_commit {
            out.push_str(&format!("{MAINLINE_KEY}: {}\n", id.hex()));
        }
        if let Some(id) = &self.split_commit {
            out.push_str(&format!("{SPLIT_KEY}: {}\n", id.hex()));
        }
        out
    }

    /// Append the trailers to `description`, separated from the body by
    /// exactly one blank line.
    pub fn add_to_description(&self, description: &str) -> String {
        let trailers = self.format_trailers();
        if trailers.is_empty() {
            return description.to_string();
        }
        if description.trim().is_empty() {
            trailers
        } else if description.ends_with("\n\n") {
            format!("{description}{trailers}")
        } else if description.ends_with('\n') {
            format!("{description}\n{trailers}")
        } else {
            format!("{description}\n\n{trailers}")
        }
    }
}

fn parse_dir(value: &str) -> Option<RepoPathBuf> {
    parse_prefix(value).ok().map(|p| p.as_path().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{path, prefix};

    const A: &str = "abc123abc123abc123abc123abc123abc123abc1";
    const B: &str = "def456def456def456def456def456def456def4";

    fn id(hex: &str) -> CommitId {
        CommitId::try_from_hex(hex).unwrap()
    }

    #[test]
    fn test_parse_all_fields() {
        let desc = format!(
            "Message\n\ngit-subtree-dir: vendor/lib\ngit-subtree-mainline: {A}\ngit-subtree-split: {B}\n"
        );
        let meta = SubtreeMetadata::parse(&desc);
        assert_eq!(meta.subtree_dir, Some(path("vendor/lib")));
        assert_eq!(meta.mainline_commit, Some(id(A)));
        assert_eq!(meta.split_commit, Some(id(B)));
    }

    #[test]
    fn test_legacy_spelling_parses_the_same() {
        let native = format!("Merge\n\ngit-subtree-dir: lib\ngit-subtree-split: {A}\n");
        let legacy = format!("Merge\n\nsubtree-dir: lib\nsubtree-split: {A}\n");
        assert_eq!(SubtreeMetadata::parse(&native), SubtreeMetadata::parse(&legacy));
        assert!(SubtreeMetadata::has_metadata(&legacy));
    }

    #[test]
    fn test_native_spelling_wins() {
        let desc = format!("Merge\n\ngit-subtree-split: {A}\nsubtree-split: {B}\nsubtree-dir: other\n");
        let meta = SubtreeMetadata::parse(&desc);
        assert_eq!(meta.split_commit, Some(id(A)));
        assert_eq!(meta.subtree_dir, Some(path("other")));
    }

    #[test]
    fn test_last_occurrence_wins_within_spelling() {
        let desc = format!("Merge\n\ngit-subtree-split: {A}\ngit-subtree-split: {B}\n");
        assert_eq!(SubtreeMetadata::parse(&desc).split_commit, Some(id(B)));
    }

    #[test]
    fn test_trailers_only_in_last_paragraph() {
        let desc = "Subject\n\ngit-subtree-dir: lib\n\nSome closing words.\n";
        assert!(!SubtreeMetadata::has_metadata(desc));

        let mixed = "Subject\n\nnot a trailer line\ngit-subtree-dir: lib\n";
        assert!(!SubtreeMetadata::has_metadata(mixed));
    }

    #[test]
    fn test_unparsable_values_ignored() {
        let desc = "Subject\n\ngit-subtree-dir: ../escape\ngit-subtree-split: not-hex\nSigned-off-by: A <a@b>\n";
        assert!(SubtreeMetadata::parse(desc).is_empty());
    }

    #[test]
    fn test_trailing_slash_on_dir() {
        let meta = SubtreeMetadata::parse("Add 'lib/'\n\ngit-subtree-dir: lib/\n");
        assert!(meta.is_for(&prefix("lib")));
    }

    #[test]
    fn test_format_trailers_order() {
        let meta = SubtreeMetadata::with_dir(&prefix("vendor/lib")).split(id(B)).mainline(id(A));
        assert_eq!(
            meta.format_trailers(),
            format!("git-subtree-dir: vendor/lib\ngit-subtree-mainline: {A}\ngit-subtree-split: {B}\n")
        );
        assert_eq!(SubtreeMetadata::new().format_trailers(), "");
    }

    #[test]
    fn test_add_to_description_spacing() {
        let meta = SubtreeMetadata::with_dir(&prefix("lib"));
        assert_eq!(meta.add_to_description(""), "git-subtree-dir: lib\n");
        assert_eq!(meta.add_to_description("Msg"), "Msg\n\ngit-subtree-dir: lib\n");
        assert_eq!(meta.add_to_description("Msg\n"), "Msg\n\ngit-subtree-dir: lib\n");
        assert_eq!(meta.add_to_description("Msg\n\n"), "Msg\n\ngit-subtree-dir: lib\n");
        assert_eq!(SubtreeMetadata::new().add_to_description("Msg"), "Msg");
    }

    #[test]
    fn test_parse_of_added_metadata_recovers_it() {
        let meta = SubtreeMetadata::with_dir(&prefix("a/b")).mainline(id(A)).split(id(B));
        for desc in ["", "Subject", "Subject\n\nBody text.\n", "Subject\n\n"] {
            assert_eq!(SubtreeMetadata::parse(&meta.add_to_description(desc)), meta, "{desc:?}");
        }
        assert_eq!(SubtreeMetadata::parse(&meta.format_trailers()), meta);
    }

    #[test]
    fn test_crlf_description() {
        let desc = format!("Merge\r\n\r\ngit-subtree-dir: lib\r\ngit-subtree-split: {A}\r\n");
        let meta = SubtreeMetadata::parse(&desc);
        assert!(meta.is_for(&prefix("lib")));
        assert_eq!(meta.split_commit, Some(id(A)));
        assert!(parse_trailers(&desc).iter().all(|t| !t.value.ends_with('\r')));
    }

    #[test]
    fn test_continuation_lines() {
        let trailers = parse_trailers("Subject\n\nCo-authored-by: A\n  <a@example.com>\ngit-subtree-dir: lib\n");
        assert_eq!(trailers.len(), 2);
        assert_eq!(trailers[0].value, "A <a@example.com>");
    }
}
