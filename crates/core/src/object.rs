//! Immutable, content-addressed object model.
//!
//! These types describe what a [`Store`](crate::store::Store) reads and
//! writes. None of them are ever mutated in place once written: a "changed"
//! tree or commit is a new object with a new id.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Object ids
// ---------------------------------------------------------------------------

macro_rules! object_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn from_bytes(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Lowercase hex rendering of the id.
            pub fn hex(&self) -> String {
                hex::encode(&self.0)
            }

            /// First 12 hex digits, for messages and logs.
            pub fn short(&self) -> String {
                let mut hex = self.hex();
                hex.truncate(12);
                hex
            }

            /// Parse a hex id. Rejects empty, odd-length, and non-hex input.
            pub fn try_from_hex(hex: &str) -> Option<Self> {
                if hex.is_empty() {
                    return None;
                }
                hex::decode(hex).ok().map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex = String::deserialize(deserializer)?;
                Self::try_from_hex(&hex)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid object id '{hex}'")))
            }
        }
    };
}

object_id!(
    /// Id of a commit.
    CommitId
);
object_id!(
    /// Id of a (single-level) tree.
    TreeId
);
object_id!(
    /// Id of file or symlink contents.
    FileId
);
object_id!(
    /// Id of a stored [`Conflict`].
    ConflictId
);

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// The value of one entry in a [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeValue {
    File { id: FileId, executable: bool },
    Symlink { id: FileId },
    Tree { id: TreeId },
    GitSubmodule { id: CommitId },
    /// Several labelled candidates for this path, none chosen yet.
    Conflict { id: ConflictId },
}

impl TreeValue {
    pub fn is_tree(&self) -> bool {
        matches!(self, TreeValue::Tree { .. })
    }

    pub fn as_tree_id(&self) -> Option<&TreeId> {
        match self {
            TreeValue::Tree { id } => Some(id),
            _ => None,
        }
    }
}

/// One directory level: entry name → value. Nested directories are
/// referenced by [`TreeId`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<String, TreeValue>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&TreeValue> {
        self.entries.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: TreeValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<TreeValue> {
        self.entries.remove(name)
    }

    /// Entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TreeValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// One candidate value of a conflict; `None` means "absent on this side".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictTerm {
    pub label: String,
    pub value: Option<TreeValue>,
}

/// Unresolved candidates for a single path.
///
/// Three-way conflicts store their terms as `[base, ours, theirs]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub terms: Vec<ConflictTerm>,
}

impl Conflict {
    pub fn three_way(
        base: Option<TreeValue>,
        ours: Option<TreeValue>,
        theirs: Option<TreeValue>,
        labels: [&str; 3],
    ) -> Self {
        let [base_label, ours_label, theirs_label] = labels;
        Self {
            terms: vec![
                ConflictTerm {
                    label: base_label.to_string(),
                    value: base,
                },
                ConflictTerm {
                    label: ours_label.to_string(),
                    value: ours,
                },
                ConflictTerm {
                    label: theirs_label.to_string(),
                    value: theirs,
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// A point in time with the author's UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Offset from UTC in minutes.
    pub tz_offset_minutes: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, tz_offset_minutes: i32) -> Self {
        Self {
            seconds,
            tz_offset_minutes,
        }
    }

    /// The current local time. Only used for brand-new commits (merges,
    /// rejoins); synthetic commits always copy their original's timestamps.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            seconds: now.timestamp(),
            tz_offset_minutes: now.offset().fix().local_minus_utc() / 60,
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.tz_offset_minutes * 60)?;
        offset.timestamp_opt(self.seconds, 0).single()
    }
}

/// Name, email, and time of an author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Everything needed to write a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub parents: Vec<CommitId>,
    pub tree: TreeId,
    pub description: String,
    pub author: Signature,
    pub committer: Signature,
}

/// A commit as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub tree: TreeId,
    pub description: String,
    pub author: Signature,
    pub committer: Signature,
}

impl Commit {
    pub fn from_data(id: CommitId, data: CommitData) -> Self {
        Self {
            id,
            parents: data.parents,
            tree: data.tree,
            description: data.description,
            author: data.author,
            committer: data.committer,
        }
    }

    /// First line of the description.
    pub fn subject(&self) -> &str {
        self.description.lines().next().unwrap_or("")
    }
}
