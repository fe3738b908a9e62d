//! Rebuilding the history of a prefix as a standalone, root-relative history.
//!
//! Every original commit that changes the prefix gets a synthetic commit
//! whose tree is the extracted prefix content and whose parents are the
//! synthetic commits of its original parents. Authors, committers, and
//! timestamps are copied from the original, so splitting the same range
//! twice yields the same commit ids.
//!
//! Earlier joins (add, merge, pull, rejoin commits carrying
//! `git-subtree-dir` and `git-subtree-split`) seed the mapping so a split
//! only has to walk history created since the last join.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::errors::{StoreError, SubtreeError};
use crate::filter::commit_touches_prefix;
use crate::graph::{ancestors_newest_first, topo_order};
use crate::metadata::SubtreeMetadata;
use crate::object::{Commit, CommitData, CommitId, Signature, TreeId};
use crate::prefix::Prefix;
use crate::relocate::extract_subtree;
use crate::store::Store;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to do with commits that do not change the prefix.
///
/// There is intentionally no `Default`: callers choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyCommitPolicy {
    /// Emit a synthetic commit with an unchanged tree.
    Keep,
    /// Leave the commit out; its children inherit its synthetic parents.
    Skip,
}

/// Builds the description of a squashed split commit.
pub trait SquashMessagePolicy: Send + Sync + fmt::Debug {
    /// `commits` are the commits that changed the prefix since the last join,
    /// oldest first. It may be empty.
    fn message(&self, prefix: &Prefix, head: &Commit, commits: &[Commit]) -> String;
}

/// Reuse the description of the oldest squashed commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMessage;

impl SquashMessagePolicy for FirstMessage {
    fn message(&self, _prefix: &Prefix, head: &Commit, commits: &[Commit]) -> String {
        commits.first().unwrap_or(head).description.clone()
    }
}

/// `Squashed 'prefix/' changes up to <id>` followed by a one-line log.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryMessage;

impl SquashMessagePolicy for SummaryMessage {
    fn message(&self, prefix: &Prefix, head: &Commit, commits: &[Commit]) -> String {
        let mut out = format!("Squashed '{prefix}/' changes up to {}\n", head.id.short());
        if !commits.is_empty() {
            out.push('\n');
            for commit in commits.iter().rev() {
                out.push_str(&format!("{} {}\n", commit.id.short(), commit.subject()));
            }
        }
        out
    }
}

/// Every squashed description, oldest first, separated by blank lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenateMessages;

impl SquashMessagePolicy for ConcatenateMessages {
    fn message(&self, _prefix: &Prefix, head: &Commit, commits: &[Commit]) -> String {
        if commits.is_empty() {
            return head.description.clone();
        }
        let parts: Vec<&str> = commits.iter().map(|c| c.description.trim_end()).collect();
        let mut out = parts.join("\n\n");
        out.push('\n');
        out
    }
}

/// Settings for the commit that merges the split back into the host.
#[derive(Debug, Clone)]
pub struct RejoinOptions {
    /// Author and committer of the rejoin commit.
    pub signature: Signature,
    /// Replaces the default `Split '<prefix>/' into commit '<id>'` subject.
    pub message: Option<String>,
}

/// Everything a split needs besides the commit to split.
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Directory whose history is extracted.
    pub prefix: Prefix,
    /// What to do with commits that leave the prefix unchanged.
    pub empty_commits: EmptyCommitPolicy,
    /// Produce one commit instead of the per-commit history.
    pub squash: Option<Arc<dyn SquashMessagePolicy>>,
    /// Ignore earlier joins and walk back to where the prefix first appears.
    pub ignore_prior_joins: bool,
    /// Parent given to synthetic commits that would otherwise be roots.
    pub onto: Option<CommitId>,
    /// Text prepended to every synthetic description.
    pub annotate: Option<String>,
    /// Also write a commit merging the synthetic head back into the host.
    pub rejoin: Option<RejoinOptions>,
}

impl SplitOptions {
    pub fn new(prefix: Prefix, empty_commits: EmptyCommitPolicy) -> Self {
        Self {
            prefix,
            empty_commits,
            squash: None,
            ignore_prior_joins: false,
            onto: None,
            annotate: None,
            rejoin: None,
        }
    }

    pub fn squash(mut self, policy: Arc<dyn SquashMessagePolicy>) -> Self {
        self.squash = Some(policy);
        self
    }

    pub fn ignore_prior_joins(mut self, ignore: bool) -> Self {
        self.ignore_prior_joins = ignore;
        self
    }

    pub fn onto(mut self, commit: CommitId) -> Self {
        self.onto = Some(commit);
        self
    }

    pub fn annotate(mut self, text: impl Into<String>) -> Self {
        self.annotate = Some(text.into());
        self
    }

    pub fn rejoin(mut self, rejoin: RejoinOptions) -> Self {
        self.rejoin = Some(rejoin);
        self
    }
}

/// What a split wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResult {
    /// Tip of the synthetic history.
    pub synthetic_head: CommitId,
    /// Original → synthetic, in the order the synthetic commits were written.
    pub mapping: Vec<(CommitId, CommitId)>,
    /// Originals folded into a squashed commit, oldest first.
    pub squashed: Vec<CommitId>,
    /// The rejoin commit, when one was requested.
    pub rejoin: Option<CommitId>,
}

// ---------------------------------------------------------------------------
// Mapping table
// ---------------------------------------------------------------------------

/// Original → synthetic ids for one split.
///
/// Entries are only ever added, in topological order, and a key is never
/// remapped to a different synthetic commit.
#[derive(Debug, Default)]
struct CommitMap {
    mapped: HashMap<CommitId, CommitId>,
    /// Synthetic parents passed through a skipped commit.
    inherited: HashMap<CommitId, Vec<CommitId>>,
    /// Where the walk must not descend.
    stops: HashSet<CommitId>,
}

impl CommitMap {
    fn seed(&mut self, original: CommitId, synthetic: CommitId) -> Result<(), SubtreeError> {
        match self.mapped.get(&original) {
            Some(existing) if existing != &synthetic => Err(SubtreeError::AmbiguousSplitBase {
                original,
                first: existing.clone(),
                second: synthetic,
            }),
            Some(_) => Ok(()),
            None => {
                self.stops.insert(original.clone());
                self.mapped.insert(original, synthetic);
                Ok(())
            }
        }
    }

    /// Synthetic commits `original` stands for. Unmapped boundaries resolve
    /// to nothing.
    fn resolve(&self, original: &CommitId) -> Vec<CommitId> {
        if let Some(synthetic) = self.mapped.get(original) {
            return vec![synthetic.clone()];
        }
        self.inherited.get(original).cloned().unwrap_or_default()
    }

    /// Resolve every parent and drop repeats, keeping first-seen order.
    fn resolve_parents(&self, parents: &[CommitId]) -> Vec<CommitId> {
        let mut out: Vec<CommitId> = Vec::new();
        for parent in parents {
            for synthetic in self.resolve(parent) {
                if !out.contains(&synthetic) {
                    out.push(synthetic);
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SplitEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> SplitEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Split the history of `options.prefix` up to `local_commit`.
    #[instrument(skip(self, options), fields(prefix = %options.prefix, head = %local_commit.short()))]
    pub fn split(&self, local_commit: &CommitId, options: &SplitOptions) -> Result<SplitResult, SubtreeError> {
        let prefix = &options.prefix;
        let head = self.store.get_commit(local_commit)?;
        if &self.extract(&head.tree, prefix)? == self.store.empty_tree_id() {
            return Err(SubtreeError::NoSubtreeAtPrefix(prefix.as_path().clone()));
        }

        let mut map = CommitMap::default();
        if !options.ignore_prior_joins {
            self.seed_from_joins(&head, prefix, &mut map)?;
        }
        info!(seeded = map.mapped.len(), "starting split");

        let range = self.commit_range(&head, prefix, &map)?;
        let mut result = match &options.squash {
            Some(policy) => self.split_squashed(&head, &range, options, policy.as_ref())?,
            None => self.split_history(&head, &range, options, &mut map)?,
        };

        if let Some(rejoin) = &options.rejoin {
            result.rejoin = Some(self.rejoin(&head, &result.synthetic_head, prefix, rejoin)?);
        }
        info!(
            synthetic_head = %result.synthetic_head.short(),
            written = result.mapping.len(),
            "split finished"
        );
        Ok(result)
    }

    fn extract(&self, tree: &TreeId, prefix: &Prefix) -> Result<TreeId, SubtreeError> {
        Ok(extract_subtree(self.store, tree, prefix)?)
    }

    /// Seed the mapping from earlier joins of this prefix.
    fn seed_from_joins(&self, head: &Commit, prefix: &Prefix, map: &mut CommitMap) -> Result<(), SubtreeError> {
        for commit in ancestors_newest_first(self.store, &head.id)? {
            let metadata = SubtreeMetadata::parse(&commit.description);
            if !metadata.is_for(prefix) {
                continue;
            }
            let Some(split_id) = metadata.split_commit else {
                continue;
            };
            let split = match self.store.get_commit(&split_id) {
                Ok(split) => split,
                Err(StoreError::ObjectNotFound { .. }) => {
                    warn!(join = %commit.id.short(), split = %split_id.short(), "split commit of join is not in this store");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            debug!(join = %commit.id.short(), split = %split_id.short(), "found earlier join");
            map.seed(split_id.clone(), split_id.clone())?;

            if self.extract(&commit.tree, prefix)? == split.tree {
                map.seed(commit.id.clone(), split_id.clone())?;
            }
            if let Some(mainline) = metadata.mainline_commit {
                let original = match self.store.get_commit(&mainline) {
                    Ok(original) => original,
                    Err(StoreError::ObjectNotFound { .. }) => continue,
                    Err(err) => return Err(err.into()),
                };
                if self.extract(&original.tree, prefix)? == split.tree {
                    map.seed(mainline, split_id.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Commits to rewrite, oldest first. The walk stops at seeded commits and
    /// at commits with nothing under the prefix.
    fn commit_range(&self, head: &Commit, prefix: &Prefix, map: &CommitMap) -> Result<Vec<Commit>, SubtreeError> {
        let empty = self.store.empty_tree_id().clone();
        topo_order(self.store, std::slice::from_ref(&head.id), |commit| {
            if map.stops.contains(&commit.id) {
                return Ok(true);
            }
            Ok(self.extract(&commit.tree, prefix)? == empty)
        })
    }

    fn split_history(
        &self,
        head: &Commit,
        range: &[Commit],
        options: &SplitOptions,
        map: &mut CommitMap,
    ) -> Result<SplitResult, SubtreeError> {
        let prefix = &options.prefix;
        let mut written = Vec::new();

        for commit in range {
            let touches = commit_touches_prefix(self.store, commit, prefix)?;
            let mut parents = map.resolve_parents(&commit.parents);

            if !touches && options.empty_commits == EmptyCommitPolicy::Skip {
                debug!(commit = %commit.id.short(), "skipping commit that leaves prefix unchanged");
                map.inherited.insert(commit.id.clone(), parents);
                continue;
            }
            if parents.is_empty() {
                if let Some(onto) = &options.onto {
                    parents.push(onto.clone());
                }
            }

            let description = SubtreeMetadata::new()
                .mainline(commit.id.clone())
                .add_to_description(&annotated(options.annotate.as_deref(), &commit.description));
            let synthetic = self.store.write_commit(CommitData {
                parents,
                tree: self.extract(&commit.tree, prefix)?,
                description,
                author: commit.author.clone(),
                committer: commit.committer.clone(),
            })?;
            debug!(
                original = %commit.id.short(),
                synthetic = %synthetic.id.short(),
                parents = synthetic.parents.len(),
                "wrote synthetic commit"
            );
            map.mapped.insert(commit.id.clone(), synthetic.id.clone());
            written.push((commit.id.clone(), synthetic.id));
        }

        // A skipped head can inherit several positions; the one written last
        // in topological order wins.
        let tips = map.resolve(&head.id);
        if tips.len() > 1 {
            debug!(tips = tips.len(), "split head inherits several synthetic commits");
        }
        let synthetic_head = written
            .iter()
            .rev()
            .map(|(_, synthetic)| synthetic)
            .find(|synthetic| tips.contains(synthetic))
            .or_else(|| tips.last())
            .cloned()
            .ok_or_else(|| SubtreeError::NoSubtreeAtPrefix(prefix.as_path().clone()))?;
        Ok(SplitResult {
            synthetic_head,
            mapping: written,
            squashed: Vec::new(),
            rejoin: None,
        })
    }

    fn split_squashed(
        &self,
        head: &Commit,
        range: &[Commit],
        options: &SplitOptions,
        policy: &dyn SquashMessagePolicy,
    ) -> Result<SplitResult, SubtreeError> {
        let prefix = &options.prefix;
        let mut touching = Vec::new();
        for commit in range {
            if commit_touches_prefix(self.store, commit, prefix)? {
                touching.push(commit.clone());
            }
        }
        let message = policy.message(prefix, head, &touching);
        let description = SubtreeMetadata::new()
            .mainline(head.id.clone())
            .add_to_description(&annotated(options.annotate.as_deref(), &message));
        let squashed = self.store.write_commit(CommitData {
            parents: options.onto.iter().cloned().collect(),
            tree: self.extract(&head.tree, prefix)?,
            description,
            author: head.author.clone(),
            committer: head.committer.clone(),
        })?;
        debug!(commits = touching.len(), synthetic = %squashed.id.short(), "wrote squashed commit");
        Ok(SplitResult {
            synthetic_head: squashed.id.clone(),
            mapping: vec![(head.id.clone(), squashed.id)],
            squashed: touching.into_iter().map(|c| c.id).collect(),
            rejoin: None,
        })
    }

    fn rejoin(
        &self,
        head: &Commit,
        synthetic_head: &CommitId,
        prefix: &Prefix,
        options: &RejoinOptions,
    ) -> Result<CommitId, SubtreeError> {
        let message = options
            .message
            .clone()
            .unwrap_or_else(|| format!("Split '{prefix}/' into commit '{synthetic_head}'"));
        let description = SubtreeMetadata::with_dir(prefix)
            .mainline(head.id.clone())
            .split(synthetic_head.clone())
            .add_to_description(&message);
        let commit = self.store.write_commit(CommitData {
            parents: vec![head.id.clone(), synthetic_head.clone()],
            tree: head.tree.clone(),
            description,
            author: options.signature.clone(),
            committer: options.signature.clone(),
        })?;
        info!(rejoin = %commit.id.short(), "wrote rejoin commit");
        Ok(commit.id)
    }
}

fn annotated(annotate: Option<&str>, description: &str) -> String {
    match annotate {
        Some(text) => format!("{text}{description}"),
        None => description.to_string(),
    }
}
