//! The merge engine behind `add`, `merge`, and `pull`.
//!
//! All three sides are merged in subtree coordinates (paths relative to the
//! prefix). The merged subtree then replaces the prefix content of the
//! current head, so nothing outside the prefix is touched.

use tracing::{debug, info, instrument, warn};

use super::tree::merge_trees;
use crate::errors::SubtreeError;
use crate::graph::{ancestors_newest_first, is_ancestor, merge_bases};
use crate::metadata::SubtreeMetadata;
use crate::object::{Commit, CommitData, CommitId, Signature, TreeId};
use crate::prefix::{prefix_conflicts_with_file, Prefix};
use crate::relocate::{extract_subtree, replace_subtree};
use crate::repo_path::RepoPathBuf;
use crate::store::Store;

/// Where the incoming commit keeps the subtree's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingLayout {
    /// At its root, like an upstream project or a split commit.
    RootRelative,
    /// Already under the prefix, like another host branch.
    PrefixRelative,
}

/// Which trailers the merge commit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMetadata {
    /// `git-subtree-dir` only.
    DirOnly,
    /// `git-subtree-dir` and `git-subtree-split` (the incoming commit).
    DirAndSplit,
    /// Everything `git subtree add` writes: dir, mainline (the current head),
    /// and split (the incoming commit).
    Add,
}

impl MergeMetadata {
    fn build(self, prefix: &Prefix, current: &CommitId, incoming: &CommitId) -> SubtreeMetadata {
        let metadata = SubtreeMetadata::with_dir(prefix);
        match self {
            MergeMetadata::DirOnly => metadata,
            MergeMetadata::DirAndSplit => metadata.split(incoming.clone()),
            MergeMetadata::Add => metadata.mainline(current.clone()).split(incoming.clone()),
        }
    }
}

/// One merge of an incoming history into the subtree at `prefix`.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Host commit; becomes the first parent.
    pub current_head: CommitId,
    /// Commit being merged; becomes the second parent.
    pub incoming: CommitId,
    pub prefix: Prefix,
    /// Whether `incoming` has the subtree at its root or under `prefix`.
    pub layout: IncomingLayout,
    /// Description before trailers are appended.
    pub description: String,
    /// Author and committer of the merge commit.
    pub signature: Signature,
    /// Which trailers the merge commit gets.
    pub metadata: MergeMetadata,
}

/// The merge commit plus what went wrong in it.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Written even when conflicted; conflicts live in its tree.
    pub commit: Commit,
    /// Conflicted paths, relative to the repository root.
    pub conflicts: Vec<RepoPathBuf>,
    /// The commit the base tree came from, if any.
    pub base: Option<CommitId>,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

pub struct SubtreeMergeEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> SubtreeMergeEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, request),
        fields(prefix = %request.prefix, current = %request.current_head.short(), incoming = %request.incoming.short())
    )]
    pub fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome, SubtreeError> {
        let prefix = &request.prefix;
        let current = self.store.get_commit(&request.current_head)?;
        let incoming = self.store.get_commit(&request.incoming)?;

        if let Some(path) = prefix_conflicts_with_file(self.store, &current.tree, prefix)? {
            return Err(SubtreeError::PrefixConflict(path));
        }

        let (base, base_tree) = self.find_base(&current, &incoming, prefix, request.layout)?;
        let ours = extract_subtree(self.store, &current.tree, prefix)?;
        let theirs = self.in_subtree_coordinates(&incoming.tree, prefix, request.layout)?;
        debug!(base = ?base.as_ref().map(CommitId::short), "merging subtree");

        let merged = merge_trees(self.store, &base_tree, &ours, &theirs)?;
        let conflicts: Vec<RepoPathBuf> = merged
            .conflicts
            .iter()
            .map(|path| prefix.as_path().join(path))
            .collect();
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "subtree merge produced conflicts");
        }

        let tree = replace_subtree(self.store, &current.tree, prefix, &merged.tree)?;
        let description = request
            .metadata
            .build(prefix, &current.id, &incoming.id)
            .add_to_description(&request.description);
        let commit = self.store.write_commit(CommitData {
            parents: vec![current.id.clone(), incoming.id.clone()],
            tree,
            description,
            author: request.signature.clone(),
            committer: request.signature.clone(),
        })?;
        info!(commit = %commit.id.short(), conflicts = conflicts.len(), "wrote subtree merge");
        Ok(MergeOutcome {
            commit,
            conflicts,
            base,
        })
    }

    fn in_subtree_coordinates(
        &self,
        tree: &TreeId,
        prefix: &Prefix,
        layout: IncomingLayout,
    ) -> Result<TreeId, SubtreeError> {
        Ok(match layout {
            IncomingLayout::RootRelative => tree.clone(),
            IncomingLayout::PrefixRelative => extract_subtree(self.store, tree, prefix)?,
        })
    }

    /// The base tree in subtree coordinates, and the commit it came from.
    ///
    /// The unique merge base wins. Without one, the newest earlier join of
    /// this prefix whose split commit the incoming side descends from is
    /// used. Failing both, the base is empty.
    fn find_base(
        &self,
        current: &Commit,
        incoming: &Commit,
        prefix: &Prefix,
        layout: IncomingLayout,
    ) -> Result<(Option<CommitId>, TreeId), SubtreeError> {
        let bases = merge_bases(self.store, &current.id, &incoming.id)?;
        match bases.as_slice() {
            [base] => {
                let commit = self.store.get_commit(base)?;
                let tree = self.in_subtree_coordinates(&commit.tree, prefix, layout)?;
                return Ok((Some(base.clone()), tree));
            }
            [] => {}
            _ => {
                return Err(SubtreeError::AmbiguousMergeBase {
                    ours: current.id.clone(),
                    theirs: incoming.id.clone(),
                })
            }
        }

        for ancestor in ancestors_newest_first(self.store, &current.id)? {
            let metadata = SubtreeMetadata::parse(&ancestor.description);
            if !metadata.is_for(prefix) {
                continue;
            }
            let Some(split) = metadata.split_commit else {
                continue;
            };
            let Ok(split_commit) = self.store.get_commit(&split) else {
                continue;
            };
            if is_ancestor(self.store, &split, &incoming.id)? {
                debug!(join = %ancestor.id.short(), split = %split.short(), "using earlier join as base");
                return Ok((Some(split), split_commit.tree));
            }
        }
        Ok((None, self.store.empty_tree_id().clone()))
    }
}
