//! High-level subtree operations.
//!
//! [`SubtreeOps`] composes the engines with a [`Backend`]: every check that
//! can reject an operation runs before anything is fetched or written.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::backend::{create_backend, Backend};
use crate::config::SubtreeConfig;
use crate::errors::{BackendError, OpsError, SubtreeError};
use crate::graph::ancestors_newest_first;
use crate::merge::{IncomingLayout, MergeMetadata, MergeOutcome, MergeRequest, SubtreeMergeEngine};
use crate::metadata::SubtreeMetadata;
use crate::object::{Commit, CommitData, CommitId, Signature, Timestamp, TreeId};
use crate::prefix::{has_subtree_at_prefix, prefix_conflicts_with_file, Prefix};
use crate::relocate::extract_subtree;
use crate::split::{SplitEngine, SplitOptions, SplitResult};
use crate::store::{GitStore, Store};

/// Where `add` takes the subtree's history from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddSource {
    /// A commit already in the local store.
    Local(CommitId),
    /// A ref fetched from another repository.
    Remote { repository: String, remote_ref: String },
}

/// Settings shared by the commit-creating operations.
#[derive(Debug, Clone)]
pub struct CommitSettings {
    /// Merge a single squash commit instead of the incoming history.
    pub squash: bool,
    /// Description of the merge commit; a default is generated when unset.
    pub message: Option<String>,
    /// Author and committer of every commit the operation writes.
    pub signature: Signature,
}

impl CommitSettings {
    pub fn new(signature: Signature) -> Self {
        Self {
            squash: false,
            message: None,
            signature,
        }
    }

    pub fn squash(mut self, squash: bool) -> Self {
        self.squash = squash;
        self
    }

    pub fn message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

/// A commit with a `git-subtree-dir` trailer, as listed by
/// [`SubtreeOps::joins`].
#[derive(Debug, Clone)]
pub struct JoinRecord {
    pub commit: Commit,
    /// Trailers parsed from the commit description.
    pub metadata: SubtreeMetadata,
}

/// The subtree operations over one store and its backend.
pub struct SubtreeOps {
    store: Arc<dyn Store>,
    backend: Arc<dyn Backend>,
    config: SubtreeConfig,
}

impl SubtreeOps {
    /// Build with the backend [`create_backend`] picks for `store`.
    pub fn new(store: Arc<dyn Store>, config: SubtreeConfig) -> Self {
        let backend = create_backend(&store, &config.remote);
        Self::with_backend(store, backend, config)
    }

    pub fn with_backend(store: Arc<dyn Store>, backend: Arc<dyn Backend>, config: SubtreeConfig) -> Self {
        Self { store, backend, config }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &SubtreeConfig {
        &self.config
    }

    /// Signature for new commits: the configured user, then the git
    /// repository's identity, then a fixed tool identity.
    pub fn signature(&self) -> Result<Signature, OpsError> {
        if let Some(signature) = self.config.user.signature() {
            return Ok(signature);
        }
        if let Some(git_store) = self.store.as_any().downcast_ref::<GitStore>() {
            return Ok(git_store.default_signature()?);
        }
        Ok(Signature::new("subtree", "subtree@localhost", Timestamp::now()))
    }

    /// Add a new subtree at `prefix`.
    #[instrument(skip(self, source, settings), fields(prefix = %prefix, head = %head.short()))]
    pub async fn add(
        &self,
        head: &CommitId,
        prefix: &Prefix,
        source: &AddSource,
        settings: &CommitSettings,
    ) -> Result<MergeOutcome, OpsError> {
        let current = self.store.get_commit(head)?;
        if let Some(path) = prefix_conflicts_with_file(self.store(), &current.tree, prefix)? {
            return Err(SubtreeError::PrefixConflict(path).into());
        }
        if has_subtree_at_prefix(self.store(), &current.tree, prefix)? {
            return Err(SubtreeError::SubtreeExists(prefix.as_path().clone()).into());
        }

        let upstream = match source {
            AddSource::Local(id) => self.store.get_commit(id)?.id,
            AddSource::Remote { repository, remote_ref } => self.backend.fetch(repository, remote_ref).await?,
        };
        let incoming = if settings.squash {
            self.write_squash_commit(prefix, &upstream, None, &settings.signature)?.id
        } else {
            upstream.clone()
        };

        let description = settings
            .message
            .clone()
            .unwrap_or_else(|| format!("Add '{prefix}/' from commit '{}'\n", upstream.hex()));
        let outcome = SubtreeMergeEngine::new(self.store()).merge(&MergeRequest {
            current_head: head.clone(),
            incoming,
            prefix: prefix.clone(),
            layout: IncomingLayout::RootRelative,
            description,
            signature: settings.signature.clone(),
            metadata: MergeMetadata::Add,
        })?;
        info!(commit = %outcome.commit.id.short(), "added subtree");
        Ok(outcome)
    }

    /// Merge `incoming` into the existing subtree at `prefix`.
    #[instrument(skip(self, settings), fields(prefix = %prefix, head = %head.short(), incoming = %incoming.short()))]
    pub fn merge(
        &self,
        head: &CommitId,
        prefix: &Prefix,
        incoming: &CommitId,
        layout: IncomingLayout,
        settings: &CommitSettings,
    ) -> Result<MergeOutcome, OpsError> {
        let current = self.store.get_commit(head)?;
        if !has_subtree_at_prefix(self.store(), &current.tree, prefix)? {
            return Err(SubtreeError::NoSubtreeAtPrefix(prefix.as_path().clone()).into());
        }
        if let Some(path) = prefix_conflicts_with_file(self.store(), &current.tree, prefix)? {
            return Err(SubtreeError::PrefixConflict(path).into());
        }
        self.store.get_commit(incoming)?;

        let (merged_commit, layout) = if settings.squash {
            let previous = self.find_previous_squash(head, prefix)?;
            let squash = self.write_squash_commit_in_layout(prefix, incoming, layout, previous, &settings.signature)?;
            (squash.id, IncomingLayout::RootRelative)
        } else {
            (incoming.clone(), layout)
        };

        let metadata = match layout {
            IncomingLayout::RootRelative => MergeMetadata::DirAndSplit,
            IncomingLayout::PrefixRelative => MergeMetadata::DirOnly,
        };
        let description = settings
            .message
            .clone()
            .unwrap_or_else(|| format!("Merge commit '{}'\n", incoming.hex()));
        let outcome = SubtreeMergeEngine::new(self.store()).merge(&MergeRequest {
            current_head: head.clone(),
            incoming: merged_commit,
            prefix: prefix.clone(),
            layout,
            description,
            signature: settings.signature.clone(),
            metadata,
        })?;
        info!(
            commit = %outcome.commit.id.short(),
            conflicts = outcome.conflicts.len(),
            "merged subtree"
        );
        Ok(outcome)
    }

    /// Fetch `remote_ref` and merge it into the subtree at `prefix`.
    #[instrument(skip(self, settings), fields(prefix = %prefix, head = %head.short()))]
    pub async fn pull(
        &self,
        head: &CommitId,
        prefix: &Prefix,
        repository: &str,
        remote_ref: &str,
        settings: &CommitSettings,
    ) -> Result<MergeOutcome, OpsError> {
        let current = self.store.get_commit(head)?;
        if !has_subtree_at_prefix(self.store(), &current.tree, prefix)? {
            return Err(SubtreeError::NoSubtreeAtPrefix(prefix.as_path().clone()).into());
        }
        let fetched = self.backend.fetch(repository, remote_ref).await?;
        self.merge(head, prefix, &fetched, IncomingLayout::RootRelative, settings)
    }

    /// Synthesize the history of `options.prefix` up to `head`.
    pub fn split(&self, head: &CommitId, options: &SplitOptions) -> Result<SplitResult, OpsError> {
        Ok(SplitEngine::new(self.store()).split(head, options)?)
    }

    /// Split, then push the synthetic head to `remote_ref`.
    #[instrument(skip(self, options), fields(prefix = %options.prefix, head = %head.short()))]
    pub async fn push(
        &self,
        head: &CommitId,
        repository: &str,
        remote_ref: &str,
        options: &SplitOptions,
        force: bool,
    ) -> Result<SplitResult, OpsError> {
        if !self.backend.supports_remote() {
            return Err(BackendError::RemoteNotSupported.into());
        }
        let result = self.split(head, options)?;
        self.backend
            .push(repository, &result.synthetic_head, remote_ref, force)
            .await?;
        info!(commit = %result.synthetic_head.short(), remote_ref, "pushed split");
        Ok(result)
    }

    /// Commits reachable from `head` that carry subtree trailers, newest
    /// first, optionally limited to one prefix.
    pub fn joins(&self, head: &CommitId, prefix: Option<&Prefix>) -> Result<Vec<JoinRecord>, OpsError> {
        let mut joins = Vec::new();
        for commit in ancestors_newest_first(self.store(), head)? {
            let metadata = SubtreeMetadata::parse(&commit.description);
            // Synthetic commits carry only a mainline trailer.
            if metadata.subtree_dir.is_none() {
                continue;
            }
            if prefix.is_some_and(|p| !metadata.is_for(p)) {
                continue;
            }
            joins.push(JoinRecord { commit, metadata });
        }
        Ok(joins)
    }

    /// The newest squash commit for `prefix` reachable from `head`.
    fn find_previous_squash(&self, head: &CommitId, prefix: &Prefix) -> Result<Option<CommitId>, OpsError> {
        let found = self
            .joins(head, Some(prefix))?
            .into_iter()
            .find(|join| is_squash_commit(join))
            .map(|join| join.commit.id);
        debug!(previous = ?found.as_ref().map(CommitId::short), "previous squash commit");
        Ok(found)
    }

    fn write_squash_commit_in_layout(
        &self,
        prefix: &Prefix,
        incoming: &CommitId,
        layout: IncomingLayout,
        previous: Option<CommitId>,
        signature: &Signature,
    ) -> Result<Commit, OpsError> {
        match layout {
            IncomingLayout::RootRelative => self.write_squash_commit(prefix, incoming, previous, signature),
            IncomingLayout::PrefixRelative => {
                let commit = self.store.get_commit(incoming)?;
                let tree = extract_subtree(self.store(), &commit.tree, prefix)?;
                self.write_squash(prefix, incoming, tree, previous, signature)
            }
        }
    }

    /// One commit holding `upstream`'s tree, chained onto the previous squash
    /// for the same prefix.
    fn write_squash_commit(
        &self,
        prefix: &Prefix,
        upstream: &CommitId,
        previous: Option<CommitId>,
        signature: &Signature,
    ) -> Result<Commit, OpsError> {
        let tree = self.store.get_commit(upstream)?.tree;
        self.write_squash(prefix, upstream, tree, previous, signature)
    }

    fn write_squash(
        &self,
        prefix: &Prefix,
        upstream: &CommitId,
        tree: TreeId,
        previous: Option<CommitId>,
        signature: &Signature,
    ) -> Result<Commit, OpsError> {
        let subject = match &previous {
            None => format!("Squashed '{prefix}/' content from commit {}", upstream.short()),
            Some(previous) => {
                let old = self.store.get_commit(previous)?;
                match SubtreeMetadata::parse(&old.description).split_commit {
                    Some(old_split) => format!("Squashed '{prefix}/' changes from {}..{}", old_split.short(), upstream.short()),
                    None => format!("Squashed '{prefix}/' changes up to {}", upstream.short()),
                }
            }
        };
        let description = SubtreeMetadata::with_dir(prefix)
            .split(upstream.clone())
            .add_to_description(&format!("{subject}\n"));
        let commit = self.store.write_commit(CommitData {
            parents: previous.into_iter().collect(),
            tree,
            description,
            author: signature.clone(),
            committer: signature.clone(),
        })?;
        debug!(commit = %commit.id.short(), "wrote squash commit");
        Ok(commit)
    }
}

/// Squash commits name a split but no mainline and are never merges.
fn is_squash_commit(join: &JoinRecord) -> bool {
    join.metadata.split_commit.is_some() && join.metadata.mainline_commit.is_none() && join.commit.parents.len() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::split::{EmptyCommitPolicy, RejoinOptions};
    use crate::store::{value_at, MemoryStore};
    use crate::test_support::{commit_files, path, prefix, signature};

    fn ops_with(store: Arc<MemoryStore>) -> SubtreeOps {
        SubtreeOps::with_backend(store, Arc::new(LocalBackend), SubtreeConfig::default())
    }

    fn settings() -> CommitSettings {
        CommitSettings::new(signature(5_000))
    }

    #[tokio::test]
    async fn test_add_local_places_upstream_under_prefix() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("README", "host\n")], "host", 100);
        let upstream = commit_files(store.as_ref(), &[], &[("lib.rs", "fn x() {}\n")], "upstream", 200);
        let ops = ops_with(store.clone());

        let outcome = ops
            .add(&host.id, &prefix("vendor/lib"), &AddSource::Local(upstream.id.clone()), &settings())
            .await
            .unwrap();
        assert!(!outcome.has_conflicts());
        assert_eq!(outcome.commit.parents, vec![host.id.clone(), upstream.id.clone()]);
        assert!(value_at(store.as_ref(), &outcome.commit.tree, &path("vendor/lib/lib.rs"))
            .unwrap()
            .is_some());

        let metadata = SubtreeMetadata::parse(&outcome.commit.description);
        assert_eq!(metadata.mainline_commit, Some(host.id));
        assert_eq!(metadata.split_commit, Some(upstream.id));
    }

    #[tokio::test]
    async fn test_add_rejects_existing_content_before_writing() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("vendor/lib/a", "1")], "host", 100);
        let upstream = commit_files(store.as_ref(), &[], &[("a", "2")], "upstream", 200);
        let ops = ops_with(store.clone());
        let before = store.commit_count();

        let result = ops
            .add(&host.id, &prefix("vendor/lib"), &AddSource::Local(upstream.id), &settings().squash(true))
            .await;
        assert!(matches!(result, Err(OpsError::Subtree(SubtreeError::SubtreeExists(_)))));
        assert_eq!(store.commit_count(), before);
    }

    #[tokio::test]
    async fn test_add_rejects_file_on_prefix() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("vendor", "not a dir")], "host", 100);
        let upstream = commit_files(store.as_ref(), &[], &[("a", "2")], "upstream", 200);
        let ops = ops_with(store);
        let result = ops
            .add(&host.id, &prefix("vendor/lib"), &AddSource::Local(upstream.id), &settings())
            .await;
        assert!(matches!(result, Err(OpsError::Subtree(SubtreeError::PrefixConflict(p))) if p == path("vendor")));
    }

    #[tokio::test]
    async fn test_remote_add_without_transport() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("README", "host\n")], "host", 100);
        let ops = ops_with(store);
        let source = AddSource::Remote {
            repository: "https://example.com/lib.git".into(),
            remote_ref: "main".into(),
        };
        let result = ops.add(&host.id, &prefix("lib"), &source, &settings()).await;
        assert!(matches!(result, Err(OpsError::Backend(BackendError::RemoteNotSupported))));
    }

    #[tokio::test]
    async fn test_squashed_add_then_squashed_merge_chains_squash_commits() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("README", "host\n")], "host", 100);
        let v1 = commit_files(store.as_ref(), &[], &[("a", "1\n")], "v1", 200);
        let v2 = commit_files(store.as_ref(), &[&v1.id], &[("a", "2\n")], "v2", 300);
        let ops = ops_with(store.clone());

        let added = ops
            .add(&host.id, &prefix("lib"), &AddSource::Local(v1.id.clone()), &settings().squash(true))
            .await
            .unwrap();
        let first_squash = store.get_commit(&added.commit.parents[1]).unwrap();
        assert!(first_squash.parents.is_empty());
        assert!(first_squash.description.starts_with("Squashed 'lib/' content from commit"));
        assert_eq!(first_squash.tree, v1.tree);

        let merged = ops
            .merge(&added.commit.id, &prefix("lib"), &v2.id, IncomingLayout::RootRelative, &settings().squash(true))
            .unwrap();
        assert!(!merged.has_conflicts());
        let second_squash = store.get_commit(&merged.commit.parents[1]).unwrap();
        assert_eq!(second_squash.parents, vec![first_squash.id.clone()]);
        assert_eq!(merged.base, Some(first_squash.id));
        assert_eq!(
            value_at(store.as_ref(), &merged.commit.tree, &path("lib/a")).unwrap(),
            value_at(store.as_ref(), &v2.tree, &path("a")).unwrap()
        );
    }

    #[test]
    fn test_merge_requires_existing_subtree() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("README", "host\n")], "host", 100);
        let upstream = commit_files(store.as_ref(), &[], &[("a", "1")], "upstream", 200);
        let ops = ops_with(store);
        let result = ops.merge(&host.id, &prefix("lib"), &upstream.id, IncomingLayout::RootRelative, &settings());
        assert!(matches!(result, Err(OpsError::Subtree(SubtreeError::NoSubtreeAtPrefix(_)))));
    }

    #[tokio::test]
    async fn test_push_without_transport_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("lib/a", "1")], "host", 100);
        let ops = ops_with(store.clone());
        let before = store.commit_count();
        let options = SplitOptions::new(prefix("lib"), EmptyCommitPolicy::Skip);
        let result = ops.push(&host.id, "https://example.com/lib.git", "main", &options, false).await;
        assert!(matches!(result, Err(OpsError::Backend(BackendError::RemoteNotSupported))));
        assert_eq!(store.commit_count(), before);
    }

    #[tokio::test]
    async fn test_joins_lists_trailer_commits_for_prefix() {
        let store = Arc::new(MemoryStore::new());
        let host = commit_files(store.as_ref(), &[], &[("README", "host\n")], "host", 100);
        let upstream = commit_files(store.as_ref(), &[], &[("a", "1")], "upstream", 200);
        let ops = ops_with(store.clone());
        let added = ops
            .add(&host.id, &prefix("lib"), &AddSource::Local(upstream.id), &settings())
            .await
            .unwrap();

        let joins = ops.joins(&added.commit.id, Some(&prefix("lib"))).unwrap();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].commit.id, added.commit.id);
        assert!(ops.joins(&added.commit.id, Some(&prefix("other"))).unwrap().is_empty());

        let split = ops
            .split(&added.commit.id, &SplitOptions::new(prefix("lib"), EmptyCommitPolicy::Skip))
            .unwrap();
        assert_eq!(store.get_commit(&split.synthetic_head).unwrap().tree, store.get_commit(&added.commit.parents[1]).unwrap().tree);
    }

    #[test]
    fn test_joins_skip_synthetic_commits() {
        let store = Arc::new(MemoryStore::new());
        let c1 = commit_files(store.as_ref(), &[], &[("lib/x", "1")], "C1\n", 100);
        let c2 = commit_files(store.as_ref(), &[&c1.id], &[("lib/x", "2")], "C2\n", 200);
        let ops = ops_with(store.clone());
        let options = SplitOptions::new(prefix("lib"), EmptyCommitPolicy::Skip).rejoin(RejoinOptions {
            signature: signature(300),
            message: None,
        });
        let split = ops.split(&c2.id, &options).unwrap();
        let rejoin = split.rejoin.unwrap();

        let joins = ops.joins(&rejoin, None).unwrap();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].commit.id, rejoin);
        assert_eq!(joins[0].metadata.split_commit, Some(split.synthetic_head));
    }

    #[test]
    fn test_signature_prefers_config_user() {
        let store = Arc::new(MemoryStore::new());
        let mut config = SubtreeConfig::default();
        config.user.name = Some("Configured".into());
        config.user.email = Some("configured@example.com".into());
        let ops = SubtreeOps::with_backend(store, Arc::new(LocalBackend), config);
        assert_eq!(ops.signature().unwrap().name, "Configured");
    }
}
