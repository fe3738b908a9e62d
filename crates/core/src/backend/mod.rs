//! Remote transport for subtree add, pull, and push.
//!
//! The engines never talk to remotes. Operations that need a remote go through
//! a [`Backend`], chosen once by [`create_backend`] from the kind of store the
//! repository uses.

pub mod git;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::config::RemoteConfig;
use crate::errors::BackendError;
use crate::object::CommitId;
use crate::store::{GitStore, Store};

pub use git::{GitBackend, GitBackendOptions};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetch and push of single refs.
pub trait Backend: Send + Sync {
    /// Fetch `remote_ref` from `repository` and return the commit it points at.
    /// The fetched objects are available in the local store afterwards.
    fn fetch<'a>(&'a self, repository: &'a str, remote_ref: &'a str) -> BoxFuture<'a, Result<CommitId, BackendError>>;

    /// Update `remote_ref` in `repository` to `commit`.
    fn push<'a>(
        &'a self,
        repository: &'a str,
        commit: &'a CommitId,
        remote_ref: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    fn supports_remote(&self) -> bool;
}

/// Backend for stores with no transport. Every remote call fails with
/// [`BackendError::RemoteNotSupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn fetch<'a>(&'a self, _repository: &'a str, _remote_ref: &'a str) -> BoxFuture<'a, Result<CommitId, BackendError>> {
        Box::pin(async { Err(BackendError::RemoteNotSupported) })
    }

    fn push<'a>(
        &'a self,
        _repository: &'a str,
        _commit: &'a CommitId,
        _remote_ref: &'a str,
        _force: bool,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async { Err(BackendError::RemoteNotSupported) })
    }

    fn supports_remote(&self) -> bool {
        false
    }
}

/// Pick the backend for `store`: git transport for git-backed stores, the
/// local fallback for everything else.
pub fn create_backend(store: &Arc<dyn Store>, remote: &RemoteConfig) -> Arc<dyn Backend> {
    match store.as_any().downcast_ref::<GitStore>() {
        Some(git_store) => {
            debug!(git_dir = %git_store.git_dir().display(), "using git backend");
            Arc::new(GitBackend::new(git_store.git_dir(), GitBackendOptions::from(remote)))
        }
        None => {
            debug!("store has no transport, using local backend");
            Arc::new(LocalBackend)
        }
    }
}

/// Fully qualify a ref name: `main` becomes `refs/heads/main`, anything
/// already under `refs/` is kept.
pub fn qualify_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_qualify_ref() {
        assert_eq!(qualify_ref("main"), "refs/heads/main");
        assert_eq!(qualify_ref("feature/x"), "refs/heads/feature/x");
        assert_eq!(qualify_ref("refs/tags/v1.0"), "refs/tags/v1.0");
    }

    #[tokio::test]
    async fn test_local_backend_rejects_remote_calls() {
        let backend = LocalBackend;
        assert!(!backend.supports_remote());
        assert!(matches!(
            backend.fetch("https://example.com/repo.git", "main").await,
            Err(BackendError::RemoteNotSupported)
        ));
        let commit = CommitId::from_bytes(&[0; 20]);
        assert!(matches!(
            backend.push("https://example.com/repo.git", &commit, "main", false).await,
            Err(BackendError::RemoteNotSupported)
        ));
    }

    #[test]
    fn test_create_backend_for_memory_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let backend = create_backend(&store, &RemoteConfig::default());
        assert!(!backend.supports_remote());
    }

    #[test]
    fn test_create_backend_for_git_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(GitStore::init(dir.path()).unwrap());
        let backend = create_backend(&store, &RemoteConfig::default());
        assert!(backend.supports_remote());
    }
}
