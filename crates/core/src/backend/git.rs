//! Git transport via `git2`.
//!
//! Remotes are anonymous, so the repository configuration is never touched.
//! All network work runs on the blocking pool with a repository handle opened
//! for the duration of one call.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{Cred, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use tracing::{debug, info, instrument, warn};

use super::{qualify_ref, Backend, BoxFuture};
use crate::config::RemoteConfig;
use crate::errors::BackendError;
use crate::object::CommitId;
use crate::store::git::{commit_id, to_oid};

/// Settings for [`GitBackend`], usually taken from the `[remote]` config.
#[derive(Debug, Clone)]
pub struct GitBackendOptions {
    pub token: Option<String>,
    pub fetch_namespace: String,
    pub push_namespace: String,
}

impl From<&RemoteConfig> for GitBackendOptions {
    fn from(remote: &RemoteConfig) -> Self {
        Self {
            token: remote.token.clone(),
            fetch_namespace: remote.fetch_namespace.clone(),
            push_namespace: remote.push_namespace.clone(),
        }
    }
}

impl Default for GitBackendOptions {
    fn default() -> Self {
        GitBackendOptions::from(&RemoteConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct GitBackend {
    git_dir: PathBuf,
    options: GitBackendOptions,
}

impl GitBackend {
    pub fn new<P: AsRef<Path>>(git_dir: P, options: GitBackendOptions) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
            options,
        }
    }

    /// Local ref a fetch of `remote_ref` is stored under.
    pub fn fetch_ref_name(&self, remote_ref: &str) -> String {
        namespaced(&self.options.fetch_namespace, &qualify_ref(remote_ref))
    }
}

impl Backend for GitBackend {
    fn fetch<'a>(&'a self, repository: &'a str, remote_ref: &'a str) -> BoxFuture<'a, Result<CommitId, BackendError>> {
        let git_dir = self.git_dir.clone();
        let options = self.options.clone();
        let repository = repository.to_string();
        let remote_ref = qualify_ref(remote_ref);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || fetch_blocking(&git_dir, &options, &repository, &remote_ref))
                .await
                .map_err(|e| BackendError::TaskFailed(e.to_string()))?
        })
    }

    fn push<'a>(
        &'a self,
        repository: &'a str,
        commit: &'a CommitId,
        remote_ref: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        let git_dir = self.git_dir.clone();
        let options = self.options.clone();
        let repository = repository.to_string();
        let commit = commit.clone();
        let remote_ref = qualify_ref(remote_ref);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                push_blocking(&git_dir, &options, &repository, &commit, &remote_ref, force)
            })
            .await
            .map_err(|e| BackendError::TaskFailed(e.to_string()))?
        })
    }

    fn supports_remote(&self) -> bool {
        true
    }
}

/// `refs/heads/main` under `refs/subtree/fetch` is `refs/subtree/fetch/heads/main`.
fn namespaced(namespace: &str, qualified: &str) -> String {
    let rest = qualified.strip_prefix("refs/").unwrap_or(qualified);
    format!("{namespace}/{rest}")
}

fn callbacks<'a>(token: Option<&str>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, _username, _allowed| Cred::userpass_plaintext("x-access-token", &tok));
    }
    callbacks
}

#[instrument(skip(git_dir, options), fields(repository = %repository, remote_ref = %remote_ref))]
fn fetch_blocking(
    git_dir: &Path,
    options: &GitBackendOptions,
    repository: &str,
    remote_ref: &str,
) -> Result<CommitId, BackendError> {
    info!("fetching");
    let repo = Repository::open(git_dir)?;
    let local_ref = namespaced(&options.fetch_namespace, remote_ref);

    // A stale ref from an earlier fetch must not be mistaken for this one.
    match repo.find_reference(&local_ref) {
        Ok(mut stale) => stale.delete()?,
        Err(e) if e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut remote = repo.remote_anonymous(repository)?;
    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks(options.token.as_deref()));
    let refspec = format!("+{remote_ref}:{local_ref}");
    remote
        .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
        .map_err(|e| BackendError::FetchFailed {
            repository: repository.to_string(),
            detail: e.message().to_string(),
        })?;

    let fetched = match repo.find_reference(&local_ref) {
        Ok(reference) => reference.peel_to_commit()?,
        Err(e) if e.code() == ErrorCode::NotFound => return Err(BackendError::RefNotFound(remote_ref.to_string())),
        Err(e) => return Err(e.into()),
    };
    let id = commit_id(fetched.id());
    info!(commit = %id, local_ref = %local_ref, "fetch completed");
    Ok(id)
}

#[instrument(skip(git_dir, options), fields(repository = %repository, commit = %commit, remote_ref = %remote_ref))]
fn push_blocking(
    git_dir: &Path,
    options: &GitBackendOptions,
    repository: &str,
    commit: &CommitId,
    remote_ref: &str,
    force: bool,
) -> Result<(), BackendError> {
    info!(force, "pushing");
    let repo = Repository::open(git_dir)?;
    let oid = to_oid(commit.as_bytes(), "commit")?;
    let temp_ref = namespaced(&options.push_namespace, remote_ref);
    repo.reference(&temp_ref, oid, true, "subtree: push")?;

    let result = push_temp_ref(&repo, options, repository, &temp_ref, remote_ref, force);

    match repo.find_reference(&temp_ref) {
        Ok(mut reference) => {
            if let Err(e) = reference.delete() {
                warn!(temp_ref = %temp_ref, error = %e, "failed to delete temporary push ref");
            }
        }
        Err(e) => debug!(temp_ref = %temp_ref, error = %e, "temporary push ref already gone"),
    }

    if result.is_ok() {
        info!("push completed");
    }
    result
}

fn push_temp_ref(
    repo: &Repository,
    options: &GitBackendOptions,
    repository: &str,
    temp_ref: &str,
    remote_ref: &str,
    force: bool,
) -> Result<(), BackendError> {
    let mut remote = repo.remote_anonymous(repository)?;
    let mut callbacks = callbacks(options.token.as_deref());

    let push_error = Arc::new(Mutex::new(None::<String>));
    let push_error_clone = push_error.clone();
    callbacks.push_update_reference(move |refname, status| {
        if let Some(msg) = status {
            warn!(refname, msg, "push rejected");
            let mut slot = push_error_clone.lock().unwrap_or_else(|poisoned| {
                warn!("push status mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            *slot = Some(msg.to_string());
        }
        Ok(())
    });

    let mut push_opts = PushOptions::new();
    push_opts.remote_callbacks(callbacks);
    let refspec = format!("{}{temp_ref}:{remote_ref}", if force { "+" } else { "" });
    remote
        .push(&[refspec.as_str()], Some(&mut push_opts))
        .map_err(|e| BackendError::PushFailed {
            repository: repository.to_string(),
            detail: e.message().to_string(),
        })?;

    let rejected = push_error
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(detail) = rejected {
        return Err(BackendError::PushFailed {
            repository: repository.to_string(),
            detail,
        });
    }
    Ok(())
}
