//! A [`Store`] backed by a real git repository via `git2`.
//!
//! Files, symlinks, directories, and submodules map onto the matching git
//! tree-entry modes. Commits keep the exact author and committer timestamps
//! they are given, so writing the same [`CommitData`] twice (even through two
//! independent handles) yields the same commit id.
//!
//! Git has no notion of a conflicted tree entry. A [`Conflict`] is stored as
//! a git tree holding a `.subtree-conflict` JSON blob plus one entry per
//! present term, so that the term objects stay reachable and survive `gc`,
//! fetch, and push. A directory entry pointing at such a tree reads back as
//! [`TreeValue::Conflict`]. A directory only decodes that way when the marker
//! parses and its other entries are exactly the `term-N` slots of the present
//! terms, so a user file that happens to share the marker's name stays a file.
//!
//! Legacy `100664` blobs read as plain files. Git writes them back in their
//! canonical `100644` form, but only directories on an edited path are
//! rewritten; untouched siblings keep their ids.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use git2::{Oid, Repository, StatusOptions};
use tracing::{debug, info, instrument, warn};

use super::Store;
use crate::errors::StoreError;
use crate::object::{
    Commit, CommitData, CommitId, Conflict, ConflictId, FileId, Signature, Timestamp, Tree, TreeId,
    TreeValue,
};

/// Name of the blob that marks a git tree as an encoded conflict.
pub const CONFLICT_MARKER: &str = ".subtree-conflict";

const MODE_TREE: i32 = 0o040000;
const MODE_BLOB: i32 = 0o100644;
const MODE_BLOB_GROUP_WRITABLE: i32 = 0o100664;
const MODE_BLOB_EXECUTABLE: i32 = 0o100755;
const MODE_LINK: i32 = 0o120000;
const MODE_COMMIT: i32 = 0o160000;

/// Git-backed object store.
pub struct GitStore {
    repo: Mutex<Repository>,
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    empty_tree_id: TreeId,
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .finish()
    }
}

impl GitStore {
    /// Open an existing repository at `path`.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .map_err(|_| StoreError::RepositoryNotFound(path.display().to_string()))?;
        info!("opened git repository");
        Self::from_repository(repo)
    }

    /// Open the repository containing `path`, searching parent directories.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .map_err(|_| StoreError::RepositoryNotFound(path.display().to_string()))?;
        debug!(git_dir = %repo.path().display(), "discovered git repository");
        Self::from_repository(repo)
    }

    /// Create a new repository with a working tree at `path`.
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_repository(Repository::init(path.as_ref())?)
    }

    /// Create a new bare repository at `path`.
    pub fn init_bare<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_repository(Repository::init_bare(path.as_ref())?)
    }

    fn from_repository(repo: Repository) -> Result<Self, StoreError> {
        let empty_tree = repo.treebuilder(None)?.write()?;
        Ok(Self {
            git_dir: repo.path().to_path_buf(),
            workdir: repo.workdir().map(Path::to_path_buf),
            empty_tree_id: TreeId::from_bytes(empty_tree.as_bytes()),
            repo: Mutex::new(repo),
        })
    }

    /// The `.git` directory (or the repository itself when bare).
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    fn repo(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(|poisoned| {
            warn!("git repository mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Resolve a revision expression (`HEAD`, a branch, a hex id, ...) to a
    /// commit.
    pub fn resolve_revision(&self, spec: &str) -> Result<CommitId, StoreError> {
        let repo = self.repo();
        let object = repo
            .revparse_single(spec)
            .map_err(|_| StoreError::RevisionNotFound(spec.to_string()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| StoreError::RevisionNotFound(spec.to_string()))?;
        Ok(commit_id(commit.id()))
    }

    /// The commit `HEAD` points at, or `None` on an unborn branch.
    pub fn head_commit_id(&self) -> Result<Option<CommitId>, StoreError> {
        let repo = self.repo();
        let result = match repo.head() {
            Ok(head) => Ok(Some(commit_id(head.peel_to_commit()?.id()))),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch || e.code() == git2::ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Move the current branch (or a detached `HEAD`) to `commit` and force
    /// the working tree to match it.
    #[instrument(skip(self), fields(commit = %commit))]
    pub fn update_head(&self, commit: &CommitId, reflog_message: &str) -> Result<(), StoreError> {
        let repo = self.repo();
        let oid = to_oid(commit.as_bytes(), "commit")?;
        repo.find_commit(oid)?;
        let head = repo.find_reference("HEAD")?;
        match head.symbolic_target() {
            Some(branch) => {
                let branch = branch.to_string();
                repo.reference(&branch, oid, true, reflog_message)?;
                debug!(branch = %branch, "moved branch");
            }
            None => repo.set_head_detached(oid)?,
        }
        if !repo.is_bare() {
            repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        }
        info!("updated HEAD");
        Ok(())
    }

    /// Create (or with `force`, move) a local branch at `commit`.
    pub fn create_branch(&self, name: &str, commit: &CommitId, force: bool) -> Result<(), StoreError> {
        let repo = self.repo();
        let target = repo.find_commit(to_oid(commit.as_bytes(), "commit")?)?;
        repo.branch(name, &target, force)?;
        info!(name, commit = %commit, "created branch");
        Ok(())
    }

    /// True when tracked files have no staged or unstaged changes. Bare
    /// repositories are always clean.
    pub fn is_worktree_clean(&self) -> Result<bool, StoreError> {
        let repo = self.repo();
        if repo.is_bare() {
            return Ok(true);
        }
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    /// The repository's configured `user.name`/`user.email`, stamped now.
    pub fn default_signature(&self) -> Result<Signature, StoreError> {
        let repo = self.repo();
        let sig = repo.signature()?;
        Ok(from_git_signature(&sig))
    }

    fn read_tree_value(repo: &Repository, mode: i32, oid: Oid) -> Result<Option<TreeValue>, StoreError> {
        let value = match mode {
            MODE_BLOB | MODE_BLOB_GROUP_WRITABLE => TreeValue::File {
                id: FileId::from_bytes(oid.as_bytes()),
                executable: false,
            },
            MODE_BLOB_EXECUTABLE => TreeValue::File {
                id: FileId::from_bytes(oid.as_bytes()),
                executable: true,
            },
            MODE_LINK => TreeValue::Symlink {
                id: FileId::from_bytes(oid.as_bytes()),
            },
            MODE_COMMIT => TreeValue::GitSubmodule { id: commit_id(oid) },
            MODE_TREE => {
                let tree = repo.find_tree(oid)?;
                if is_conflict_tree(repo, &tree) {
                    TreeValue::Conflict {
                        id: ConflictId::from_bytes(oid.as_bytes()),
                    }
                } else {
                    TreeValue::Tree {
                        id: TreeId::from_bytes(oid.as_bytes()),
                    }
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

fn decode_conflict(repo: &Repository, tree: &git2::Tree<'_>) -> Option<Conflict> {
    let marker = tree.get_name(CONFLICT_MARKER)?;
    if marker.kind() != Some(git2::ObjectType::Blob) {
        return None;
    }
    let blob = repo.find_blob(marker.id()).ok()?;
    serde_json::from_slice(blob.content()).ok()
}

fn is_conflict_tree(repo: &Repository, tree: &git2::Tree<'_>) -> bool {
    let Some(conflict) = decode_conflict(repo, tree) else {
        return false;
    };
    let mut expected: Vec<String> = conflict
        .terms
        .iter()
        .enumerate()
        .filter(|(_, term)| term.value.is_some())
        .map(|(index, _)| format!("term-{index}"))
        .collect();
    expected.push(CONFLICT_MARKER.to_string());
    expected.sort();
    let mut names: Vec<String> = tree.iter().filter_map(|e| e.name().map(str::to_string)).collect();
    names.sort();
    names == expected
}

pub(crate) fn commit_id(oid: Oid) -> CommitId {
    CommitId::from_bytes(oid.as_bytes())
}

pub(crate) fn to_oid(bytes: &[u8], kind: &'static str) -> Result<Oid, StoreError> {
    Oid::from_bytes(bytes).map_err(|_| StoreError::ObjectNotFound {
        kind,
        id: hex::encode(bytes),
    })
}

fn entry_target(value: &TreeValue) -> Result<(Oid, i32), StoreError> {
    Ok(match value {
        TreeValue::File { id, executable } => {
            let mode = if *executable { MODE_BLOB_EXECUTABLE } else { MODE_BLOB };
            (to_oid(id.as_bytes(), "file")?, mode)
        }
        TreeValue::Symlink { id } => (to_oid(id.as_bytes(), "file")?, MODE_LINK),
        TreeValue::Tree { id } => (to_oid(id.as_bytes(), "tree")?, MODE_TREE),
        TreeValue::GitSubmodule { id } => (to_oid(id.as_bytes(), "commit")?, MODE_COMMIT),
        TreeValue::Conflict { id } => (to_oid(id.as_bytes(), "conflict")?, MODE_TREE),
    })
}

fn from_git_signature(sig: &git2::Signature<'_>) -> Signature {
    let when = sig.when();
    Signature::new(
        String::from_utf8_lossy(sig.name_bytes()),
        String::from_utf8_lossy(sig.email_bytes()),
        Timestamp::new(when.seconds(), when.offset_minutes()),
    )
}

fn to_git_signature(sig: &Signature) -> Result<git2::Signature<'static>, StoreError> {
    let time = git2::Time::new(sig.timestamp.seconds, sig.timestamp.tz_offset_minutes);
    Ok(git2::Signature::new(&sig.name, &sig.email, &time)?)
}

impl Store for GitStore {
    fn empty_tree_id(&self) -> &TreeId {
        &self.empty_tree_id
    }

    fn read_file(&self, id: &FileId) -> Result<Vec<u8>, StoreError> {
        let repo = self.repo();
        let blob = repo
            .find_blob(to_oid(id.as_bytes(), "file")?)
            .map_err(|_| StoreError::ObjectNotFound {
                kind: "file",
                id: id.hex(),
            })?;
        Ok(blob.content().to_vec())
    }

    fn write_file(&self, contents: &[u8]) -> Result<FileId, StoreError> {
        let oid = self.repo().blob(contents)?;
        Ok(FileId::from_bytes(oid.as_bytes()))
    }

    fn get_tree(&self, id: &TreeId) -> Result<Tree, StoreError> {
        let repo = self.repo();
        let git_tree = repo
            .find_tree(to_oid(id.as_bytes(), "tree")?)
            .map_err(|_| StoreError::ObjectNotFound {
                kind: "tree",
                id: id.hex(),
            })?;
        let mut tree = Tree::new();
        for entry in git_tree.iter() {
            let name = entry.name().ok_or_else(|| StoreError::Corrupt {
                kind: "tree",
                id: id.hex(),
                detail: "entry name is not valid UTF-8".into(),
            })?;
            match Self::read_tree_value(&repo, entry.filemode(), entry.id())? {
                Some(value) => tree.set(name, value),
                None => {
                    return Err(StoreError::Corrupt {
                        kind: "tree",
                        id: id.hex(),
                        detail: format!("unsupported mode {:o} for '{name}'", entry.filemode()),
                    })
                }
            }
        }
        Ok(tree)
    }

    fn write_tree(&self, tree: &Tree) -> Result<TreeId, StoreError> {
        let repo = self.repo();
        let mut builder = repo.treebuilder(None)?;
        for (name, value) in tree.entries() {
            let (oid, mode) = entry_target(value)?;
            builder.insert(name, oid, mode)?;
        }
        Ok(TreeId::from_bytes(builder.write()?.as_bytes()))
    }

    fn get_conflict(&self, id: &ConflictId) -> Result<Conflict, StoreError> {
        let repo = self.repo();
        let not_found = || StoreError::ObjectNotFound {
            kind: "conflict",
            id: id.hex(),
        };
        let tree = repo
            .find_tree(to_oid(id.as_bytes(), "conflict")?)
            .map_err(|_| not_found())?;
        let marker = tree.get_name(CONFLICT_MARKER).ok_or_else(not_found)?;
        let blob = repo.find_blob(marker.id())?;
        serde_json::from_slice(blob.content()).map_err(|e| StoreError::Corrupt {
            kind: "conflict",
            id: id.hex(),
            detail: e.to_string(),
        })
    }

    fn write_conflict(&self, conflict: &Conflict) -> Result<ConflictId, StoreError> {
        let encoded = serde_json::to_vec(conflict)?;
        let repo = self.repo();
        let mut builder = repo.treebuilder(None)?;
        builder.insert(CONFLICT_MARKER, repo.blob(&encoded)?, MODE_BLOB)?;
        for (index, term) in conflict.terms.iter().enumerate() {
            if let Some(value) = &term.value {
                let (oid, mode) = entry_target(value)?;
                builder.insert(format!("term-{index}"), oid, mode)?;
            }
        }
        Ok(ConflictId::from_bytes(builder.write()?.as_bytes()))
    }

    fn get_commit(&self, id: &CommitId) -> Result<Commit, StoreError> {
        let repo = self.repo();
        let commit = repo
            .find_commit(to_oid(id.as_bytes(), "commit")?)
            .map_err(|_| StoreError::ObjectNotFound {
                kind: "commit",
                id: id.hex(),
            })?;
        let result = Commit {
            id: id.clone(),
            parents: commit.parent_ids().map(commit_id).collect(),
            tree: TreeId::from_bytes(commit.tree_id().as_bytes()),
            description: String::from_utf8_lossy(commit.message_raw_bytes()).into_owned(),
            author: from_git_signature(&commit.author()),
            committer: from_git_signature(&commit.committer()),
        };
        Ok(result)
    }

    fn write_commit(&self, data: CommitData) -> Result<Commit, StoreError> {
        let repo = self.repo();
        let tree = repo.find_tree(to_oid(data.tree.as_bytes(), "tree")?)?;
        let parents = data
            .parents
            .iter()
            .map(|p| Ok(repo.find_commit(to_oid(p.as_bytes(), "commit")?)?))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let author = to_git_signature(&data.author)?;
        let committer = to_git_signature(&data.committer)?;
        let oid = repo.commit(None, &author, &committer, &data.description, &tree, &parent_refs)?;
        debug!(commit = %oid, parents = parent_refs.len(), "wrote commit");
        Ok(Commit::from_data(commit_id(oid), data))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{set_value_at, value_at};
    use crate::test_support::{path, signature, write_tree};

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitStore::open("/nonexistent/subtree-repo"),
            Err(StoreError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_tree_round_trip_keeps_modes() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        let data = store.write_file(b"#!/bin/sh\n").unwrap();
        let mut tree = Tree::new();
        tree.set(
            "run.sh",
            TreeValue::File {
                id: data.clone(),
                executable: true,
            },
        );
        tree.set("link", TreeValue::Symlink { id: data });
        let id = store.write_tree(&tree).unwrap();
        assert_eq!(store.get_tree(&id).unwrap(), tree);
    }

    #[test]
    fn test_conflict_reads_back_as_conflict_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        let ours = TreeValue::File {
            id: store.write_file(b"ours\n").unwrap(),
            executable: false,
        };
        let theirs = TreeValue::File {
            id: store.write_file(b"theirs\n").unwrap(),
            executable: false,
        };
        let conflict = Conflict::three_way(None, Some(ours), Some(theirs), ["base", "ours", "theirs"]);
        let conflict_id = store.write_conflict(&conflict).unwrap();
        assert_eq!(store.get_conflict(&conflict_id).unwrap(), conflict);

        let base = write_tree(&store, &[("keep.txt", "k")]);
        let root = set_value_at(
            &store,
            &base,
            &path("lib/file.txt"),
            Some(TreeValue::Conflict { id: conflict_id.clone() }),
        )
        .unwrap();
        assert_eq!(
            value_at(&store, &root, &path("lib/file.txt")).unwrap(),
            Some(TreeValue::Conflict { id: conflict_id })
        );
    }

    #[test]
    fn test_marker_named_user_file_is_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        let root = write_tree(&store, &[("docs/.subtree-conflict", "my notes\n"), ("docs/readme", "r\n")]);
        assert!(matches!(
            value_at(&store, &root, &path("docs")).unwrap(),
            Some(TreeValue::Tree { .. })
        ));
    }

    #[test]
    fn test_edit_keeps_untouched_sibling_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        let docs_id = {
            let repo = store.repo();
            let blob = repo.blob(b"legacy\n").unwrap();
            let mut builder = repo.treebuilder(None).unwrap();
            builder.insert("notes.txt", blob, MODE_BLOB_GROUP_WRITABLE).unwrap();
            TreeId::from_bytes(builder.write().unwrap().as_bytes())
        };
        let base = write_tree(&store, &[("lib/x", "1\n")]);
        let root = set_value_at(&store, &base, &path("docs"), Some(TreeValue::Tree { id: docs_id.clone() })).unwrap();

        let x = value_at(&store, &root, &path("lib/x")).unwrap();
        assert_eq!(set_value_at(&store, &root, &path("lib/x"), x).unwrap(), root);

        let edited = TreeValue::File {
            id: store.write_file(b"2\n").unwrap(),
            executable: false,
        };
        let next = set_value_at(&store, &root, &path("lib/x"), Some(edited)).unwrap();
        assert_ne!(next, root);
        assert_eq!(
            value_at(&store, &next, &path("docs")).unwrap(),
            Some(TreeValue::Tree { id: docs_id })
        );
    }

    #[test]
    fn test_commit_keeps_timestamps_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        let tree = write_tree(&store, &[("a.txt", "a")]);
        let data = CommitData {
            parents: vec![],
            tree,
            description: "\nleading newline kept\n".into(),
            author: signature(1_600_000_000),
            committer: signature(1_600_000_100),
        };
        let commit = store.write_commit(data.clone()).unwrap();
        let read = store.get_commit(&commit.id).unwrap();
        assert_eq!(read.description, data.description);
        assert_eq!(read.author, data.author);
        assert_eq!(read.committer, data.committer);
        assert_eq!(store.write_commit(data).unwrap().id, commit.id);
    }

    #[test]
    fn test_update_head_on_unborn_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        assert_eq!(store.head_commit_id().unwrap(), None);
        let tree = write_tree(&store, &[("a.txt", "a")]);
        let commit = store
            .write_commit(CommitData {
                parents: vec![],
                tree,
                description: "init\n".into(),
                author: signature(1),
                committer: signature(1),
            })
            .unwrap();
        store.update_head(&commit.id, "test").unwrap();
        assert_eq!(store.head_commit_id().unwrap(), Some(commit.id.clone()));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a");
        assert!(store.is_worktree_clean().unwrap());
        assert_eq!(store.resolve_revision("HEAD").unwrap(), commit.id);
        assert!(matches!(
            store.resolve_revision("no-such-branch"),
            Err(StoreError::RevisionNotFound(_))
        ));
    }
}
