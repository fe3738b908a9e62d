//! Subtree command-line tool.
//!
//! Adds another project's history under a directory of the current
//! repository, merges or pulls later upstream changes into it, and splits the
//! directory's history back out so it can be pushed upstream.

mod inspect;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use subtree_core::graph::is_ancestor;
use subtree_core::merge::MergeOutcome;
use subtree_core::object::CommitId;
use subtree_core::split::RejoinOptions;
use subtree_core::{
    parse_prefix, AddSource, CommitSettings, EmptyCommitPolicy, GitStore, IncomingLayout, Prefix, SplitOptions,
    SplitResult, SubtreeConfig, SubtreeOps,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Embed and extract subtree histories in a git repository.
#[derive(Parser, Debug)]
#[command(name = "subtree", version, about = "Embed, extract, and re-synthesize subtree histories")]
struct Cli {
    /// Repository to operate on (any path inside it).
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a project's history as a new subtree.
    Add {
        #[arg(short, long)]
        prefix: String,

        /// A local revision, or a repository URL/path when REF is given.
        source: String,

        /// Ref to fetch from the repository.
        remote_ref: Option<String>,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Merge a local commit into an existing subtree.
    Merge {
        #[arg(short, long)]
        prefix: String,

        /// Revision to merge.
        revision: String,

        /// The revision already keeps the subtree under the prefix.
        #[arg(long)]
        prefix_relative: bool,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Fetch a ref and merge it into an existing subtree.
    Pull {
        #[arg(short, long)]
        prefix: String,

        repository: String,

        remote_ref: String,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Extract the subtree's history into synthetic commits.
    Split {
        #[arg(short, long)]
        prefix: String,

        /// Revision to split from.
        #[arg(default_value = "HEAD")]
        revision: String,

        /// Store the synthetic head under this local branch.
        #[arg(short, long)]
        branch: Option<String>,

        #[command(flatten)]
        split: SplitArgs,
    },

    /// Split, then push the synthetic head to a remote ref.
    Push {
        #[arg(short, long)]
        prefix: String,

        repository: String,

        remote_ref: String,

        /// Revision to split from.
        #[arg(long, default_value = "HEAD")]
        revision: String,

        /// Allow a non-fast-forward update.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        split: SplitArgs,
    },

    /// List commits carrying subtree metadata.
    Inspect {
        /// Only show joins for this prefix.
        #[arg(short, long)]
        prefix: Option<String>,

        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Write a default configuration file.
    InitConfig {
        /// Output path (defaults to ~/.config/subtree/config.toml).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct CommitArgs {
    /// Merge a single squashed commit instead of the full history.
    #[arg(long)]
    squash: bool,

    /// Message for the new commit.
    #[arg(short, long)]
    message: Option<String>,
}

#[derive(Args, Debug)]
struct SplitArgs {
    /// Keep commits that leave the subtree unchanged.
    #[arg(long, conflicts_with = "skip_empty")]
    keep_empty: bool,

    /// Drop commits that leave the subtree unchanged.
    #[arg(long)]
    skip_empty: bool,

    /// Produce one synthetic commit.
    #[arg(long)]
    squash: bool,

    /// Ignore earlier joins and walk the whole history.
    #[arg(long)]
    ignore_joins: bool,

    /// Parent for synthetic commits that would otherwise be roots.
    #[arg(long)]
    onto: Option<String>,

    /// Text prepended to every synthetic commit message.
    #[arg(long)]
    annotate: Option<String>,

    /// Merge the split back into the current branch.
    #[arg(long)]
    rejoin: bool,

    /// Message for the rejoin commit.
    #[arg(short, long, requires = "rejoin")]
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::InitConfig { .. } => Ok(SubtreeConfig::default()),
        _ => SubtreeConfig::load_or_default(cli.config.as_deref()).context("failed to load configuration"),
    };

    let level = match cli.verbose {
        0 => config
            .as_ref()
            .map(|c| c.log.level.clone())
            .unwrap_or_else(|_| "warn".to_string()),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .without_time()
        .init();

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: SubtreeConfig) -> Result<()> {
    if let Commands::InitConfig { output, force } = &cli.command {
        return cmd_init_config(output.as_deref(), *force);
    }

    let store = Arc::new(
        GitStore::discover(&cli.repo)
            .with_context(|| format!("failed to open repository at {}", cli.repo.display()))?,
    );
    let ops = SubtreeOps::new(store.clone(), config);

    match cli.command {
        Commands::Add {
            prefix,
            source,
            remote_ref,
            commit,
        } => cmd_add(&ops, &store, &prefix, source, remote_ref, &commit).await,
        Commands::Merge {
            prefix,
            revision,
            prefix_relative,
            commit,
        } => cmd_merge(&ops, &store, &prefix, &revision, prefix_relative, &commit),
        Commands::Pull {
            prefix,
            repository,
            remote_ref,
            commit,
        } => cmd_pull(&ops, &store, &prefix, &repository, &remote_ref, &commit).await,
        Commands::Split {
            prefix,
            revision,
            branch,
            split,
        } => cmd_split(&ops, &store, &prefix, &revision, branch.as_deref(), &split),
        Commands::Push {
            prefix,
            repository,
            remote_ref,
            revision,
            force,
            split,
        } => cmd_push(&ops, &store, &prefix, &repository, &remote_ref, &revision, force, &split).await,
        Commands::Inspect { prefix, revision } => {
            let prefix = prefix.as_deref().map(parse_prefix).transpose()?;
            let head = store.resolve_revision(&revision)?;
            inspect::run_inspect(&ops, &head, prefix.as_ref())
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn current_head(store: &GitStore) -> Result<CommitId> {
    store
        .head_commit_id()
        .context("failed to read HEAD")?
        .context("the current branch has no commits yet")
}

fn commit_settings(ops: &SubtreeOps, args: &CommitArgs) -> Result<CommitSettings> {
    let signature = ops.signature().context("failed to determine commit signature")?;
    Ok(CommitSettings::new(signature)
        .squash(args.squash)
        .message(args.message.clone()))
}

/// Move the current branch to `commit` when the working tree allows it.
fn advance_head(store: &GitStore, commit: &CommitId, reflog_message: &str) -> Result<()> {
    if !store.is_worktree_clean().context("failed to inspect the working tree")? {
        println!(
            "{}",
            style::warn(&format!(
                "Working tree has local changes; HEAD was not moved. Result: {}",
                commit.hex()
            ))
        );
        return Ok(());
    }
    store
        .update_head(commit, reflog_message)
        .context("failed to update HEAD")?;
    debug!(commit = %commit.short(), "moved HEAD");
    Ok(())
}

fn report_merge(store: &GitStore, outcome: &MergeOutcome, reflog_message: &str) -> Result<()> {
    advance_head(store, &outcome.commit.id, reflog_message)?;
    if outcome.has_conflicts() {
        println!(
            "{}",
            style::warn(&format!(
                "Merged with {} conflicted path(s) in {}",
                outcome.conflicts.len(),
                style::commit(&outcome.commit.id.hex())
            ))
        );
        for path in &outcome.conflicts {
            println!("  {}", style::conflict(path.as_internal_str()));
        }
    } else {
        println!(
            "{}",
            style::success(&format!("Created {}", style::commit(&outcome.commit.id.hex())))
        );
    }
    Ok(())
}

fn split_options(ops: &SubtreeOps, store: &GitStore, prefix: Prefix, args: &SplitArgs) -> Result<SplitOptions> {
    let defaults = &ops.config().split;
    let empty_commits = if args.keep_empty {
        EmptyCommitPolicy::Keep
    } else if args.skip_empty {
        EmptyCommitPolicy::Skip
    } else {
        defaults
            .empty_commits
            .map(EmptyCommitPolicy::from)
            .context("choose --keep-empty or --skip-empty (or set split.empty_commits in the config)")?
    };

    let mut options =
        SplitOptions::new(prefix, empty_commits).ignore_prior_joins(args.ignore_joins || defaults.ignore_joins);
    if args.squash {
        options = options.squash(defaults.squash_message.policy());
    }
    if let Some(onto) = &args.onto {
        options = options.onto(store.resolve_revision(onto).context("failed to resolve --onto")?);
    }
    if let Some(annotate) = args.annotate.as_ref().or(defaults.annotate.as_ref()) {
        options = options.annotate(annotate.clone());
    }
    if args.rejoin {
        options = options.rejoin(RejoinOptions {
            signature: ops.signature().context("failed to determine commit signature")?,
            message: args.message.clone(),
        });
    }
    Ok(options)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_add(
    ops: &SubtreeOps,
    store: &GitStore,
    prefix: &str,
    source: String,
    remote_ref: Option<String>,
    args: &CommitArgs,
) -> Result<()> {
    let prefix = parse_prefix(prefix)?;
    let head = current_head(store)?;
    let source = match remote_ref {
        Some(remote_ref) => AddSource::Remote {
            repository: source,
            remote_ref,
        },
        None => AddSource::Local(
            store
                .resolve_revision(&source)
                .with_context(|| format!("failed to resolve '{source}'"))?,
        ),
    };
    let outcome = ops
        .add(&head, &prefix, &source, &commit_settings(ops, args)?)
        .await
        .with_context(|| format!("failed to add subtree at '{prefix}'"))?;
    report_merge(store, &outcome, &format!("subtree: add {prefix}"))
}

fn cmd_merge(
    ops: &SubtreeOps,
    store: &GitStore,
    prefix: &str,
    revision: &str,
    prefix_relative: bool,
    args: &CommitArgs,
) -> Result<()> {
    let prefix = parse_prefix(prefix)?;
    let head = current_head(store)?;
    let incoming = store
        .resolve_revision(revision)
        .with_context(|| format!("failed to resolve '{revision}'"))?;
    let layout = if prefix_relative {
        IncomingLayout::PrefixRelative
    } else {
        IncomingLayout::RootRelative
    };
    let outcome = ops
        .merge(&head, &prefix, &incoming, layout, &commit_settings(ops, args)?)
        .with_context(|| format!("failed to merge into '{prefix}'"))?;
    report_merge(store, &outcome, &format!("subtree: merge {prefix}"))
}

async fn cmd_pull(
    ops: &SubtreeOps,
    store: &GitStore,
    prefix: &str,
    repository: &str,
    remote_ref: &str,
    args: &CommitArgs,
) -> Result<()> {
    let prefix = parse_prefix(prefix)?;
    let head = current_head(store)?;
    let outcome = ops
        .pull(&head, &prefix, repository, remote_ref, &commit_settings(ops, args)?)
        .await
        .with_context(|| format!("failed to pull {remote_ref} from {repository}"))?;
    report_merge(store, &outcome, &format!("subtree: pull {prefix}"))
}

fn cmd_split(
    ops: &SubtreeOps,
    store: &GitStore,
    prefix: &str,
    revision: &str,
    branch: Option<&str>,
    args: &SplitArgs,
) -> Result<()> {
    let prefix = parse_prefix(prefix)?;
    let head = store
        .resolve_revision(revision)
        .with_context(|| format!("failed to resolve '{revision}'"))?;
    let options = split_options(ops, store, prefix.clone(), args)?;
    let result = ops
        .split(&head, &options)
        .with_context(|| format!("failed to split '{prefix}'"))?;

    if let Some(branch) = branch {
        update_split_branch(ops, store, branch, &result.synthetic_head)?;
    }
    finish_split(store, &prefix, &head, &result)?;
    println!("{}", result.synthetic_head.hex());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_push(
    ops: &SubtreeOps,
    store: &GitStore,
    prefix: &str,
    repository: &str,
    remote_ref: &str,
    revision: &str,
    force: bool,
    args: &SplitArgs,
) -> Result<()> {
    let prefix = parse_prefix(prefix)?;
    let head = store
        .resolve_revision(revision)
        .with_context(|| format!("failed to resolve '{revision}'"))?;
    let options = split_options(ops, store, prefix.clone(), args)?;
    let force = force || ops.config().remote.force_push;
    let result = ops
        .push(&head, repository, remote_ref, &options, force)
        .await
        .with_context(|| format!("failed to push '{prefix}' to {repository}"))?;
    finish_split(store, &prefix, &head, &result)?;
    println!(
        "{}",
        style::success(&format!(
            "Pushed {} to {remote_ref}",
            style::commit(&result.synthetic_head.hex())
        ))
    );
    Ok(())
}

/// Create or fast-forward `branch` to the synthetic head.
fn update_split_branch(ops: &SubtreeOps, store: &GitStore, branch: &str, synthetic: &CommitId) -> Result<()> {
    let existing = store.resolve_revision(&format!("refs/heads/{branch}")).ok();
    let force = match &existing {
        None => false,
        Some(existing) if is_ancestor(ops.store(), existing, synthetic)? => true,
        Some(_) => anyhow::bail!("branch '{branch}' is not an ancestor of the split result"),
    };
    store
        .create_branch(branch, synthetic, force)
        .with_context(|| format!("failed to update branch '{branch}'"))?;
    println!(
        "{}",
        style::success(&format!(
            "{} branch '{branch}'",
            if existing.is_some() { "Updated" } else { "Created" }
        ))
    );
    Ok(())
}

/// Report a split and move HEAD to its rejoin commit, if any.
///
/// The rejoin's first parent is `split_from`, so HEAD only moves when it
/// still points there; otherwise the commits after `split_from` would drop
/// off the branch.
fn finish_split(store: &GitStore, prefix: &Prefix, split_from: &CommitId, result: &SplitResult) -> Result<()> {
    if let Some(rejoin) = &result.rejoin {
        if store.head_commit_id().context("failed to read HEAD")?.as_ref() == Some(split_from) {
            advance_head(store, rejoin, &format!("subtree: rejoin {prefix}"))?;
        } else {
            println!(
                "{}",
                style::warn(&format!(
                    "Split revision is not HEAD; HEAD was not moved. Rejoin: {}",
                    rejoin.hex()
                ))
            );
        }
    }
    println!(
        "{}",
        style::dim(&format!("{} commit(s) synthesized", result.mapping.len()))
    );
    Ok(())
}

fn cmd_init_config(output: Option<&Path>, force: bool) -> Result<()> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => SubtreeConfig::default_path().context("could not determine the home directory")?,
    };
    if output.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Use --force or a different path.",
            output.display()
        );
    }

    let body = SubtreeConfig::default().to_toml().context("failed to render configuration")?;
    let contents = format!(
        "# Subtree configuration\n\
         #\n\
         # [split] empty_commits = \"keep\" | \"skip\"\n\
         # [remote] token_env = \"GITHUB_TOKEN\"\n\n{body}"
    );
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(&output, contents).context("failed to write config file")?;

    println!("{}", style::success(&format!("Configuration written to {}", output.display())));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use subtree_core::object::{CommitData, Signature, Timestamp};
    use subtree_core::repo_path::RepoPathBuf;
    use subtree_core::store::{Store, TreeEditor};

    fn commit(store: &GitStore, parents: &[&CommitId], contents: &str, seconds: i64) -> CommitId {
        let mut editor = TreeEditor::new(store, store.empty_tree_id().clone());
        editor
            .write_file(RepoPathBuf::from_internal_string("lib/x").unwrap(), contents.as_bytes())
            .unwrap();
        let signature = Signature::new("CLI Tester", "cli@example.com", Timestamp::new(seconds, 0));
        store
            .write_commit(CommitData {
                parents: parents.iter().map(|p| (*p).clone()).collect(),
                tree: editor.write().unwrap(),
                description: format!("edit {seconds}\n"),
                author: signature.clone(),
                committer: signature,
            })
            .unwrap()
            .id
    }

    fn rejoin_options() -> SplitOptions {
        SplitOptions::new(parse_prefix("lib").unwrap(), EmptyCommitPolicy::Skip).rejoin(RejoinOptions {
            signature: Signature::new("CLI Tester", "cli@example.com", Timestamp::new(1_000, 0)),
            message: None,
        })
    }

    #[test]
    fn test_rejoin_from_older_revision_leaves_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GitStore::init(dir.path()).unwrap());
        let c1 = commit(&store, &[], "1\n", 100);
        let c2 = commit(&store, &[&c1], "2\n", 200);
        let c3 = commit(&store, &[&c2], "3\n", 300);
        store.update_head(&c3, "test").unwrap();

        let ops = SubtreeOps::new(store.clone(), SubtreeConfig::default());
        let prefix = parse_prefix("lib").unwrap();
        let result = ops.split(&c1, &rejoin_options()).unwrap();
        assert!(result.rejoin.is_some());

        finish_split(&store, &prefix, &c1, &result).unwrap();
        assert_eq!(store.head_commit_id().unwrap(), Some(c3));
    }

    #[test]
    fn test_rejoin_from_head_advances_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GitStore::init(dir.path()).unwrap());
        let c1 = commit(&store, &[], "1\n", 100);
        let c2 = commit(&store, &[&c1], "2\n", 200);
        store.update_head(&c2, "test").unwrap();

        let ops = SubtreeOps::new(store.clone(), SubtreeConfig::default());
        let prefix = parse_prefix("lib").unwrap();
        let result = ops.split(&c2, &rejoin_options()).unwrap();

        finish_split(&store, &prefix, &c2, &result).unwrap();
        assert_eq!(store.head_commit_id().unwrap(), result.rejoin);
    }
}
