//! TOML-based configuration for subtree operations.
//!
//! Secrets (the remote access token) are never written to the file; the
//! `token_env` field names an environment variable that
//! [`SubtreeConfig::resolve_env_vars`] reads at runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::object::{Signature, Timestamp};
use crate::split::{ConcatenateMessages, EmptyCommitPolicy, FirstMessage, SquashMessagePolicy, SummaryMessage};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtreeConfig {
    /// Identity for new merge, add, and rejoin commits.
    #[serde(default)]
    pub user: UserConfig,

    /// Split defaults.
    #[serde(default)]
    pub split: SplitConfig,

    /// Fetch/push settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Signature used for commits the tool creates itself. When unset, the git
/// repository's `user.name`/`user.email` are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserConfig {
    /// A signature stamped with the current time, if both fields are set.
    pub fn signature(&self) -> Option<Signature> {
        match (&self.name, &self.email) {
            (Some(name), Some(email)) => Some(Signature::new(name, email, Timestamp::now())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

/// How commits that leave the prefix unchanged are treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyCommits {
    Keep,
    Skip,
}

impl From<EmptyCommits> for EmptyCommitPolicy {
    fn from(value: EmptyCommits) -> Self {
        match value {
            EmptyCommits::Keep => EmptyCommitPolicy::Keep,
            EmptyCommits::Skip => EmptyCommitPolicy::Skip,
        }
    }
}

/// Which built-in message policy squashed splits use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SquashMessage {
    First,
    #[default]
    Summary,
    Concatenate,
}

impl SquashMessage {
    pub fn policy(self) -> Arc<dyn SquashMessagePolicy> {
        match self {
            SquashMessage::First => Arc::new(FirstMessage),
            SquashMessage::Summary => Arc::new(SummaryMessage),
            SquashMessage::Concatenate => Arc::new(ConcatenateMessages),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Text prepended to every synthetic commit description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotate: Option<String>,

    /// Default empty-commit policy. There is no built-in default: when this
    /// is unset the caller must choose on every split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_commits: Option<EmptyCommits>,

    #[serde(default)]
    pub squash_message: SquashMessage,

    /// Always walk the full history instead of resuming from earlier joins.
    #[serde(default)]
    pub ignore_joins: bool,
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Environment variable holding an access token for HTTPS remotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Local namespace fetched refs are stored under.
    #[serde(default = "default_fetch_namespace")]
    pub fetch_namespace: String,

    /// Local namespace for the temporary refs a push is made from.
    #[serde(default = "default_push_namespace")]
    pub push_namespace: String,

    /// Allow non-fast-forward pushes.
    #[serde(default)]
    pub force_push: bool,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_fetch_namespace() -> String {
    "refs/subtree/fetch".into()
}
fn default_push_namespace() -> String {
    "refs/subtree/push".into()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            token_env: None,
            fetch_namespace: default_fetch_namespace(),
            push_namespace: default_push_namespace(),
            force_push: false,
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl SubtreeConfig {
    /// `~/.config/subtree/config.toml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("subtree").join("config.toml"))
    }

    /// Load a [`SubtreeConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SubtreeConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load `path` if given (it must exist), otherwise the default path if it
    /// exists, otherwise the built-in defaults. Resolves and validates.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::load_from_file(default)?,
                None => {
                    debug!("no configuration file, using defaults");
                    Self::default()
                }
            },
        };
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve `remote.token_env` into `remote.token`. A missing variable is
    /// logged, not fatal: anonymous remotes still work.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.remote.token_env {
            self.remote.token = resolve_optional_env(env_name, "remote.token_env");
        }
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, namespace) in [
            ("remote.fetch_namespace", &self.remote.fetch_namespace),
            ("remote.push_namespace", &self.remote.push_namespace),
        ] {
            if namespace.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "namespace must not be empty".into(),
                });
            }
            if !namespace.starts_with("refs/") || namespace.ends_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("'{namespace}' must start with 'refs/' and not end with '/'"),
                });
            }
        }
        if self.remote.fetch_namespace == self.remote.push_namespace {
            return Err(ConfigError::InvalidValue {
                field: "remote.push_namespace".into(),
                detail: "push and fetch namespaces must differ".into(),
            });
        }
        if self.user.name.is_some() != self.user.email.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "user".into(),
                detail: "name and email must be set together".into(),
            });
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.log.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log.level".into(),
                detail: format!("unknown level '{}'", self.log.level),
            });
        }
        Ok(())
    }

    /// Render the configuration as TOML (used by `init-config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
