//! Configuration module for dirmirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, password decryption, validation, defaults, and a builder for
//! programmatic use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::backend::{BackendKind, SESSION_MAX_AGE};
use crate::secret::{SecretBox, SecretError};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Default seconds between two passes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cannot decrypt {field}: {source}")]
    Decrypt {
        field: &'static str,
        #[source]
        source: SecretError,
    },

    #[error("decrypted {field} is not valid UTF-8")]
    NotUtf8 { field: &'static str },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Top-level configuration for dirmirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    /// Where files are taken from.
    pub source: BackendConfig,
    /// Where files are copied to.
    pub dest: BackendConfig,
    /// Root of the retention tree, interpreted by the source backend.
    pub dustbin: PathBuf,
    pub execution: ExecutionPolicy,
    /// Known-hosts file applied to both backends when set.
    pub known_hosts: Option<PathBuf>,
    /// Seconds to sleep between passes.
    pub poll_interval: u64,
    /// Seconds after which a remote session is re-established.
    pub session_max_age: u64,
    pub logging: LoggingConfig,
}

/// Descriptor of one storage backend.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackendConfig {
    /// Backend type tag: `local`, `sftp` or `smb`.
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    /// Root directory on the backend.
    pub path: PathBuf,
    /// Share name on the SMB server.
    pub share_name: String,
    /// Private key used for SFTP public-key authentication.
    pub identity_file: Option<PathBuf>,
    pub username: String,
    /// SMB password, or the SFTP private-key passphrase. May be stored encrypted.
    pub password: String,
    /// NTLM domain for SMB.
    pub domain: String,
    pub known_hosts: Option<PathBuf>,
}

/// Per-pass policy for the FileMove engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExecutionPolicy {
    /// Files at a depth below this level are left untouched; root children are level 1.
    pub start_level: usize,
    /// Overwrite existing destination files instead of renaming the copy.
    pub overwrite: bool,
    /// Owner applied on the destination when `gid` is non-zero.
    pub uid: u32,
    /// Group applied on the destination; zero disables ownership changes.
    pub gid: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: BackendConfig::default(),
            dest: BackendConfig::default(),
            dustbin: PathBuf::new(),
            execution: ExecutionPolicy::default(),
            known_hosts: None,
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            session_max_age: SESSION_MAX_AGE.as_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            start_level: 1,
            overwrite: false,
            uid: 0,
            gid: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ExecutionPolicy {
    /// Whether ownership should be applied on the destination.
    #[must_use]
    pub fn should_chown(&self) -> bool {
        self.gid != 0
    }

    /// Whether a file at `level` takes part in the move.
    #[must_use]
    pub fn file_in_scope(&self, level: usize) -> bool {
        level >= self.start_level
    }

    /// Whether an emptied directory at `level` should be removed from the source.
    #[must_use]
    pub fn dir_in_scope(&self, level: usize) -> bool {
        level >= self.start_level
    }
}

// The password is never printed, encrypted or not.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("share_name", &self.share_name)
            .field("identity_file", &self.identity_file)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("domain", &self.domain)
            .field("known_hosts", &self.known_hosts)
            .finish()
    }
}

impl BackendConfig {
    /// Descriptor for a local directory.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Local.as_str().to_string(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Descriptor for an SFTP server.
    pub fn sftp(host: impl Into<String>, port: u16, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Sftp.as_str().to_string(),
            host: host.into(),
            port,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Descriptor for an SMB share.
    pub fn smb(
        host: impl Into<String>,
        port: u16,
        share_name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: BackendKind::Smb.as_str().to_string(),
            host: host.into(),
            port,
            share_name: share_name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Parsed type tag, if it names a known backend.
    #[must_use]
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.kind.parse().ok()
    }

    /// `host:port`, for logs and socket addresses.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn decrypt_password(
        &mut self,
        sb: &SecretBox,
        secret: &str,
        field: &'static str,
    ) -> Result<(), ConfigError> {
        if self.password.is_empty() {
            return Ok(());
        }
        let plain = sb
            .decrypt_string(secret, &self.password)
            .map_err(|source| ConfigError::Decrypt { field, source })?;
        self.password = String::from_utf8(plain).map_err(|_| ConfigError::NotUtf8 { field })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a YAML file at `path`.
    ///
    /// When `secret` is given, stored passwords are decrypted with it. The
    /// global `known-hosts` setting, if present, overrides both backends'.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or decrypted.
    pub fn load(path: &Path, secret: Option<&str>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            config.decrypt_passwords(&SecretBox::default(), secret)?;
        }
        Ok(config)
    }

    /// Parse configuration from YAML text and apply the known-hosts override.
    ///
    /// # Errors
    /// Returns an error if the YAML does not match the schema.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_yaml::from_str(content)?;
        config.apply_known_hosts_override();
        Ok(config)
    }

    /// Decrypt both backends' stored passwords in place.
    ///
    /// # Errors
    /// Returns an error naming the backend whose password failed.
    pub fn decrypt_passwords(&mut self, sb: &SecretBox, secret: &str) -> Result<(), ConfigError> {
        self.source.decrypt_password(sb, secret, "source password")?;
        self.dest.decrypt_password(sb, secret, "dest password")?;
        Ok(())
    }

    fn apply_known_hosts_override(&mut self) {
        if let Some(ref known_hosts) = self.known_hosts {
            self.source.known_hosts = Some(known_hosts.clone());
            self.dest.known_hosts = Some(known_hosts.clone());
        }
    }

    /// Platform-independent default path for the configuration file.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    #[must_use]
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    #[must_use]
    pub fn session_max_age_duration(&self) -> Duration {
        Duration::from_secs(self.session_max_age)
    }
}

/// Effective known-hosts file for SFTP host-key verification.
///
/// A configured path wins; otherwise `~/.ssh/known_hosts` of the invoking
/// user. Returns `None` when no home directory can be determined.
pub fn resolve_known_hosts(configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(path) if !path.as_os_str().is_empty() => Some(path.to_path_buf()),
        _ => dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"source.host"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn push(errors: &mut Vec<ValidationError>, field: String, message: &str) {
    errors.push(ValidationError {
        field,
        message: message.to_string(),
    });
}

impl BackendConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<ValidationError>) {
        let Some(kind) = self.backend_kind() else {
            push(
                errors,
                format!("{prefix}.type"),
                &format!("unknown backend type '{}' (expected local, sftp or smb)", self.kind),
            );
            return;
        };

        if kind.is_remote() {
            if self.host.is_empty() {
                push(errors, format!("{prefix}.host"), "must be set for remote backends");
            }
            if self.port == 0 {
                push(errors, format!("{prefix}.port"), "must be greater than 0");
            }
            if self.username.is_empty() {
                push(errors, format!("{prefix}.username"), "must be set for remote backends");
            }
        } else if self.path.as_os_str().is_empty() {
            push(errors, format!("{prefix}.path"), "must be set for local backends");
        }

        match kind {
            BackendKind::Sftp if self.identity_file.is_none() => {
                push(errors, format!("{prefix}.identity-file"), "must be set for sftp");
            }
            BackendKind::Smb if self.share_name.is_empty() => {
                push(errors, format!("{prefix}.share-name"), "must be set for smb");
            }
            _ => {}
        }
    }
}

impl AppConfig {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        self.source.validate_into("source", &mut errors);
        self.dest.validate_into("dest", &mut errors);

        if self.dustbin.as_os_str().is_empty() {
            push(&mut errors, "dustbin".into(), "must be set");
        }
        if self.poll_interval == 0 {
            push(&mut errors, "poll-interval".into(), "must be greater than 0");
        }
        if self.session_max_age == 0 {
            push(&mut errors, "session-max-age".into(), "must be greater than 0");
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                &mut errors,
                "logging.level".into(),
                &format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`AppConfig`].
///
/// Starts from [`AppConfig::default`] and allows overriding individual fields.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    /// Create a new builder initialised with default values.
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn source(mut self, source: BackendConfig) -> Self {
        self.config.source = source;
        self
    }

    pub fn dest(mut self, dest: BackendConfig) -> Self {
        self.config.dest = dest;
        self
    }

    pub fn dustbin(mut self, dustbin: impl Into<PathBuf>) -> Self {
        self.config.dustbin = dustbin.into();
        self
    }

    pub fn start_level(mut self, level: usize) -> Self {
        self.config.execution.start_level = level;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.execution.overwrite = overwrite;
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.config.execution.uid = uid;
        self.config.execution.gid = gid;
        self
    }

    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.known_hosts = Some(path.into());
        self.config.apply_known_hosts_override();
        self
    }

    pub fn poll_interval(mut self, seconds: u64) -> Self {
        self.config.poll_interval = seconds;
        self
    }

    pub fn session_max_age(mut self, seconds: u64) -> Self {
        self.config.session_max_age = seconds;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the config without validation.
    pub fn build(self) -> AppConfig {
        self.config
    }

    /// Consume the builder, validate, and return the config or errors.
    pub fn build_validated(self) -> Result<AppConfig, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
