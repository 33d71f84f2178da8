//! Explicit configuration for every hourlog component.
//!
//! Paths that the archiver and merge tool used to hard-code live here and are
//! passed into each component at construction, so tests can point everything
//! at a temporary directory.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HOURLOG_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archiver: ArchiverConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Absolute path of the file this config was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    #[serde(default = "default_source_log")]
    pub source_log: PathBuf,
    #[serde(default = "default_position_file")]
    pub position_file: PathBuf,
    #[serde(default = "default_buffer_file")]
    pub buffer_file: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    /// Second copy of the operational log, plus `[PERF]` entries.
    #[serde(default = "default_local_log")]
    pub local_log: Option<PathBuf>,
    #[serde(default)]
    pub rollover_minute: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            source_log: default_source_log(),
            position_file: default_position_file(),
            buffer_file: default_buffer_file(),
            archive_dir: default_archive_dir(),
            lock_file: default_lock_file(),
            local_log: default_local_log(),
            rollover_minute: 0,
            lock_timeout_ms: default_lock_timeout_ms(),
            compression: CompressionConfig::default(),
        }
    }
}

impl ArchiverConfig {
    /// Path of the durable operational log inside the archive directory.
    #[must_use]
    pub fn oplog_path(&self) -> PathBuf {
        self.archive_dir.join("archive.log")
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Which compression provider the archiver uses after a rollover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Shell out to an external gzip-compatible program.
    #[default]
    Command,
    /// In-process gzip encoder.
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub kind: CompressionKind,
    #[serde(default = "default_compress_program")]
    pub program: String,
    #[serde(default = "default_compress_level")]
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            kind: CompressionKind::default(),
            program: default_compress_program(),
            level: default_compress_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_archive_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_merge_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_merge_output")]
    pub output_file: PathBuf,
    #[serde(default)]
    pub include_uncompressed: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            source_dir: default_archive_dir(),
            work_dir: default_merge_work_dir(),
            output_file: default_merge_output(),
            include_uncompressed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_install_path")]
    pub install_path: PathBuf,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            install_path: default_install_path(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when no file exists.
    ///
    /// Precedence: `explicit`, then `$HOURLOG_CONFIG`, then
    /// `<config_dir>/hourlog/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be read,
    /// parsed, or validated. An explicit path that does not exist is a read
    /// error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(from_env) = env::var(CONFIG_ENV) {
            if !from_env.trim().is_empty() {
                return Self::from_file(Path::new(from_env.trim()));
            }
        }

        let Some(config_dir) = dirs::config_dir() else {
            return Ok(Self::default());
        };

        let path = config_dir.join("hourlog/config.toml");
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    /// Read and validate a specific config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        config.source = Some(
            std::fs::canonicalize(path)
                .or_else(|_| std::path::absolute(path))
                .unwrap_or_else(|_| path.to_path_buf()),
        );
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate config text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.expand_home();
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archiver.rollover_minute > 59 {
            return Err(ConfigError::Invalid {
                key: "archiver.rollover_minute",
                reason: format!("{} is not a minute (0..=59)", self.archiver.rollover_minute),
            });
        }
        if !(1..=59).contains(&self.schedule.interval_minutes) {
            return Err(ConfigError::Invalid {
                key: "schedule.interval_minutes",
                reason: format!("{} is outside 1..=59", self.schedule.interval_minutes),
            });
        }
        if self.archiver.compression.level > 9 {
            return Err(ConfigError::Invalid {
                key: "archiver.compression.level",
                reason: format!("{} is outside 0..=9", self.archiver.compression.level),
            });
        }
        if self.archiver.compression.kind == CompressionKind::Command
            && self.archiver.compression.program.trim().is_empty()
        {
            return Err(ConfigError::Invalid {
                key: "archiver.compression.program",
                reason: "must name a program when kind = \"command\"".to_string(),
            });
        }
        // Scratch copies are named by archive stem and deleted after reading.
        if self.merge.work_dir == self.merge.source_dir {
            return Err(ConfigError::Invalid {
                key: "merge.work_dir",
                reason: format!(
                    "{} is also merge.source_dir; scratch files would replace archives",
                    self.merge.work_dir.display()
                ),
            });
        }
        Ok(())
    }

    fn expand_home(&mut self) {
        // An empty string disables the local copy.
        if let Some(local) = self.archiver.local_log.take() {
            if !local.as_os_str().is_empty() {
                self.archiver.local_log = Some(expand_tilde(&local));
            }
        }
    }
}

/// Expand a leading `~/` against the home directory, if one is known.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest))
}

fn default_source_log() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/access.log")
}

fn default_position_file() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/last_archived_position.txt")
}

fn default_buffer_file() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/temp_hourly_archive.log")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/archives")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/hourlog.lock")
}

fn default_local_log() -> Option<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    Some(home.join("archiver.log"))
}

fn default_merge_work_dir() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/mergelog/logs")
}

fn default_merge_output() -> PathBuf {
    PathBuf::from("/usr/local/x-ui/mergelog/merged_access.log")
}

fn default_install_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/hourlog")
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_compress_program() -> String {
    "gzip".to_string()
}

const fn default_compress_level() -> u32 {
    6
}

const fn default_interval_minutes() -> u32 {
    10
}
