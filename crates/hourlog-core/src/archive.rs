//! Hourly rollover of the accumulator buffer into timestamped archives.
//!
//! Evaluated once per run, after extraction. On the rollover minute a
//! non-empty buffer is renamed to `access_<YYYYMMDD_HHMMSS>.log` in the
//! archive directory, the buffer path is recreated empty and the archive is
//! handed to a [`Compressor`]. The rename is the commit point: from then on
//! the hour's data lives in the archive, compressed or not.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

use crate::clock::minutes_until;
use crate::compress::{Compressor, gz_path};
use crate::config::ArchiverConfig;
use crate::error::ErrorCode;
use crate::oplog::OpLog;
use crate::timing::measure;

const ARCHIVE_PREFIX: &str = "access_";
const ARCHIVE_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to stat buffer {path}: {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("failed to move buffer {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

impl ArchiveError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CreateDir { .. } => ErrorCode::DirectoryCreateFailed,
            Self::Stat { .. } | Self::Rename { .. } => ErrorCode::BufferRenameFailed,
        }
    }
}

/// Result of one rollover evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Rollover {
    /// Not the rollover minute.
    NotDue { minutes_remaining: u32 },
    /// Rollover minute, but nothing accumulated this hour.
    EmptyBuffer,
    /// The buffer became an archive. `path` is the `.gz` when compression
    /// succeeded, the plain `.log` otherwise.
    Archived { path: PathBuf, compressed: bool },
    /// An archive with this timestamp already exists; the buffer was kept.
    Collision { path: PathBuf },
}

impl Rollover {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotDue { .. } => "not due",
            Self::EmptyBuffer => "empty buffer",
            Self::Archived { .. } => "archived",
            Self::Collision { .. } => "collision",
        }
    }
}

/// `access_<YYYYMMDD_HHMMSS>.log` for the given local time.
#[must_use]
pub fn archive_file_name(at: NaiveDateTime) -> String {
    format!("{ARCHIVE_PREFIX}{}.log", at.format(ARCHIVE_TIMESTAMP))
}

/// Whether `name` looks like an archive produced by rollover, compressed or
/// not. The operational log and scratch files never match.
#[must_use]
pub fn is_archive_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(ARCHIVE_PREFIX) else {
        return false;
    };
    let stem = rest
        .strip_suffix(".log.gz")
        .or_else(|| rest.strip_suffix(".log"));
    stem.is_some_and(|stem| !stem.is_empty())
}

/// Create `dir` and its parents.
///
/// # Errors
///
/// Returns [`ArchiveError::CreateDir`] on failure.
pub fn ensure_dir(dir: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(dir).map_err(|source| ArchiveError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct HourlyArchiver {
    buffer: PathBuf,
    archive_dir: PathBuf,
    rollover_minute: u32,
}

impl HourlyArchiver {
    #[must_use]
    pub fn new(buffer: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>, rollover_minute: u32) -> Self {
        Self {
            buffer: buffer.into(),
            archive_dir: archive_dir.into(),
            rollover_minute,
        }
    }

    #[must_use]
    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self::new(&config.buffer_file, &config.archive_dir, config.rollover_minute)
    }

    #[must_use]
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Run the rollover state machine for the instant `now`.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: the archive directory cannot be created, or the
    /// buffer cannot be stat'd or renamed. Name collisions and compression
    /// failures are logged and reported through [`Rollover`].
    pub fn evaluate(
        &self,
        now: NaiveDateTime,
        compressor: &dyn Compressor,
        oplog: &OpLog,
    ) -> Result<Rollover, ArchiveError> {
        if now.minute() != self.rollover_minute {
            let minutes_remaining = minutes_until(now, self.rollover_minute);
            oplog.info(&format!(
                "{minutes_remaining} minutes until the next hourly archive"
            ));
            return Ok(Rollover::NotDue { minutes_remaining });
        }

        ensure_dir(&self.archive_dir)?;

        let size = match fs::metadata(&self.buffer) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(ArchiveError::Stat {
                    path: self.buffer.clone(),
                    source,
                });
            }
        };

        if size == 0 {
            self.reset_buffer();
            oplog.info("No new log lines this hour, archive skipped");
            return Ok(Rollover::EmptyBuffer);
        }

        let archive = self.archive_dir.join(archive_file_name(now));
        if archive.exists() || gz_path(&archive).exists() {
            oplog.warn(&format!(
                "[{}] Archive {} already exists, keeping buffer for the next rollover",
                ErrorCode::ArchiveNameCollision.code(),
                archive.display()
            ));
            return Ok(Rollover::Collision { path: archive });
        }

        let (renamed, move_elapsed) = measure("rollover.move", || fs::rename(&self.buffer, &archive));
        renamed.map_err(|source| ArchiveError::Rename {
            from: self.buffer.clone(),
            to: archive.clone(),
            source,
        })?;
        oplog.perf("MOVE", move_elapsed, &format!("moved buffer of {size} bytes"));
        self.reset_buffer();

        let (compressed, compress_elapsed) =
            measure("rollover.compress", || compressor.compress(&archive));
        match compressed {
            Ok(gz) => {
                oplog.info(&format!("Archived hourly log to {}", gz.display()));
                oplog.perf(
                    "COMPRESS",
                    compress_elapsed,
                    &format!("compressed archive of {size} bytes"),
                );
                Ok(Rollover::Archived {
                    path: gz,
                    compressed: true,
                })
            }
            Err(err) => {
                oplog.error(&format!(
                    "[{}] Compression of {} failed, kept uncompressed: {err}",
                    err.code().code(),
                    archive.display()
                ));
                Ok(Rollover::Archived {
                    path: archive,
                    compressed: false,
                })
            }
        }
    }

    /// Recreate the buffer path as an empty file. Extraction recreates it on
    /// demand, so a failure here is only logged.
    fn reset_buffer(&self) {
        if let Err(err) = File::create(&self.buffer) {
            tracing::warn!(buffer = %self.buffer.display(), "failed to reset buffer: {err}");
        }
    }
}
