//! Durable operational narrative.
//!
//! Entries are appended as `YYYY-MM-DD HH:MM:SS [LEVEL]: message` to
//! `<archive_dir>/archive.log` and, when configured, to a local copy. Each
//! entry is mirrored as a `tracing` event. Writing an entry never fails the
//! caller.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use crate::config::ArchiverConfig;
use crate::timing::format_duration;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpLog {
    main: PathBuf,
    local: Option<PathBuf>,
}

impl OpLog {
    #[must_use]
    pub const fn new(main: PathBuf, local: Option<PathBuf>) -> Self {
        Self { main, local }
    }

    #[must_use]
    pub fn for_archiver(config: &ArchiverConfig) -> Self {
        Self::new(config.oplog_path(), config.local_log.clone())
    }

    #[must_use]
    pub fn main_path(&self) -> &Path {
        &self.main
    }

    pub fn info(&self, message: &str) {
        self.entry(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.entry(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.entry(Level::Error, message);
    }

    /// Append one narrative entry to both logs and mirror it to `tracing`.
    pub fn entry(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Warn => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }

        let line = format!(
            "{} [{}]: {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            level.as_str(),
            message
        );
        append_line(&self.main, &line);
        if let Some(local) = &self.local {
            append_line(local, &line);
        }
    }

    /// Append a `[PERF]` entry to the local log only.
    pub fn perf(&self, operation: &str, elapsed: Duration, details: &str) {
        tracing::debug!(operation, elapsed_us = elapsed.as_micros(), "{details}");
        let Some(local) = &self.local else {
            return;
        };
        let line = format!(
            "{} [PERF] {}: {} - {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            operation,
            format_duration(elapsed),
            details
        );
        append_line(local, &line);
    }
}

fn append_line(path: &Path, line: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));

    if let Err(err) = result {
        tracing::warn!(path = %path.display(), "failed to write operational log: {err}");
    }
}
