//! Persisted read offset into the source log.
//!
//! The offset is a byte position. Loading never fails: a missing or
//! unparsable position file reads as offset 0 ("start of file").

use std::cell::Cell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;

/// Errors raised when persisting an offset.
#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("failed to write position file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

impl PositionError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::PositionWriteFailed
    }
}

/// Storage for the consumed-bytes cursor, read once per run and written once
/// after a successful extraction.
pub trait PositionStore {
    /// Persisted offset, or 0 when absent or corrupt.
    fn load(&self) -> u64;

    /// Replace the persisted offset.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError`] if the new value cannot be stored.
    fn save(&self, offset: u64) -> Result<(), PositionError>;
}

/// Single-integer text file, e.g. `/usr/local/x-ui/last_archived_position.txt`.
#[derive(Debug, Clone)]
pub struct FilePositionStore {
    path: PathBuf,
}

impl FilePositionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PositionStore for FilePositionStore {
    fn load(&self) -> u64 {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    "position file missing, starting from offset 0"
                );
                return 0;
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "position file unreadable ({err}), starting from offset 0"
                );
                return 0;
            }
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return 0;
        }
        trimmed.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!(
                path = %self.path.display(),
                value = trimmed,
                "position file is corrupt, starting from offset 0"
            );
            0
        })
    }

    /// Writes to a sibling `.tmp` file and renames it over the target, so a
    /// crash leaves either the old or the new value.
    fn save(&self, offset: u64) -> Result<(), PositionError> {
        let wrap = |source| PositionError::Write {
            path: self.path.clone(),
            source,
        };

        let staging = self.staging_path();
        let mut file = fs::File::create(&staging).map_err(wrap)?;
        file.write_all(offset.to_string().as_bytes()).map_err(wrap)?;
        file.sync_data().map_err(wrap)?;
        drop(file);
        fs::rename(&staging, &self.path).map_err(wrap)?;
        Ok(())
    }
}

/// In-memory stand-in used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    offset: Cell<Option<u64>>,
    saves: Cell<usize>,
}

impl MemoryPositionStore {
    #[must_use]
    pub fn with_offset(offset: u64) -> Self {
        Self {
            offset: Cell::new(Some(offset)),
            saves: Cell::new(0),
        }
    }

    /// The stored value, `None` if nothing was ever stored.
    #[must_use]
    pub fn stored(&self) -> Option<u64> {
        self.offset.get()
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.get()
    }
}

impl PositionStore for MemoryPositionStore {
    fn load(&self) -> u64 {
        self.offset.get().unwrap_or(0)
    }

    fn save(&self, offset: u64) -> Result<(), PositionError> {
        self.offset.set(Some(offset));
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}
