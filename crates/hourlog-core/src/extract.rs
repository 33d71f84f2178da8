//! Incremental, byte-exact extraction from the growing source log into the
//! hourly buffer.
//!
//! # Invariants
//!
//! - The buffer receives exactly the bytes `[start, size)` of the source, in
//!   order, with nothing added or removed. An unterminated tail line stays
//!   unterminated; its continuation arrives on the next run.
//! - The offset is persisted only after the bytes reached the buffer. If the
//!   copy or the save fails, the buffer is cut back to its pre-run length so
//!   the retry does not duplicate anything.
//! - A source smaller than the saved offset was truncated or rotated; the run
//!   starts over from byte 0.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ArchiverConfig;
use crate::error::ErrorCode;
use crate::position::{PositionError, PositionStore};

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The source log cannot be stat'd (usually missing).
    #[error("source log {path} unavailable: {source}")]
    SourceUnavailable { path: PathBuf, source: io::Error },

    #[error("failed reading source log {path}: {source}")]
    SourceRead { path: PathBuf, source: io::Error },

    /// The source ended before the span measured at stat time.
    #[error("source log {path} shrank during read: expected {expected} bytes, copied {copied}")]
    ShortRead {
        path: PathBuf,
        expected: u64,
        copied: u64,
    },

    #[error("failed writing buffer {path}: {source}")]
    BufferWrite { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Position(#[from] PositionError),
}

impl ExtractError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SourceUnavailable { .. } => ErrorCode::SourceLogUnavailable,
            Self::SourceRead { .. } | Self::ShortRead { .. } => ErrorCode::SourceReadFailed,
            Self::BufferWrite { .. } => ErrorCode::BufferWriteFailed,
            Self::Position(err) => err.code(),
        }
    }
}

/// What one extraction pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractOutcome {
    /// Offset loaded from the position store.
    pub saved_offset: u64,
    /// Where reading actually started (0 after truncation).
    pub start_offset: u64,
    /// Source size at stat time; the newly persisted offset.
    pub new_offset: u64,
    /// The source was smaller than the saved offset.
    pub truncated: bool,
    pub bytes: u64,
    /// Newline-terminated lines copied.
    pub lines: u64,
    /// The copied span ends in the middle of a line.
    pub partial_tail: bool,
}

impl ExtractOutcome {
    #[must_use]
    pub const fn has_new_data(&self) -> bool {
        self.bytes > 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SpanStats {
    bytes: u64,
    lines: u64,
    partial_tail: bool,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    source: PathBuf,
    buffer: PathBuf,
}

impl Extractor {
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, buffer: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            buffer: buffer.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self::new(&config.source_log, &config.buffer_file)
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn buffer(&self) -> &Path {
        &self.buffer
    }

    /// Copy everything appended since the saved offset into the buffer and
    /// persist the new offset.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::SourceUnavailable`] if the source cannot be stat'd.
    /// - [`ExtractError::SourceRead`] / [`ExtractError::ShortRead`] /
    ///   [`ExtractError::BufferWrite`] on copy failure; the offset is not
    ///   persisted and the buffer is restored.
    /// - [`ExtractError::Position`] if the offset cannot be saved; the buffer
    ///   is restored.
    pub fn run(&self, store: &dyn PositionStore) -> Result<ExtractOutcome, ExtractError> {
        let size = fs::metadata(&self.source)
            .map_err(|source| ExtractError::SourceUnavailable {
                path: self.source.clone(),
                source,
            })?
            .len();

        let saved_offset = store.load();
        let truncated = size < saved_offset;
        let start_offset = if truncated {
            tracing::info!(
                saved_offset,
                size,
                source = %self.source.display(),
                "source log shrank, starting over from byte 0"
            );
            0
        } else {
            saved_offset
        };

        let delta = size - start_offset;
        if delta == 0 {
            store.save(size)?;
            return Ok(ExtractOutcome {
                saved_offset,
                start_offset,
                new_offset: size,
                truncated,
                bytes: 0,
                lines: 0,
                partial_tail: false,
            });
        }

        let (stats, rollback_len) = self.append_span(start_offset, delta)?;

        if let Err(err) = store.save(size) {
            self.restore_buffer(rollback_len);
            return Err(err.into());
        }

        tracing::debug!(
            start_offset,
            new_offset = size,
            bytes = stats.bytes,
            lines = stats.lines,
            "extracted new source bytes"
        );

        Ok(ExtractOutcome {
            saved_offset,
            start_offset,
            new_offset: size,
            truncated,
            bytes: stats.bytes,
            lines: stats.lines,
            partial_tail: stats.partial_tail,
        })
    }

    /// Append `len` source bytes starting at `start`. Returns the copy stats
    /// and the buffer length before the append.
    fn append_span(&self, start: u64, len: u64) -> Result<(SpanStats, u64), ExtractError> {
        let read_err = |source| ExtractError::SourceRead {
            path: self.source.clone(),
            source,
        };
        let write_err = |source| ExtractError::BufferWrite {
            path: self.buffer.clone(),
            source,
        };

        let mut source = File::open(&self.source).map_err(read_err)?;
        source.seek(SeekFrom::Start(start)).map_err(read_err)?;

        let mut buffer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer)
            .map_err(write_err)?;
        let rollback_len = buffer.metadata().map_err(write_err)?.len();

        match self.copy_exact(&mut source.take(len), &mut buffer, len) {
            Ok(stats) => Ok((stats, rollback_len)),
            Err(err) => {
                if let Err(trunc_err) = buffer.set_len(rollback_len) {
                    tracing::error!(
                        buffer = %self.buffer.display(),
                        "failed to restore buffer after copy error: {trunc_err}"
                    );
                }
                Err(err)
            }
        }
    }

    fn copy_exact(
        &self,
        reader: &mut impl Read,
        buffer: &mut File,
        expected: u64,
    ) -> Result<SpanStats, ExtractError> {
        let mut chunk = vec![0_u8; COPY_CHUNK];
        let mut stats = SpanStats::default();
        let mut last_byte = None;

        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ExtractError::SourceRead {
                        path: self.source.clone(),
                        source,
                    });
                }
            };
            let data = &chunk[..read];
            buffer
                .write_all(data)
                .map_err(|source| ExtractError::BufferWrite {
                    path: self.buffer.clone(),
                    source,
                })?;
            stats.bytes += read as u64;
            stats.lines += data.iter().filter(|&&b| b == b'\n').count() as u64;
            last_byte = data.last().copied();
        }

        if stats.bytes < expected {
            return Err(ExtractError::ShortRead {
                path: self.source.clone(),
                expected,
                copied: stats.bytes,
            });
        }

        buffer
            .sync_data()
            .map_err(|source| ExtractError::BufferWrite {
                path: self.buffer.clone(),
                source,
            })?;

        stats.partial_tail = last_byte.is_some_and(|b| b != b'\n');
        Ok(stats)
    }

    fn restore_buffer(&self, len: u64) {
        let result = OpenOptions::new()
            .write(true)
            .open(&self.buffer)
            .and_then(|file| file.set_len(len));
        if let Err(err) = result {
            tracing::error!(
                buffer = %self.buffer.display(),
                "failed to restore buffer after position save error: {err}"
            );
        }
    }
}
