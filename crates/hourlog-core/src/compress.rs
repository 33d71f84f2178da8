//! Compression providers used after a rollover.
//!
//! Every provider follows gzip's contract: `compress(path)` leaves
//! `<path>.gz` behind and removes `<path>`. On failure the source file must
//! still exist, so the archive survives uncompressed.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::{CompressionConfig, CompressionKind};
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("failed to start `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("compressed output {path} was not produced")]
    MissingOutput { path: PathBuf },

    #[error("failed compressing {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl CompressError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::CompressionFailed
    }
}

pub trait Compressor {
    /// Compress `path` into `<path>.gz`, removing `path` on success.
    ///
    /// # Errors
    ///
    /// Returns [`CompressError`] if the compressed file could not be
    /// produced. The source file is left in place.
    fn compress(&self, path: &Path) -> Result<PathBuf, CompressError>;
}

impl<C: Compressor + ?Sized> Compressor for Box<C> {
    fn compress(&self, path: &Path) -> Result<PathBuf, CompressError> {
        (**self).compress(path)
    }
}

/// `<path>.gz`, keeping the full original file name.
#[must_use]
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".gz");
    path.with_file_name(name)
}

/// Build the provider selected in `[archiver.compression]`.
#[must_use]
pub fn from_config(config: &CompressionConfig) -> Box<dyn Compressor> {
    match config.kind {
        CompressionKind::Command => Box::new(CommandCompressor::new(&config.program)),
        CompressionKind::Builtin => Box::new(GzipCompressor::new(config.level)),
    }
}

/// Shells out to a gzip-compatible program, e.g. `gzip <path>`.
#[derive(Debug, Clone)]
pub struct CommandCompressor {
    program: String,
}

impl CommandCompressor {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandCompressor {
    fn default() -> Self {
        Self::new("gzip")
    }
}

impl Compressor for CommandCompressor {
    fn compress(&self, path: &Path) -> Result<PathBuf, CompressError> {
        let output = Command::new(&self.program)
            .arg(path)
            .output()
            .map_err(|source| CompressError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CompressError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let target = gz_path(path);
        if !target.exists() {
            return Err(CompressError::MissingOutput { path: target });
        }
        Ok(target)
    }
}

/// In-process gzip encoder.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    fn encode(&self, source: &Path, partial: &Path) -> io::Result<()> {
        let mut reader = BufReader::new(File::open(source)?);
        let writer = BufWriter::new(File::create(partial)?);
        let mut encoder = GzEncoder::new(writer, Compression::new(self.level));
        io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, path: &Path) -> Result<PathBuf, CompressError> {
        let target = gz_path(path);
        let mut partial_name = target.as_os_str().to_os_string();
        partial_name.push(OsString::from(".partial"));
        let partial = PathBuf::from(partial_name);

        let staged = self
            .encode(path, &partial)
            .and_then(|()| fs::rename(&partial, &target));
        if let Err(source) = staged {
            let _ = fs::remove_file(&partial);
            return Err(CompressError::Io {
                path: path.to_path_buf(),
                source,
            });
        }

        // The compressed copy is complete; a leftover source only costs disk.
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!(
                path = %path.display(),
                "compressed archive written but source not removed: {err}"
            );
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn gunzip(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(File::open(path).expect("open gz"))
            .read_to_end(&mut out)
            .expect("decode gz");
        out
    }

    #[test]
    fn gz_path_appends_suffix() {
        assert_eq!(
            gz_path(Path::new("/a/access_20261017_140000.log")),
            PathBuf::from("/a/access_20261017_140000.log.gz")
        );
    }

    #[test]
    fn builtin_replaces_source_with_gzip() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("access_20261017_140000.log");
        fs::write(&source, b"line one\nline two\n").expect("write");

        let out = GzipCompressor::default().compress(&source).expect("compress");

        assert_eq!(out, gz_path(&source));
        assert!(!source.exists());
        assert_eq!(gunzip(&out), b"line one\nline two\n");
        assert!(!tmp.path().join("access_20261017_140000.log.gz.partial").exists());
    }

    #[test]
    fn builtin_failure_keeps_source_and_no_partial() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("absent.log");

        let err = GzipCompressor::new(1).compress(&missing).expect_err("missing source");

        assert!(matches!(err, CompressError::Io { .. }));
        assert_eq!(err.code(), ErrorCode::CompressionFailed);
        assert!(!tmp.path().join("absent.log.gz.partial").exists());
        assert!(!tmp.path().join("absent.log.gz").exists());
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(GzipCompressor::new(42).level, 9);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("a.log");
        fs::write(&source, b"x\n").expect("write");

        let err = CommandCompressor::new("hourlog-no-such-compressor")
            .compress(&source)
            .expect_err("program missing");

        assert!(matches!(err, CompressError::Spawn { .. }));
        assert!(source.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_status() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("a.log");
        fs::write(&source, b"x\n").expect("write");

        let err = CommandCompressor::new("false")
            .compress(&source)
            .expect_err("false exits 1");

        assert!(matches!(err, CompressError::Failed { .. }));
        assert!(source.exists());
    }

    #[cfg(unix)]
    #[test]
    fn program_that_produces_nothing_is_missing_output() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("a.log");
        fs::write(&source, b"x\n").expect("write");

        let err = CommandCompressor::new("true")
            .compress(&source)
            .expect_err("true writes nothing");

        assert!(matches!(err, CompressError::MissingOutput { .. }));
    }

    #[test]
    fn boxed_provider_delegates() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("b.log");
        fs::write(&source, b"boxed\n").expect("write");

        let provider = from_config(&CompressionConfig {
            kind: CompressionKind::Builtin,
            ..CompressionConfig::default()
        });
        let out = provider.compress(&source).expect("compress");

        assert_eq!(gunzip(&out), b"boxed\n");
    }
}
