//! Merge-dedup: the sorted, deduplicated union of every archived line.
//!
//! Each `*.gz` file in the source directory is decompressed into a
//! scratch file under the work directory, read, and the scratch file is
//! removed. Lines are compared as raw bytes after trailing whitespace is
//! trimmed; blank lines are dropped. The output is rewritten from scratch on
//! every run, so two runs over the same archives produce identical bytes.
//!
//! A broken archive only loses its own contribution. Listing the source
//! directory, creating the work directory and writing the output are fatal.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use serde::Serialize;

use crate::archive::is_archive_name;
use crate::config::MergeConfig;
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("failed to list archive directory {path}: {source}")]
    ListSource { path: PathBuf, source: io::Error },

    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write merged output {path}: {source}")]
    Output { path: PathBuf, source: io::Error },
}

impl MergeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ListSource { .. } => ErrorCode::MergeSourceUnreadable,
            Self::CreateDir { .. } => ErrorCode::DirectoryCreateFailed,
            Self::Output { .. } => ErrorCode::MergeOutputFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedArchive {
    pub name: String,
    pub error_code: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub archives_found: usize,
    pub archives_merged: usize,
    pub skipped: Vec<SkippedArchive>,
    /// Non-blank lines read across all merged archives, duplicates included.
    pub lines_read: u64,
    pub unique_lines: usize,
    pub output_file: PathBuf,
    /// Scratch files that could not be removed.
    pub cleanup_failures: usize,
}

#[derive(Debug, Clone)]
pub struct MergeTool {
    source_dir: PathBuf,
    work_dir: PathBuf,
    output_file: PathBuf,
    include_uncompressed: bool,
}

impl MergeTool {
    #[must_use]
    pub fn new(
        source_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            work_dir: work_dir.into(),
            output_file: output_file.into(),
            include_uncompressed: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &MergeConfig) -> Self {
        Self::new(&config.source_dir, &config.work_dir, &config.output_file)
            .include_uncompressed(config.include_uncompressed)
    }

    /// Also read plain `access_*.log` archives left by a failed compression.
    #[must_use]
    pub const fn include_uncompressed(mut self, include: bool) -> Self {
        self.include_uncompressed = include;
        self
    }

    #[must_use]
    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Merge every archive into the output file.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError`] if the source directory cannot be listed, the
    /// work directory cannot be created, or the output cannot be written.
    pub fn run(&self) -> Result<MergeReport, MergeError> {
        let archives = self.list_archives()?;
        tracing::info!(
            count = archives.len(),
            source_dir = %self.source_dir.display(),
            "merging archives"
        );

        fs::create_dir_all(&self.work_dir).map_err(|source| MergeError::CreateDir {
            path: self.work_dir.clone(),
            source,
        })?;

        let mut lines = BTreeSet::new();
        let mut report = MergeReport {
            archives_found: archives.len(),
            archives_merged: 0,
            skipped: Vec::new(),
            lines_read: 0,
            unique_lines: 0,
            output_file: self.output_file.clone(),
            cleanup_failures: 0,
        };

        for name in &archives {
            match self.read_archive(name, &mut report.cleanup_failures) {
                Ok(contribution) => {
                    report.archives_merged += 1;
                    report.lines_read += contribution.len() as u64;
                    lines.extend(contribution);
                }
                Err(err) => {
                    let code = ErrorCode::ArchiveUnreadable.code();
                    tracing::warn!(archive = %name, code, "skipping unreadable archive: {err}");
                    report.skipped.push(SkippedArchive {
                        name: name.clone(),
                        error_code: code,
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.write_output(&lines)?;
        report.unique_lines = lines.len();

        tracing::info!(
            merged = report.archives_merged,
            skipped = report.skipped.len(),
            unique_lines = report.unique_lines,
            output = %self.output_file.display(),
            "merge complete"
        );
        Ok(report)
    }

    /// Every `*.gz` in the source directory, plus plain `access_*.log`
    /// archives when opted in, sorted by name.
    fn list_archives(&self) -> Result<Vec<String>, MergeError> {
        let list_err = |source| MergeError::ListSource {
            path: self.source_dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.source_dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_gzip_name(&name) || (self.include_uncompressed && is_archive_name(&name)) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// All non-blank, right-trimmed lines of one archive.
    fn read_archive(&self, name: &str, cleanup_failures: &mut usize) -> io::Result<Vec<Vec<u8>>> {
        let source = self.source_dir.join(name);
        let Some(stem) = name.strip_suffix(".gz") else {
            return read_lines(&source);
        };

        let scratch = self.work_dir.join(stem);
        let result = decompress(&source, &scratch).and_then(|()| read_lines(&scratch));
        if let Err(err) = fs::remove_file(&scratch) {
            if err.kind() != io::ErrorKind::NotFound {
                *cleanup_failures += 1;
                tracing::warn!(scratch = %scratch.display(), "failed to remove scratch copy: {err}");
            }
        }
        result
    }

    fn write_output(&self, lines: &BTreeSet<Vec<u8>>) -> Result<(), MergeError> {
        let out_err = |source| MergeError::Output {
            path: self.output_file.clone(),
            source,
        };

        if let Some(parent) = self.output_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| MergeError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut writer = BufWriter::new(File::create(&self.output_file).map_err(out_err)?);
        for line in lines {
            writer.write_all(line).map_err(out_err)?;
            writer.write_all(b"\n").map_err(out_err)?;
        }
        writer.flush().map_err(out_err)?;
        Ok(())
    }
}

/// Any `<stem>.gz` with a non-empty stem, whatever produced it.
fn is_gzip_name(name: &str) -> bool {
    name.strip_suffix(".gz").is_some_and(|stem| !stem.is_empty())
}

fn decompress(source: &Path, scratch: &Path) -> io::Result<()> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(source)?));
    let mut out = BufWriter::new(File::create(scratch)?);
    io::copy(&mut decoder, &mut out)?;
    out.flush()
}

fn read_lines(path: &Path) -> io::Result<Vec<Vec<u8>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.split(b'\n') {
        let mut line = line?;
        let kept = line.trim_ascii_end().len();
        line.truncate(kept);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}
