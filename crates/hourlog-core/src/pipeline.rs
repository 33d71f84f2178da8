//! One scheduled pass: extract new source bytes, then evaluate rollover.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

use crate::archive::{ArchiveError, HourlyArchiver, Rollover, ensure_dir};
use crate::clock::Clock;
use crate::compress::Compressor;
use crate::config::ArchiverConfig;
use crate::error::ErrorCode;
use crate::extract::{ExtractError, Extractor};
use crate::lock::{LockError, RunLock};
use crate::oplog::OpLog;
use crate::position::PositionStore;
use crate::timing::measure;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl RunError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lock(err) => err.code(),
            Self::Extract(err) => err.code(),
            Self::Archive(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Wall-clock instant that drove the rollover decision.
    pub at: NaiveDateTime,
    pub offset_before: u64,
    pub offset_after: u64,
    pub truncated: bool,
    pub bytes_extracted: u64,
    pub lines_extracted: u64,
    pub rollover: Rollover,
    #[serde(rename = "elapsed_us", serialize_with = "serialize_micros")]
    pub elapsed: Duration,
}

fn serialize_micros<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
}

/// Execute one archiver pass under the run lock.
///
/// The clock is sampled once, after the lock is held; that instant decides
/// whether rollover is due and names the archive.
///
/// # Errors
///
/// Returns [`RunError`] for fatal conditions: the archive directory cannot be
/// created, another run holds the lock, extraction fails, or the buffer
/// cannot be moved. Each is also written to the operational log.
pub fn run_once(
    config: &ArchiverConfig,
    store: &dyn PositionStore,
    compressor: &dyn Compressor,
    clock: &dyn Clock,
    oplog: &OpLog,
) -> Result<RunReport, RunError> {
    let (result, elapsed) = measure("run", || run_locked(config, store, compressor, clock, oplog));

    match result {
        Ok(mut report) => {
            report.elapsed = elapsed;
            oplog.info(&format!(
                "Run finished in {}: source at {} bytes, {} new bytes",
                crate::timing::format_duration(elapsed),
                report.offset_after,
                report.bytes_extracted
            ));
            oplog.perf(
                "TOTAL_RUN",
                elapsed,
                &format!(
                    "processed {} bytes, {} new",
                    report.offset_after, report.bytes_extracted
                ),
            );
            Ok(report)
        }
        Err(err) => {
            oplog.error(&format!("Run failed [{}]: {err}", err.code()));
            Err(err)
        }
    }
}

fn run_locked(
    config: &ArchiverConfig,
    store: &dyn PositionStore,
    compressor: &dyn Compressor,
    clock: &dyn Clock,
    oplog: &OpLog,
) -> Result<RunReport, RunError> {
    ensure_dir(&config.archive_dir)?;
    let _lock = RunLock::acquire(&config.lock_file, config.lock_timeout())?;

    let at = clock.now();

    let extractor = Extractor::from_config(config);
    let (extracted, extract_elapsed) = measure("extract", || extractor.run(store));
    let extracted = extracted?;

    if extracted.truncated {
        oplog.info(&format!(
            "Source log was truncated ({} bytes before, {} now), starting over",
            extracted.saved_offset, extracted.new_offset
        ));
    }
    if extracted.has_new_data() {
        oplog.info(&format!(
            "Appended {} lines ({} bytes) to the hourly buffer",
            extracted.lines, extracted.bytes
        ));
        oplog.perf(
            "EXTRACT",
            extract_elapsed,
            &format!("{} lines from {} bytes", extracted.lines, extracted.bytes),
        );
    }

    let archiver = HourlyArchiver::from_config(config);
    let (rollover, rollover_elapsed) =
        measure("rollover", || archiver.evaluate(at, compressor, oplog));
    let rollover = rollover?;
    if matches!(rollover, Rollover::Archived { .. }) {
        oplog.perf("ROLLOVER", rollover_elapsed, "created hourly archive");
    }

    Ok(RunReport {
        at,
        offset_before: extracted.saved_offset,
        offset_after: extracted.new_offset,
        truncated: extracted.truncated,
        bytes_extracted: extracted.bytes,
        lines_extracted: extracted.lines,
        rollover,
        elapsed: Duration::ZERO,
    })
}
