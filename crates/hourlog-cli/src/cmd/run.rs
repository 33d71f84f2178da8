use anyhow::{Context as _, Result};
use chrono::NaiveDateTime;
use clap::Args;
use hourlog_core::config::Config;
use hourlog_core::pipeline::{RunError, RunReport};
use hourlog_core::timing::format_duration;
use hourlog_core::{FilePositionStore, FixedClock, OpLog, Rollover, SystemClock, compress, run_once};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

const AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Arguments for `hourlog run`.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Pin the wall clock to a local time (YYYY-MM-DDTHH:MM:SS).
    #[arg(long, hide = true, value_parser = parse_at)]
    pub at: Option<NaiveDateTime>,
}

fn parse_at(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, AT_FORMAT)
        .map_err(|err| format!("expected YYYY-MM-DDTHH:MM:SS: {err}"))
}

/// One scheduled pass with the configured stores and compressor.
pub fn execute(config: &Config, at: Option<NaiveDateTime>) -> Result<RunReport, RunError> {
    let archiver = &config.archiver;
    let store = FilePositionStore::new(&archiver.position_file);
    let compressor = compress::from_config(&archiver.compression);
    let oplog = OpLog::for_archiver(archiver);

    match at {
        Some(at) => run_once(archiver, &store, compressor.as_ref(), &FixedClock::new(at), &oplog),
        None => run_once(archiver, &store, compressor.as_ref(), &SystemClock, &oplog),
    }
}

/// Execute `hourlog run` (also `--cron`).
pub fn run_run(args: &RunArgs, config: &Config, output: OutputMode) -> Result<()> {
    let report = execute(config, args.at).context("archiver run failed")?;
    render_report(output, &report)
}

pub fn render_report(output: OutputMode, report: &RunReport) -> Result<()> {
    render_mode(
        output,
        report,
        |r, w| {
            writeln!(
                w,
                "run offset={}->{} bytes={} lines={} truncated={} rollover={}",
                r.offset_before,
                r.offset_after,
                r.bytes_extracted,
                r.lines_extracted,
                r.truncated,
                rollover_summary(&r.rollover)
            )
        },
        |r, w| {
            pretty_section(w, "Archiver run")?;
            pretty_kv(w, "time", r.at.format("%Y-%m-%d %H:%M:%S").to_string())?;
            pretty_kv(w, "offset", format!("{} -> {}", r.offset_before, r.offset_after))?;
            pretty_kv(
                w,
                "new data",
                format!("{} bytes, {} lines", r.bytes_extracted, r.lines_extracted),
            )?;
            if r.truncated {
                pretty_kv(w, "source", "truncated, restarted from 0")?;
            }
            pretty_kv(w, "rollover", rollover_summary(&r.rollover))?;
            pretty_kv(w, "elapsed", format_duration(r.elapsed))
        },
    )
}

fn rollover_summary(rollover: &Rollover) -> String {
    match rollover {
        Rollover::NotDue { minutes_remaining } => format!("in {minutes_remaining} min"),
        Rollover::EmptyBuffer => "skipped (empty buffer)".to_string(),
        Rollover::Archived { path, compressed } => {
            let suffix = if *compressed { "" } else { " (uncompressed)" };
            format!("{}{suffix}", path.display())
        }
        Rollover::Collision { path } => format!("collision at {}, buffer kept", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn at_accepts_iso_local_time() {
        let parsed = parse_at("2026-10-17T14:00:00").expect("parse");
        assert_eq!(parsed.to_string(), "2026-10-17 14:00:00");
    }

    #[test]
    fn at_rejects_other_shapes() {
        assert!(parse_at("2026-10-17 14:00").is_err());
        assert!(parse_at("14:00").is_err());
    }

    #[test]
    fn rollover_summaries_are_terse() {
        assert_eq!(
            rollover_summary(&Rollover::NotDue {
                minutes_remaining: 20
            }),
            "in 20 min"
        );
        assert_eq!(
            rollover_summary(&Rollover::Archived {
                path: PathBuf::from("/a/access_1.log"),
                compressed: false
            }),
            "/a/access_1.log (uncompressed)"
        );
    }
}
