use anyhow::{Context as _, Result};
use clap::Args;
use hourlog_core::MergeTool;
use hourlog_core::config::Config;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `hourlog merge`.
#[derive(Args, Debug, Default, Clone)]
pub struct MergeArgs {
    /// Also merge plain `access_*.log` archives left by failed compression.
    #[arg(long)]
    pub include_uncompressed: bool,
}

/// Execute `hourlog merge`.
pub fn run_merge(args: &MergeArgs, config: &Config, output: OutputMode) -> Result<()> {
    let mut merge = config.merge.clone();
    merge.include_uncompressed |= args.include_uncompressed;

    let report = MergeTool::from_config(&merge)
        .run()
        .context("merge failed")?;

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "merge archives={} merged={} skipped={} lines={} unique={} output={}",
                r.archives_found,
                r.archives_merged,
                r.skipped.len(),
                r.lines_read,
                r.unique_lines,
                r.output_file.display()
            )
        },
        |r, w| {
            pretty_section(w, "Merge")?;
            pretty_kv(
                w,
                "archives",
                format!("{} found, {} merged", r.archives_found, r.archives_merged),
            )?;
            for skipped in &r.skipped {
                pretty_kv(
                    w,
                    "skipped",
                    format!(
                        "{} [{}] ({})",
                        skipped.name, skipped.error_code, skipped.reason
                    ),
                )?;
            }
            pretty_kv(
                w,
                "lines",
                format!("{} read, {} unique", r.lines_read, r.unique_lines),
            )?;
            if r.cleanup_failures > 0 {
                pretty_kv(w, "cleanup", format!("{} scratch file(s) left", r.cleanup_failures))?;
            }
            pretty_kv(w, "output", r.output_file.display().to_string())
        },
    )
}
