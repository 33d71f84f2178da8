//! Crontab installation, removal and status for the scheduled run.
//!
//! The managed entry is the single crontab line mentioning the install path:
//! `*/<interval> * * * * <install_path> [--config <file>] --cron`, where
//! `<file>` is the config the installing invocation loaded. Table edits are pure
//! functions over the crontab text; only [`Crontab`] touches the system.

use std::env;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context as _, Result};
use clap::Subcommand;
use hourlog_core::ErrorCode;
use hourlog_core::config::Config;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Overrides the `crontab` program, e.g. for tests.
pub const CRONTAB_ENV: &str = "HOURLOG_CRONTAB";

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleCommand {
    #[command(
        about = "Install the binary and its crontab entry",
        after_help = "EXAMPLES:\n    # Copy hourlog to the install path and run it every 10 minutes\n    sudo hourlog schedule install"
    )]
    Install,
    #[command(about = "Remove the crontab entry")]
    Remove,
    #[command(about = "Show the crontab entry and state files")]
    Status,
}

#[derive(Debug, thiserror::Error)]
pub enum CrontabError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program} {args}` failed: {stderr}")]
    Failed {
        program: String,
        args: String,
        stderr: String,
    },
}

impl CrontabError {
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ScheduleUpdateFailed
    }
}

/// The system crontab of the current user.
#[derive(Debug, Clone)]
pub struct Crontab {
    program: String,
}

impl Crontab {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `crontab`, or the program named by `HOURLOG_CRONTAB`.
    pub fn from_env() -> Self {
        let program = env::var(CRONTAB_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "crontab".to_string());
        Self::new(program)
    }

    /// Current table; a user without a crontab has an empty one.
    pub fn read(&self) -> Result<String, CrontabError> {
        let output = Command::new(&self.program)
            .arg("-l")
            .output()
            .map_err(|source| self.spawn_error(source))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            return Ok(String::new());
        }
        Err(CrontabError::Failed {
            program: self.program.clone(),
            args: "-l".to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    /// Replace the table with `table`, fed on stdin.
    pub fn write(&self, table: &str) -> Result<(), CrontabError> {
        let mut child = Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(table.as_bytes())
                .map_err(|source| self.spawn_error(source))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|source| self.spawn_error(source))?;
        if output.status.success() {
            return Ok(());
        }
        Err(CrontabError::Failed {
            program: self.program.clone(),
            args: "-".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn spawn_error(&self, source: std::io::Error) -> CrontabError {
        CrontabError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure table edits
// ---------------------------------------------------------------------------

pub fn cron_entry(
    install_path: &Path,
    config_file: Option<&Path>,
    interval_minutes: u32,
) -> String {
    let mut command = shell_word(install_path);
    if let Some(file) = config_file {
        command.push_str(" --config ");
        command.push_str(&shell_word(file));
    }
    format!("*/{interval_minutes} * * * * {command} --cron")
}

/// A path as one `/bin/sh` word, single-quoted only when it needs to be.
/// `%` is escaped because cron turns a bare one into a newline.
fn shell_word(path: &Path) -> String {
    let text = path.display().to_string();
    let plain = text.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ',' | ':' | '@' | '%')
    });
    let word = if plain {
        text
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    };
    word.replace('%', r"\%")
}

/// The first line that mentions `install_path`.
pub fn find_entry<'a>(table: &'a str, install_path: &Path) -> Option<&'a str> {
    let needle = install_path.display().to_string();
    table.lines().find(|line| line.contains(&needle))
}

/// `table` plus `entry`, or `None` when an entry for `install_path` exists.
pub fn with_entry(table: &str, install_path: &Path, entry: &str) -> Option<String> {
    if find_entry(table, install_path).is_some() {
        return None;
    }
    let mut updated = table.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    Some(updated)
}

/// `table` without any line mentioning `install_path`, and how many went.
pub fn without_entries(table: &str, install_path: &Path) -> (String, usize) {
    let needle = install_path.display().to_string();
    let mut removed = 0;
    let mut kept = String::with_capacity(table.len());
    for line in table.lines() {
        if line.contains(&needle) {
            removed += 1;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    (kept, removed)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct InstallReport {
    pub install_path: PathBuf,
    pub copied: bool,
    pub created: Vec<PathBuf>,
    pub entry: String,
    pub entry_added: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveReport {
    pub install_path: PathBuf,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub install_path: PathBuf,
    pub entry: Option<String>,
    pub archive_dir: PathBuf,
    pub archive_dir_exists: bool,
    pub position_file: PathBuf,
    pub position_file_exists: bool,
}

pub fn run_schedule(
    command: ScheduleCommand,
    config: &Config,
    crontab: &Crontab,
    output: OutputMode,
) -> Result<()> {
    match command {
        ScheduleCommand::Install => {
            let report = install(config, crontab)?;
            render_mode(
                output,
                &report,
                |r, w| {
                    writeln!(
                        w,
                        "install path={} copied={} entry_added={} created={}",
                        r.install_path.display(),
                        r.copied,
                        r.entry_added,
                        r.created.len()
                    )
                },
                |r, w| {
                    pretty_section(w, "Schedule installed")?;
                    pretty_kv(w, "binary", r.install_path.display().to_string())?;
                    pretty_kv(w, "copied", yes_no(r.copied))?;
                    for path in &r.created {
                        pretty_kv(w, "created", path.display().to_string())?;
                    }
                    let note = if r.entry_added { "" } else { " (already present)" };
                    pretty_kv(w, "crontab", format!("{}{note}", r.entry))
                },
            )
        }
        ScheduleCommand::Remove => {
            let report = remove(config, crontab)?;
            render_mode(
                output,
                &report,
                |r, w| writeln!(w, "remove path={} removed={}", r.install_path.display(), r.removed),
                |r, w| {
                    pretty_section(w, "Schedule removed")?;
                    pretty_kv(w, "binary", r.install_path.display().to_string())?;
                    if r.removed == 0 {
                        pretty_kv(w, "crontab", "no entry found")
                    } else {
                        pretty_kv(w, "crontab", format!("{} line(s) removed", r.removed))
                    }
                },
            )
        }
        ScheduleCommand::Status => {
            let report = status(config, crontab)?;
            render_mode(
                output,
                &report,
                |r, w| {
                    writeln!(
                        w,
                        "status active={} archive_dir={} position_file={}",
                        r.entry.is_some(),
                        r.archive_dir_exists,
                        r.position_file_exists
                    )
                },
                |r, w| {
                    pretty_section(w, "Schedule status")?;
                    pretty_kv(w, "crontab", r.entry.as_deref().unwrap_or("not installed"))?;
                    pretty_kv(
                        w,
                        "archive dir",
                        format!("{} ({})", r.archive_dir.display(), exists(r.archive_dir_exists)),
                    )?;
                    pretty_kv(
                        w,
                        "position file",
                        format!(
                            "{} ({})",
                            r.position_file.display(),
                            exists(r.position_file_exists)
                        ),
                    )
                },
            )
        }
    }
}

pub fn install(config: &Config, crontab: &Crontab) -> Result<InstallReport> {
    let install_path = &config.schedule.install_path;
    let copied = copy_self(install_path)?;
    let created = prepare_state_files(config)?;

    let entry = cron_entry(
        install_path,
        config.source.as_deref(),
        config.schedule.interval_minutes,
    );
    let table = crontab.read()?;
    let entry_added = match with_entry(&table, install_path, &entry) {
        Some(updated) => {
            crontab.write(&updated)?;
            tracing::info!(entry = %entry, "crontab entry added");
            true
        }
        None => {
            tracing::info!(path = %install_path.display(), "crontab entry already present");
            false
        }
    };

    Ok(InstallReport {
        install_path: install_path.clone(),
        copied,
        created,
        entry,
        entry_added,
    })
}

pub fn remove(config: &Config, crontab: &Crontab) -> Result<RemoveReport> {
    let install_path = &config.schedule.install_path;
    let table = crontab.read()?;
    let (updated, removed) = without_entries(&table, install_path);
    if removed > 0 {
        crontab.write(&updated)?;
        tracing::info!(removed, "crontab entries removed");
    }
    Ok(RemoveReport {
        install_path: install_path.clone(),
        removed,
    })
}

pub fn status(config: &Config, crontab: &Crontab) -> Result<StatusReport> {
    let install_path = &config.schedule.install_path;
    let table = crontab.read()?;
    Ok(StatusReport {
        install_path: install_path.clone(),
        entry: find_entry(&table, install_path).map(str::to_string),
        archive_dir: config.archiver.archive_dir.clone(),
        archive_dir_exists: config.archiver.archive_dir.is_dir(),
        position_file: config.archiver.position_file.clone(),
        position_file_exists: config.archiver.position_file.is_file(),
    })
}

/// Copy the running executable to `target` unless it already runs from there.
fn copy_self(target: &Path) -> Result<bool> {
    let current = env::current_exe().context("Failed to locate the running executable")?;
    if same_file(&current, target) {
        return Ok(false);
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(&current, target).with_context(|| {
        format!("Failed to copy {} to {}", current.display(), target.display())
    })?;
    make_executable(target)
        .with_context(|| format!("Failed to make {} executable", target.display()))?;
    Ok(true)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perm = fs::metadata(path)?.permissions();
        perm.set_mode(0o755);
        fs::set_permissions(path, perm)?;
    }
    Ok(())
}

/// Archive directory, a position file holding `0` and an empty buffer, each
/// only if absent. Returns what was created.
fn prepare_state_files(config: &Config) -> Result<Vec<PathBuf>> {
    let archiver = &config.archiver;
    let mut created = Vec::new();

    if !archiver.archive_dir.is_dir() {
        fs::create_dir_all(&archiver.archive_dir)
            .with_context(|| format!("Failed to create {}", archiver.archive_dir.display()))?;
        created.push(archiver.archive_dir.clone());
    }

    for (path, initial) in [(&archiver.position_file, "0"), (&archiver.buffer_file, "")] {
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, initial).with_context(|| format!("Failed to create {}", path.display()))?;
        created.push(path.clone());
    }

    Ok(created)
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

const fn exists(flag: bool) -> &'static str {
    if flag { "exists" } else { "missing" }
}
