//! E2E CLI tests covering:
//! - `hourlog run` extraction and hourly rollover with a pinned clock
//! - legacy `--cron` invocation
//! - error contract for a missing source log
//! - `hourlog merge` over compressed archives
//!
//! Each test runs the `hourlog` binary as a subprocess against a config file
//! whose paths all live in an isolated temp directory.

use assert_cmd::Command;
use flate2::Compression;
use flate2::write::GzEncoder;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

struct Site {
    dir: TempDir,
}

impl Site {
    fn new() -> Self {
        let site = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        let root = site.root().display().to_string();
        let config = format!(
            r#"[archiver]
source_log = '{root}/access.log'
position_file = '{root}/state/position'
buffer_file = '{root}/state/hourly.log'
archive_dir = '{root}/archive'
lock_file = '{root}/state/hourlog.lock'
local_log = ''
rollover_minute = 0

[archiver.compression]
kind = "builtin"

[merge]
source_dir = '{root}/archive'
work_dir = '{root}/merge-work'
output_file = '{root}/merged.log'

[schedule]
install_path = '{root}/bin/hourlog'
interval_minutes = 10
"#
        );
        fs::write(site.config_path(), config).expect("write config");
        site
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config_path(&self) -> PathBuf {
        self.root().join("config.toml")
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn append_source(&self, text: &str) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path("access.log"))
            .expect("open source");
        file.write_all(text.as_bytes()).expect("append source");
    }

    fn archives(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path("archive"))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with("access_"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn write_gz_archive(&self, name: &str, text: &str) {
        fs::create_dir_all(self.path("archive")).expect("archive dir");
        let file = fs::File::create(self.path("archive").join(name)).expect("create archive");
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes()).expect("compress");
        encoder.finish().expect("finish gzip");
    }
}

/// Build a Command targeting the hourlog binary, configured for `site`.
fn hourlog_cmd(site: &Site) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hourlog"));
    cmd.current_dir(site.root());
    cmd.env("HOURLOG_LOG", "off");
    cmd.env_remove("FORMAT");
    cmd.env_remove("HOURLOG_CONFIG");
    cmd.arg("--config").arg(site.config_path());
    cmd
}

/// Run `hourlog run --at <at> --format json` and parse the report.
fn run_json(site: &Site, at: &str) -> Value {
    let output = hourlog_cmd(site)
        .args(["run", "--at", at, "--format", "json"])
        .output()
        .expect("run should not crash");
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("run --format json should produce valid JSON")
}

// ---------------------------------------------------------------------------
// hourlog run
// ---------------------------------------------------------------------------

#[test]
fn run_off_the_hour_extracts_into_the_buffer() {
    let site = Site::new();
    site.append_source("GET /a\nGET /b\n");

    let report = run_json(&site, "2026-10-17T13:20:00");

    assert_eq!(report["offset_before"], 0);
    assert_eq!(report["offset_after"], 14);
    assert_eq!(report["bytes_extracted"], 14);
    assert_eq!(report["lines_extracted"], 2);
    assert_eq!(report["truncated"], false);
    assert_eq!(report["rollover"]["state"], "not_due");
    assert_eq!(report["rollover"]["minutes_remaining"], 40);

    assert_eq!(
        fs::read_to_string(site.path("state/hourly.log")).expect("buffer"),
        "GET /a\nGET /b\n"
    );
    assert_eq!(
        fs::read_to_string(site.path("state/position")).expect("position").trim(),
        "14"
    );
    assert!(site.archives().is_empty());
}

#[test]
fn run_on_the_hour_archives_and_compresses() {
    let site = Site::new();
    site.append_source("GET /a\n");
    run_json(&site, "2026-10-17T13:50:00");
    site.append_source("GET /b\n");

    let report = run_json(&site, "2026-10-17T14:00:00");

    assert_eq!(report["offset_before"], 7);
    assert_eq!(report["bytes_extracted"], 7);
    assert_eq!(report["rollover"]["state"], "archived");
    assert_eq!(report["rollover"]["compressed"], true);

    assert_eq!(site.archives(), vec!["access_20261017_140000.log.gz".to_string()]);
    assert_eq!(
        fs::read(site.path("state/hourly.log")).expect("buffer").len(),
        0,
        "buffer is empty after rollover"
    );

    let oplog = fs::read_to_string(site.path("archive/archive.log")).expect("oplog");
    assert!(oplog.contains("Archived hourly log to"));
    assert!(!oplog.contains("[PERF]"), "perf lines only go to the local log");
}

#[test]
fn run_on_the_hour_with_nothing_buffered_skips_the_archive() {
    let site = Site::new();
    site.append_source("");

    let report = run_json(&site, "2026-10-17T09:00:00");

    assert_eq!(report["rollover"]["state"], "empty_buffer");
    assert!(site.archives().is_empty());
}

#[test]
fn run_text_output_is_one_line() {
    let site = Site::new();
    site.append_source("x\n");

    hourlog_cmd(&site)
        .args(["run", "--at", "2026-10-17T10:05:00", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("run offset=0->2 bytes=2 lines=1"))
        .stdout(predicate::str::contains("rollover=in 55 min"));
}

#[test]
fn legacy_cron_flag_runs_the_archiver() {
    let site = Site::new();
    site.append_source("GET /cron\n");

    hourlog_cmd(&site)
        .args(["--cron", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("run offset=0->10"));

    assert_eq!(
        fs::read_to_string(site.path("state/position")).expect("position").trim(),
        "10"
    );
}

#[test]
fn missing_source_log_fails_with_code() {
    let site = Site::new();

    let output = hourlog_cmd(&site)
        .args(["run", "--at", "2026-10-17T13:20:00", "--format", "json"])
        .output()
        .expect("run should not crash");

    assert!(!output.status.success());
    let err: Value =
        serde_json::from_slice(&output.stderr).expect("error output should be JSON");
    assert_eq!(err["error"]["error_code"], "E2001");
    assert!(
        err["error"]["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("archiver run failed"))
    );
    assert!(!site.path("state/position").exists());
}

#[test]
fn invalid_config_fails_with_config_code() {
    let site = Site::new();
    fs::write(site.config_path(), "[archiver]\nrollover_minute = 75\n").expect("write config");

    hourlog_cmd(&site)
        .args(["run", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"))
        .stderr(predicate::str::contains("rollover_minute"));
}

// ---------------------------------------------------------------------------
// hourlog merge
// ---------------------------------------------------------------------------

#[test]
fn merge_writes_sorted_unique_lines() {
    let site = Site::new();
    site.write_gz_archive("access_20261017_130000.log.gz", "c\na\n");
    site.write_gz_archive("access_20261017_140000.log.gz", "b\na\n");

    let output = hourlog_cmd(&site)
        .args(["merge", "--format", "json"])
        .output()
        .expect("merge should not crash");
    assert!(
        output.status.success(),
        "merge failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["archives_found"], 2);
    assert_eq!(report["archives_merged"], 2);
    assert_eq!(report["lines_read"], 4);
    assert_eq!(report["unique_lines"], 3);

    assert_eq!(
        fs::read_to_string(site.path("merged.log")).expect("merged"),
        "a\nb\nc\n"
    );
}

#[test]
fn merge_after_archiving_sees_the_archived_lines() {
    let site = Site::new();
    site.append_source("GET /z\nGET /y\n");
    run_json(&site, "2026-10-17T13:30:00");
    run_json(&site, "2026-10-17T14:00:00");

    hourlog_cmd(&site)
        .args(["merge", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("merge archives=1 merged=1"));

    assert_eq!(
        fs::read_to_string(site.path("merged.log")).expect("merged"),
        "GET /y\nGET /z\n"
    );
}

#[test]
fn merge_with_missing_archive_dir_fails_with_code() {
    let site = Site::new();

    let output = hourlog_cmd(&site)
        .args(["merge", "--format", "json"])
        .output()
        .expect("merge should not crash");

    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error");
    assert_eq!(err["error"]["error_code"], "E4001");
}
