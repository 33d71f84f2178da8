//! Shared output layer for pretty/text/JSON parity across all commands.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / hidden `--json` flag
//! 2. `FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.
//!
//! Reports go to stdout; errors go to stderr.

use clap::ValueEnum;
use hourlog_core::ErrorCode;
use hourlog_core::config::ConfigError;
use hourlog_core::lock::LockError;
use hourlog_core::merge::MergeError;
use hourlog_core::pipeline::RunError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use crate::cmd::schedule::CrontabError;

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 60;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, aligned key/value lines).
    Pretty,
    /// One terse `key=value` line per result, for logs and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Core resolution logic, separated from I/O for testability.
fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment, and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value to `out` with explicit pretty/text renderers.
pub fn render_mode_to<T: Serialize>(
    out: &mut dyn Write,
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, out)?,
        OutputMode::Pretty => pretty_fn(value, out)?,
    }
    Ok(())
}

/// Render a serializable value to stdout.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_mode_to(&mut out, mode, value, text_fn, pretty_fn)
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable error code (e.g. "E2001").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    fn with_code(message: String, code: ErrorCode) -> Self {
        Self {
            message,
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }
}

impl From<&anyhow::Error> for CliError {
    /// Attach the machine code and hint of the first library error found in
    /// the chain.
    fn from(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        err.chain()
            .find_map(error_code_of)
            .map_or_else(|| Self::new(message.clone()), |code| Self::with_code(message.clone(), code))
    }
}

fn error_code_of(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorCode> {
    if let Some(err) = cause.downcast_ref::<RunError>() {
        return Some(err.code());
    }
    if let Some(err) = cause.downcast_ref::<MergeError>() {
        return Some(err.code());
    }
    if let Some(err) = cause.downcast_ref::<ConfigError>() {
        return Some(err.code());
    }
    if let Some(err) = cause.downcast_ref::<LockError>() {
        return Some(err.code());
    }
    cause.downcast_ref::<CrontabError>().map(CrontabError::code)
}

/// Render an error to `out` in the requested format.
pub fn render_error_to(out: &mut dyn Write, mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    render_error_to(&mut out, mode, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    // ── resolve_output_mode_inner ───────────────────────────────────────────

    #[test]
    fn resolve_format_flag_wins_over_json_and_env() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn resolve_json_flag_wins_over_env() {
        let mode = resolve_output_mode_inner(None, true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_case_insensitive() {
        let mode = resolve_output_mode_inner(None, false, Some("JSON"), false);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_unknown_falls_through_to_tty() {
        let mode_tty = resolve_output_mode_inner(None, false, Some("fancy"), true);
        assert_eq!(mode_tty, OutputMode::Pretty);
        let mode_pipe = resolve_output_mode_inner(None, false, Some("fancy"), false);
        assert_eq!(mode_pipe, OutputMode::Text);
    }

    #[test]
    fn resolve_default_depends_on_tty() {
        assert_eq!(resolve_output_mode_inner(None, false, None, true), OutputMode::Pretty);
        assert_eq!(resolve_output_mode_inner(None, false, None, false), OutputMode::Text);
    }

    // ── rendering ───────────────────────────────────────────────────────────

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
        count: u32,
    }

    fn render_sample(mode: OutputMode) -> String {
        let mut buf = Vec::new();
        render_mode_to(
            &mut buf,
            mode,
            &Sample {
                name: "merge",
                count: 3,
            },
            |s, w| writeln!(w, "name={} count={}", s.name, s.count),
            |s, w| {
                pretty_section(w, "Sample")?;
                pretty_kv(w, "name", s.name)?;
                pretty_kv(w, "count", s.count.to_string())
            },
        )
        .expect("render");
        String::from_utf8(buf).expect("utf-8")
    }

    #[test]
    fn render_mode_dispatches_per_mode() {
        assert_eq!(render_sample(OutputMode::Text), "name=merge count=3\n");

        let pretty = render_sample(OutputMode::Pretty);
        assert!(pretty.starts_with("Sample\n---"));
        assert!(pretty.contains("count:"));

        let json: serde_json::Value =
            serde_json::from_str(&render_sample(OutputMode::Json)).expect("json");
        assert_eq!(json["count"], 3);
    }

    // ── errors ──────────────────────────────────────────────────────────────

    #[test]
    fn lock_error_in_chain_gets_code_and_hint() {
        let lock = LockError::Timeout {
            path: PathBuf::from("/tmp/hourlog.lock"),
            waited: Duration::from_millis(10),
        };
        let err = anyhow::Error::new(RunError::from(lock)).context("archiver run failed");

        let cli = CliError::from(&err);

        assert_eq!(cli.error_code.as_deref(), Some("E5001"));
        assert!(cli.suggestion.is_some());
        assert!(cli.message.starts_with("archiver run failed: "));
    }

    #[test]
    fn plain_error_has_no_code() {
        let err = anyhow::anyhow!("something went wrong");
        let cli = CliError::from(&err);
        assert_eq!(cli.message, "something went wrong");
        assert!(cli.error_code.is_none());
        assert!(cli.suggestion.is_none());
    }

    #[test]
    fn error_renders_human_and_json() {
        let cli = CliError::with_code("source gone".to_string(), ErrorCode::SourceLogUnavailable);

        let mut human = Vec::new();
        render_error_to(&mut human, OutputMode::Text, &cli).expect("render");
        let human = String::from_utf8(human).expect("utf-8");
        assert!(human.starts_with("error[E2001]: source gone\n  suggestion: "));

        let mut json = Vec::new();
        render_error_to(&mut json, OutputMode::Json, &cli).expect("render");
        let json: serde_json::Value = serde_json::from_slice(&json).expect("json");
        assert_eq!(json["error"]["error_code"], "E2001");
        assert_eq!(json["error"]["message"], "source gone");
    }
}
