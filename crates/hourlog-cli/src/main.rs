#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use hourlog_core::config::Config;
use hourlog_core::timing;
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cmd::menu::MenuChoice;
use cmd::schedule::{Crontab, ScheduleCommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "hourlog: incremental access-log skimmer with hourly compressed archives",
    long_about = None
)]
struct Cli {
    /// Config file (default: $HOURLOG_CONFIG, then <config dir>/hourlog/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit command timing report to stderr.
    #[arg(long, global = true)]
    timing: bool,

    /// Output format.
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Alias for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Scheduled invocation; same as `hourlog run`.
    #[arg(long, hide = true)]
    cron: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Extract new log lines and roll over on the hour",
        long_about = "Copy everything appended to the source log since the last run into the \
                      hourly buffer. On the rollover minute, move the buffer into a timestamped \
                      archive and compress it.",
        after_help = "EXAMPLES:\n    # One scheduled pass\n    hourlog run\n\n    # Emit machine-readable output\n    hourlog run --format json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "Merge all archives into one sorted, deduplicated file",
        after_help = "EXAMPLES:\n    # Merge compressed archives\n    hourlog merge\n\n    # Include archives whose compression failed\n    hourlog merge --include-uncompressed"
    )]
    Merge(cmd::merge::MergeArgs),

    #[command(about = "Manage the crontab entry")]
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    #[command(about = "Interactive menu (default when no command is given)")]
    Menu,

    #[command(
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    hourlog completions bash > /etc/bash_completion.d/hourlog"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("HOURLOG_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "hourlog=debug,hourlog_core=debug,info"
        } else {
            "hourlog=info,hourlog_core=info,warn"
        })
    });

    let format = env::var("HOURLOG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn dispatch(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    let command = match cli.command {
        Some(command) => command,
        None if cli.cron => Commands::Run(cmd::run::RunArgs::default()),
        None => Commands::Menu,
    };

    if let Commands::Completions(args) = command {
        return timing::timed("cmd.completions", || {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        });
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match command {
        Commands::Run(args) => {
            timing::timed("cmd.run", || cmd::run::run_run(&args, &config, output))
        }
        Commands::Merge(args) => {
            timing::timed("cmd.merge", || cmd::merge::run_merge(&args, &config, output))
        }
        Commands::Schedule { command } => timing::timed("cmd.schedule", || {
            cmd::schedule::run_schedule(command, &config, &Crontab::from_env(), output)
        }),
        Commands::Menu => timing::timed("cmd.menu", || run_menu(&config, output)),
        Commands::Completions(_) => Ok(()),
    }
}

fn run_menu(config: &Config, output: OutputMode) -> anyhow::Result<()> {
    let crontab = Crontab::from_env();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    cmd::menu::run_menu(
        stdin.lock(),
        &mut stdout,
        config.schedule.interval_minutes,
        config.archiver.rollover_minute,
        |choice| match choice {
            MenuChoice::ArchiveNow => {
                cmd::run::run_run(&cmd::run::RunArgs::default(), config, output)
            }
            MenuChoice::InstallSchedule => {
                cmd::schedule::run_schedule(ScheduleCommand::Install, config, &crontab, output)
            }
            MenuChoice::RemoveSchedule => {
                cmd::schedule::run_schedule(ScheduleCommand::Remove, config, &crontab, output)
            }
            MenuChoice::ScheduleStatus => {
                cmd::schedule::run_schedule(ScheduleCommand::Status, config, &crontab, output)
            }
            MenuChoice::Exit => Ok(()),
        },
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let timing_enabled = cli.timing || timing::timing_enabled_from_env();
    timing::set_timing_enabled(timing_enabled);
    timing::clear_timings();

    let output = cli.output_mode();
    let result = dispatch(cli, output);

    if timing_enabled {
        let report = timing::collect_report();
        if report.is_empty() {
            eprintln!("timing report: no samples recorded");
        } else {
            eprintln!("timing report:");
            eprintln!("{}", report.display_table());
            eprintln!("timing report (json):");
            match serde_json::to_string_pretty(&report.to_json()) {
                Ok(json) => eprintln!("{json}"),
                Err(err) => tracing::warn!("failed to encode timing report: {err}"),
            }
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Err(render_err) = render_error(output, &CliError::from(&err)) {
                eprintln!("error: {err:#} ({render_err})");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_menu() {
        let cli = Cli::parse_from(["hourlog"]);
        assert!(cli.command.is_none());
        assert!(!cli.cron);
    }

    #[test]
    fn legacy_cron_flag_parses() {
        let cli = Cli::parse_from(["hourlog", "--cron"]);
        assert!(cli.cron);
        assert!(cli.command.is_none());
    }

    #[test]
    fn timing_flag_parses_before_and_after_subcommand() {
        let before = Cli::parse_from(["hourlog", "--timing", "merge"]);
        assert!(before.timing);
        let after = Cli::parse_from(["hourlog", "merge", "--timing"]);
        assert!(after.timing);
    }

    #[test]
    fn format_flag_is_global() {
        let cli = Cli::parse_from(["hourlog", "run", "--format", "json"]);
        assert_eq!(cli.format, Some(OutputMode::Json));
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn hidden_json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["hourlog", "--json", "schedule", "status"]);
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn config_flag_parsed() {
        let cli = Cli::parse_from(["hourlog", "--config", "/etc/hourlog.toml", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hourlog.toml")));
    }

    #[test]
    fn run_accepts_pinned_clock() {
        let cli = Cli::parse_from(["hourlog", "run", "--at", "2026-10-17T14:00:00"]);
        match cli.command {
            Some(Commands::Run(args)) => {
                assert_eq!(
                    args.at.map(|at| at.to_string()).as_deref(),
                    Some("2026-10-17 14:00:00")
                );
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn merge_flag_parsed() {
        let cli = Cli::parse_from(["hourlog", "merge", "--include-uncompressed"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Merge(cmd::merge::MergeArgs {
                include_uncompressed: true
            }))
        ));
    }

    #[test]
    fn schedule_subcommands_parse() {
        for (arg, expected) in [
            ("install", ScheduleCommand::Install),
            ("remove", ScheduleCommand::Remove),
            ("status", ScheduleCommand::Status),
        ] {
            let cli = Cli::parse_from(["hourlog", "schedule", arg]);
            match cli.command {
                Some(Commands::Schedule { command }) => assert_eq!(command, expected),
                other => panic!("expected schedule, got {other:?}"),
            }
        }
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["hourlog", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            }))
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
