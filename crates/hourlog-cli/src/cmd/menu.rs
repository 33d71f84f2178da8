//! Interactive menu shown when `hourlog` runs without a subcommand.

use std::io::{self, BufRead, Write};

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ArchiveNow,
    InstallSchedule,
    RemoveSchedule,
    ScheduleStatus,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::ArchiveNow),
            "2" => Some(Self::InstallSchedule),
            "3" => Some(Self::RemoveSchedule),
            "4" => Some(Self::ScheduleStatus),
            "0" => Some(Self::Exit),
            _ => None,
        }
    }
}

fn print_menu(out: &mut dyn Write, interval_minutes: u32, rollover_minute: u32) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== hourlog ===")?;
    writeln!(out, "1. Archive now")?;
    writeln!(
        out,
        "2. Install schedule (every {interval_minutes} min, archive at minute {rollover_minute:02})"
    )?;
    writeln!(out, "3. Remove schedule")?;
    writeln!(out, "4. Show schedule status")?;
    writeln!(out, "0. Exit")?;
    write!(out, "\nChoose an action (0-4): ")?;
    out.flush()
}

/// Loop until `0` or end of input, dispatching each choice to `action`.
///
/// A failing action is reported and the menu is shown again.
pub fn run_menu<R: BufRead, W: Write>(
    mut input: R,
    out: &mut W,
    interval_minutes: u32,
    rollover_minute: u32,
    mut action: impl FnMut(MenuChoice) -> Result<()>,
) -> Result<()> {
    let mut line = String::new();
    loop {
        print_menu(out, interval_minutes, rollover_minute)?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }

        match MenuChoice::parse(&line) {
            Some(MenuChoice::Exit) => {
                writeln!(out, "Bye.")?;
                return Ok(());
            }
            Some(choice) => {
                out.flush()?;
                if let Err(err) = action(choice) {
                    writeln!(out, "error: {err:#}")?;
                }
            }
            None => writeln!(out, "Invalid choice, try again.")?,
        }
    }
}
