//! Phase timing for scheduled runs.
//!
//! Every phase is measured so the operational log can carry `[PERF]` lines;
//! samples are additionally kept for the `--timing` report when enabled.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

/// Aggregated timings for the phases of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingReport {
    pub phases: Vec<PhaseTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub name: String,
    pub count: usize,
    pub total: Duration,
    pub max: Duration,
}

thread_local! {
    static SAMPLES: RefCell<Vec<(String, Duration)>> = const { RefCell::new(Vec::new()) };
}

static TIMING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Returns true when `HOURLOG_TIMING` is set to a truthy value
/// (`1`, `true`, `yes`, `on`).
#[must_use]
pub fn timing_enabled_from_env() -> bool {
    std::env::var("HOURLOG_TIMING")
        .ok()
        .is_some_and(|value| is_truthy(&value))
}

/// Enable or disable sample collection. Disabling drops collected samples.
pub fn set_timing_enabled(enabled: bool) {
    TIMING_ENABLED.store(enabled, Ordering::Relaxed);
    if !enabled {
        clear_timings();
    }
}

#[must_use]
pub fn is_timing_enabled() -> bool {
    TIMING_ENABLED.load(Ordering::Relaxed)
}

pub fn clear_timings() {
    SAMPLES.with(|samples| samples.borrow_mut().clear());
}

/// Run `f` and return its result with the elapsed wall time.
///
/// The sample is recorded under `name` only while timing is enabled.
pub fn measure<R>(name: &str, f: impl FnOnce() -> R) -> (R, Duration) {
    let started = Instant::now();
    let result = f();
    let elapsed = started.elapsed();
    if is_timing_enabled() {
        SAMPLES.with(|samples| samples.borrow_mut().push((name.to_string(), elapsed)));
    }
    (result, elapsed)
}

/// Run `f`, recording its duration when timing is enabled.
pub fn timed<R>(name: &str, f: impl FnOnce() -> R) -> R {
    measure(name, f).0
}

/// Drain this thread's samples into a report grouped by phase name.
#[must_use]
pub fn collect_report() -> TimingReport {
    let samples = SAMPLES.with(|samples| std::mem::take(&mut *samples.borrow_mut()));

    let mut grouped: BTreeMap<String, PhaseTiming> = BTreeMap::new();
    for (name, elapsed) in samples {
        let entry = grouped.entry(name.clone()).or_insert_with(|| PhaseTiming {
            name,
            count: 0,
            total: Duration::ZERO,
            max: Duration::ZERO,
        });
        entry.count += 1;
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
    }

    TimingReport {
        phases: grouped.into_values().collect(),
    }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let phases = self
            .phases
            .iter()
            .map(|phase| {
                json!({
                    "name": phase.name,
                    "count": phase.count,
                    "total_us": phase.total.as_micros(),
                    "max_us": phase.max.as_micros(),
                })
            })
            .collect::<Vec<_>>();

        json!({ "phases": phases })
    }

    #[must_use]
    pub fn display_table(&self) -> String {
        if self.phases.is_empty() {
            return "No timing samples recorded.".to_string();
        }

        let mut out = String::from("phase                    count      total        max\n");
        out.push_str("----------------------------------------------------\n");
        for phase in &self.phases {
            out.push_str(&format!(
                "{:<24} {:>5} {:>10} {:>10}\n",
                phase.name,
                phase.count,
                format_duration(phase.total),
                format_duration(phase.max)
            ));
        }
        out
    }
}

/// Human-scaled duration used by reports and `[PERF]` log lines.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1_000_000 {
        format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000)
    } else if micros >= 1_000 {
        format!("{}.{:03}ms", micros / 1_000, micros % 1_000)
    } else {
        format!("{micros}µs")
    }
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}
