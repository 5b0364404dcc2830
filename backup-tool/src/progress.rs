//! Progress and timing reports for backup operations.
//!
//! Pipeline components emit [`ProgressUpdate`]s and stage timings through a
//! [`Reporter`]. The console implementation prints the per-source "Copying"
//! lines unconditionally and draws counter progress bars in verbose mode.

use std::io::Write;
use std::time::Duration;

use crate::executor::state::Stage;

/// Per-item work performed inside a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Copying,
    Hashing,
    Compressing,
    Extracting,
    Verifying,
}

impl Operation {
    pub fn title(&self) -> &'static str {
        match self {
            Operation::Copying => "Copying sources...",
            Operation::Hashing => "Computing checksums...",
            Operation::Compressing => "Compressing backup...",
            Operation::Extracting => "Extracting backup...",
            Operation::Verifying => "Verifying backup...",
        }
    }
}

/// One unit of completed work
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub operation: Operation,

    /// 1-based index of the item just finished
    pub current: usize,

    /// Total number of items (best effort for external tools)
    pub total: usize,

    /// Label or file name of the item
    pub name: String,

    /// Time spent on this item, when measured
    pub elapsed: Option<Duration>,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.current as f64 / self.total as f64) * 100.0).min(100.0)
    }
}

/// Receives progress and stage timing from the orchestrator.
pub trait Reporter {
    fn stage_started(&mut self, _stage: Stage) {}

    fn stage_finished(&mut self, _stage: Stage, _elapsed: Duration) {}

    fn progress(&mut self, _update: &ProgressUpdate) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Terminal reporter
pub struct ConsoleReporter {
    verbose: bool,
    bar_open: Option<Operation>,
}

const BAR_WIDTH: usize = 30;

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            bar_open: None,
        }
    }

    fn close_bar(&mut self) {
        if self.bar_open.take().is_some() {
            eprintln!();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn stage_started(&mut self, stage: Stage) {
        self.close_bar();
        if self.verbose {
            eprintln!("{}", stage.describe());
        }
    }

    fn stage_finished(&mut self, stage: Stage, elapsed: Duration) {
        self.close_bar();
        if self.verbose {
            eprintln!("{} done in {}", stage, format_elapsed(elapsed));
        }
    }

    fn progress(&mut self, update: &ProgressUpdate) {
        if update.operation == Operation::Copying {
            self.close_bar();
            let took = update
                .elapsed
                .map(|d| format!(" in {}", format_elapsed(d)))
                .unwrap_or_default();
            println!(
                "Copying {} ({}/{}){}",
                update.name, update.current, update.total, took
            );
            return;
        }

        if !self.verbose {
            return;
        }

        self.bar_open = Some(update.operation);
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\r\x1b[K└──{} [{}] {:.1}% ({}/{}) - (processing '{}')",
            update.operation.title(),
            render_bar(update.current, update.total, BAR_WIDTH),
            update.percent(),
            update.current,
            update.total,
            update.name
        );
        let _ = stderr.flush();
    }
}

/// Filled/empty bar of `width` cells.
pub fn render_bar(current: usize, total: usize, width: usize) -> String {
    let filled = if total == 0 {
        width
    } else {
        (width * current.min(total)) / total
    };
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Format bytes in powers of 1024; whole values drop the decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if size.fract() == 0.0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Sub-minute durations keep two decimals.
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() < 60 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format_duration(elapsed.as_secs())
    }
}
