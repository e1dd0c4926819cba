//! Console output levels and step-line formatting.
//!
//! `-q` keeps errors, warnings and the closing summary. The default adds one
//! line per step that runs. `-v` adds stale reasons, skipped steps, tool
//! command lines and phase timings.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// How much anvil prints.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Quiet,
    Normal,
    Verbose,
}

impl Level {
    /// Level selected by the `-q` and `-v` flags. Quiet wins.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Level::Quiet,
            (false, true) => Level::Verbose,
            (false, false) => Level::Normal,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Quiet,
            2 => Level::Verbose,
            _ => Level::Normal,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::Normal as u8);

/// Set the output level for the rest of the process.
pub fn init(quiet: bool, verbose: bool) {
    LEVEL.store(Level::from_flags(quiet, verbose) as u8, Ordering::Relaxed);
}

fn level() -> Level {
    Level::from_u8(LEVEL.load(Ordering::Relaxed))
}

pub fn is_verbose() -> bool {
    level() == Level::Verbose
}

pub fn is_quiet() -> bool {
    level() == Level::Quiet
}

/// Width of the right-aligned verb column in step lines.
const VERB_WIDTH: usize = 10;

/// One step line: `      Linking blink.elf`, with an optional trailing
/// note in parentheses.
pub fn step_line(verb: &str, subject: &str, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("  {verb:>VERB_WIDTH$} {subject} ({note})"),
        None => format!("  {verb:>VERB_WIDTH$} {subject}"),
    }
}

/// Continuation line printed under a step, aligned past the verb column.
pub fn detail_line(marker: &str, text: &str) -> String {
    format!("  {:VERB_WIDTH$} {marker} {text}", "")
}

/// Print only with `-v`.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Print unless `-q` was given.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Warning on stderr, printed at every level.
macro_rules! wprintln {
    ($($arg:tt)*) => {
        eprintln!("warning: {}", format_args!($($arg)*))
    };
}

pub(crate) use wprintln;

/// Reports how long a phase took when dropped, with `-v` only.
pub struct Timer {
    phase: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        vprintln!("  {} took {:.1?}", self.phase, self.start.elapsed());
    }
}
