//! Run modes and the time window each one copies.

use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock format used for window bounds and stored checkpoints.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a run selects its tables and rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Copy every row of a single named table.
    FullTable {
        /// Table name as listed in the table list
        table: String,
    },
    /// Copy rows inserted or updated inside an explicit inclusive range.
    Period {
        /// Range start (inclusive)
        from: NaiveDateTime,
        /// Range end (inclusive)
        to: NaiveDateTime,
    },
    /// Copy rows touched since the last successful incremental run.
    Incremental,
}

impl RunMode {
    /// Build a period mode, rejecting inverted ranges.
    pub fn period(from: NaiveDateTime, to: NaiveDateTime) -> Result<Self> {
        if from > to {
            return Err(Error::validation(format!(
                "from must not be after to ({} > {})",
                format_timestamp(&from),
                format_timestamp(&to)
            )));
        }
        Ok(RunMode::Period { from, to })
    }

    /// Whether this mode reads and advances the checkpoint.
    pub fn is_incremental(&self) -> bool {
        matches!(self, RunMode::Incremental)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::FullTable { .. } => write!(f, "fulltable"),
            RunMode::Period { .. } => write!(f, "period"),
            RunMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Effective row filter of a run.
///
/// Either no filter at all, or an inclusive `[from, to]` range matched
/// against a row's insert or update timestamp. A half-open window cannot
/// be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunWindow {
    /// Whole table, no filter clause.
    Unbounded,
    /// Inclusive range on insert-or-update timestamp.
    Bounded {
        /// Range start (inclusive)
        from: NaiveDateTime,
        /// Range end (inclusive)
        to: NaiveDateTime,
    },
}

impl RunWindow {
    /// Range bounds, if any.
    pub fn bounds(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        match *self {
            RunWindow::Unbounded => None,
            RunWindow::Bounded { from, to } => Some((from, to)),
        }
    }

    /// Whether a filter clause is needed.
    pub fn is_bounded(&self) -> bool {
        matches!(self, RunWindow::Bounded { .. })
    }

    /// Upper bound, if any.
    pub fn to(&self) -> Option<NaiveDateTime> {
        self.bounds().map(|(_, to)| to)
    }

    /// Whether a timestamp falls inside the window.
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        match self {
            RunWindow::Unbounded => true,
            RunWindow::Bounded { from, to } => from <= ts && ts <= to,
        }
    }
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWindow::Unbounded => write!(f, "all rows"),
            RunWindow::Bounded { from, to } => write!(
                f,
                "from {} to {}",
                format_timestamp(from),
                format_timestamp(to)
            ),
        }
    }
}

/// Compute the window for a run.
///
/// `now` is captured once by the caller at the start of the run; for
/// incremental runs it becomes the upper bound and, after a successful run,
/// the next checkpoint.
pub fn resolve(mode: &RunMode, checkpoint: Option<&Checkpoint>, now: NaiveDateTime) -> RunWindow {
    match mode {
        RunMode::FullTable { .. } => RunWindow::Unbounded,
        RunMode::Period { from, to } => RunWindow::Bounded {
            from: *from,
            to: *to,
        },
        RunMode::Incremental => RunWindow::Bounded {
            from: checkpoint
                .map(|c| c.date)
                .unwrap_or_else(|| start_of_yesterday(now)),
            to: truncate_to_seconds(now),
        },
    }
}

/// Current local wall-clock time, to the second.
pub fn now_local() -> NaiveDateTime {
    truncate_to_seconds(Local::now().naive_local())
}

/// Yesterday at 00:00:00 relative to `now`.
pub fn start_of_yesterday(now: NaiveDateTime) -> NaiveDateTime {
    yesterday(now).and_time(NaiveTime::MIN)
}

/// Yesterday at 23:59:59 relative to `now`.
pub fn end_of_yesterday(now: NaiveDateTime) -> NaiveDateTime {
    start_of_yesterday(now) + Duration::seconds(86_399)
}

fn yesterday(now: NaiveDateTime) -> NaiveDate {
    now.date().pred_opt().unwrap_or(NaiveDate::MIN)
}

/// Drop sub-second precision.
pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Format a timestamp the way windows and checkpoints are printed and stored.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare `YYYY-MM-DD`.
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime> {
    let input = input.trim();
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|e| Error::validation(format!("Invalid timestamp '{}': {}", input, e)))
}
