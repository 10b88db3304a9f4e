//! Splits a metric's raw date span into fixed-size day windows.
//!
//! Each window is loaded, aggregated and committed before the next one
//! starts, so at most one window's rows are held in memory.

use chrono::{Days, NaiveDate};

/// Window size used when nothing overrides it.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// An inclusive date range processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    // ---
    /// Zero-based position within the plan.
    pub index: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Non-overlapping windows covering `[start, end]` exactly once.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlan {
    start: NaiveDate,
    end: NaiveDate,
    window_days: u32,
}

impl WindowPlan {
    // ---
    /// A `window_days` of zero is treated as one.
    pub fn new(start: NaiveDate, end: NaiveDate, window_days: u32) -> Self {
        WindowPlan {
            start,
            end,
            window_days: window_days.max(1),
        }
    }

    /// Number of windows the plan will yield.
    pub fn total(&self) -> usize {
        // ---
        if self.start > self.end {
            return 0;
        }
        let span = (self.end - self.start).num_days() as usize;
        span / self.window_days as usize + 1
    }

    pub fn windows(&self) -> Windows {
        Windows {
            cursor: Some(self.start),
            end: self.end,
            step: self.window_days,
            index: 0,
        }
    }
}

/// Iterator over the windows of a [`WindowPlan`].
#[derive(Debug, Clone)]
pub struct Windows {
    cursor: Option<NaiveDate>,
    end: NaiveDate,
    step: u32,
    index: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        // ---
        let start = self.cursor.filter(|c| *c <= self.end)?;

        // Tail window is truncated at `end`, never padded.
        let end = start
            .checked_add_days(Days::new(u64::from(self.step) - 1))
            .map_or(self.end, |e| e.min(self.end));

        self.cursor = start.checked_add_days(Days::new(u64::from(self.step)));
        let window = Window {
            index: self.index,
            start,
            end,
        };
        self.index += 1;
        Some(window)
    }
}
