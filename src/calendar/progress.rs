use std::collections::HashSet;

use time::{Date, UtcOffset};

use crate::model::Entry;

/// Leap years are deliberately not special-cased.
pub const DAYS_PER_YEAR: usize = 365;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearProgress {
    pub year: i32,
    pub distinct_days: usize,
    pub ratio: f64,
}

impl YearProgress {
    pub fn percent(&self) -> f64 {
        self.ratio * 100.0
    }
}

/// Share of `year` covered by at least one entry, capped at 1.
pub fn year_progress(entries: &[Entry], year: i32, offset: UtcOffset) -> YearProgress {
    let days: HashSet<Date> = entries
        .iter()
        .map(|entry| entry.local_date(offset))
        .filter(|date| date.year() == year)
        .collect();
    let distinct_days = days.len();
    let ratio = (distinct_days as f64 / DAYS_PER_YEAR as f64).min(1.0);
    YearProgress {
        year,
        distinct_days,
        ratio,
    }
}
