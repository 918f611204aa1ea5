//! Calendar features derived from a timestamp.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

pub const CALENDAR_COLUMNS: [&str; 5] = ["hour", "weekday", "month", "is_weekend", "year"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub hour: u32,
    /// Monday = 0.
    pub weekday: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub year: i32,
}

impl CalendarFeatures {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        let weekday = ts.weekday();
        Self {
            hour: ts.hour(),
            weekday: weekday.num_days_from_monday(),
            month: ts.month(),
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
            year: ts.year(),
        }
    }

    /// Values in [`CALENDAR_COLUMNS`] order.
    pub fn values(&self) -> [f64; 5] {
        [
            f64::from(self.hour),
            f64::from(self.weekday),
            f64::from(self.month),
            if self.is_weekend { 1.0 } else { 0.0 },
            f64::from(self.year),
        ]
    }
}
