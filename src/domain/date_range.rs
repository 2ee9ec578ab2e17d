use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("invalid month token: {0} (expected YYYY-MM)")]
    InvalidMonth(String),
    #[error("invalid date range: start {start} is after end {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// Builds the range covering the whole month named by a `YYYY-MM` token.
    pub fn for_month(token: &str) -> Result<Self, DateRangeError> {
        let invalid = || DateRangeError::InvalidMonth(token.to_string());
        let (year, month) = token.split_once('-').ok_or_else(invalid)?;
        let digits = |part: &str, len: usize| {
            part.len() == len && part.bytes().all(|byte| byte.is_ascii_digit())
        };
        if !digits(year, 4) || !digits(month, 2) {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next_month| next_month.pred_opt())
            .ok_or_else(invalid)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First second of the start date, as a UTC epoch timestamp.
    pub fn start_timestamp(&self) -> i64 {
        self.start.and_time(NaiveTime::MIN).and_utc().timestamp()
    }

    /// Last second of the end date, as a UTC epoch timestamp.
    pub fn end_timestamp(&self) -> i64 {
        let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        self.end.and_time(last_second).and_utc().timestamp()
    }

    pub fn month_token(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

/// The `YYYY-MM` token of the calendar month before `today`.
pub fn previous_month_token(today: NaiveDate) -> String {
    let first_of_month = today.with_day(1).unwrap_or(today);
    first_of_month
        .pred_opt()
        .unwrap_or(first_of_month)
        .format("%Y-%m")
        .to_string()
}
