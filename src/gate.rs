use chrono::{Days, Months, NaiveDate};
use thiserror::Error;

/// Longest span served by default: one leap year of days.
pub const DEFAULT_MAX_SPAN_DAYS: u32 = 366;

/// Why a requested span was refused before reaching the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error(
        "rates older than {months} months are not served; choose {earliest} or later (requested {requested})"
    )]
    TooOld {
        requested: NaiveDate,
        earliest: NaiveDate,
        months: u32,
    },

    #[error("end date {end} is after {latest}; no rate is published that far ahead")]
    InFuture { end: NaiveDate, latest: NaiveDate },

    #[error("span of {days} days exceeds the limit of {max} days")]
    SpanTooLong { days: u64, max: u32 },
}

/// Retention window and span limit applied to incoming queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionGate {
    /// Zero disables the age check.
    pub months: u32,
    pub max_span_days: u32,
}

impl RetentionGate {
    pub fn new(months: u32) -> Self {
        Self {
            months,
            max_span_days: DEFAULT_MAX_SPAN_DAYS,
        }
    }

    pub fn with_max_span_days(mut self, days: u32) -> Self {
        self.max_span_days = days;
        self
    }

    /// Newest date that may be asked for. The NBU sets tomorrow's rate in
    /// advance, so one day past `today` is still valid.
    pub fn latest(&self, today: NaiveDate) -> NaiveDate {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }

    /// Oldest date still served when today is `today`.
    pub fn earliest(&self, today: NaiveDate) -> Option<NaiveDate> {
        if self.months == 0 {
            return None;
        }
        today
            .checked_sub_months(Months::new(self.months))
            .and_then(|d| d.checked_add_days(Days::new(1)))
    }

    pub fn check(&self, start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), Rejection> {
        if start > end {
            return Err(Rejection::InvertedRange { start, end });
        }
        let latest = self.latest(today);
        if end > latest {
            return Err(Rejection::InFuture { end, latest });
        }
        if let Some(earliest) = self.earliest(today) {
            if start < earliest {
                return Err(Rejection::TooOld {
                    requested: start,
                    earliest,
                    months: self.months,
                });
            }
        }
        let days = (end - start).num_days().unsigned_abs() + 1;
        if days > u64::from(self.max_span_days) {
            return Err(Rejection::SpanTooLong {
                days,
                max: self.max_span_days,
            });
        }
        Ok(())
    }
}
