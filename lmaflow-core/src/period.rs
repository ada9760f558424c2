//! Reporting periods and the late-declaration cutoff rule.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Day of month from which the current month itself becomes the cutoff period.
pub const CUTOFF_DAY: u32 = 20;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Reasons a period string is rejected.
pub enum PeriodError {
    /// The input does not have the expected number of characters.
    #[error("expected {expected} characters, got {actual}")]
    Length {
        /// Required length.
        expected: usize,
        /// Length of the rejected input.
        actual: usize,
    },
    /// The input contains something other than ASCII digits where digits are required.
    #[error("period contains non-numeric characters: {0}")]
    NotNumeric(String),
    /// The month is outside 1..=12.
    #[error("month {0} is out of range")]
    MonthOutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// A calendar month in which weight-ticket activity is reported.
///
/// Field order matters: the derived ordering is chronological.
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Build a period, rejecting months outside 1..=12.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::MonthOutOfRange`] for an invalid month.
    pub fn new(month: u32, year: i32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    /// Month number, 1..=12.
    #[must_use]
    pub fn month(self) -> u32 {
        self.month
    }

    /// Calendar year.
    #[must_use]
    pub fn year(self) -> i32 {
        self.year
    }

    /// Period a date falls into.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Period a weighing timestamp falls into.
    #[must_use]
    pub fn from_timestamp(timestamp: NaiveDateTime) -> Self {
        Self::from_date(timestamp.date())
    }

    /// Parse the six character `MMyyyy` form used on declarations.
    ///
    /// # Errors
    ///
    /// Returns a [`PeriodError`] when the input is not exactly two month digits
    /// followed by four year digits, or when the month is outside 1..=12.
    pub fn parse(raw: &str) -> Result<Self, PeriodError> {
        let length = raw.chars().count();
        if length != 6 {
            return Err(PeriodError::Length {
                expected: 6,
                actual: length,
            });
        }
        if !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(PeriodError::NotNumeric(raw.to_owned()));
        }

        let (month_digits, year_digits) = raw.split_at(2);
        let month = month_digits
            .parse::<u32>()
            .map_err(|_parse| PeriodError::NotNumeric(raw.to_owned()))?;
        let year = year_digits
            .parse::<i32>()
            .map_err(|_parse| PeriodError::NotNumeric(raw.to_owned()))?;

        Self::new(month, year)
    }

    /// Parse the `yyyy-MM` form stored on job records.
    ///
    /// # Errors
    ///
    /// Returns a [`PeriodError`] when the input is malformed.
    pub fn parse_year_month(raw: &str) -> Result<Self, PeriodError> {
        let Some((year, month)) = raw.split_once('-') else {
            return Err(PeriodError::NotNumeric(raw.to_owned()));
        };
        if year.len() != 4 || month.len() != 2 {
            return Err(PeriodError::Length {
                expected: 7,
                actual: raw.chars().count(),
            });
        }
        let year = year
            .parse::<i32>()
            .map_err(|_parse| PeriodError::NotNumeric(raw.to_owned()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_parse| PeriodError::NotNumeric(raw.to_owned()))?;
        Self::new(month, year)
    }

    /// Render as `yyyy-MM`.
    #[must_use]
    pub fn year_month(self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// The month before this one.
    #[must_use]
    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The month after this one.
    #[must_use]
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First calendar day of the period.
    #[must_use]
    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the period.
    #[must_use]
    pub fn last_day(self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:02}{:04}", self.month, self.year)
    }
}

/// Latest period eligible for late-declaration sweeps on the given day.
///
/// Before the 20th the cutoff is the previous month; from the 20th onward it
/// is the current month.
#[must_use]
pub fn cutoff(now: NaiveDate) -> Period {
    let current = Period::from_date(now);
    if now.day() < CUTOFF_DAY {
        current.previous()
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn cutoff_before_the_twentieth_is_previous_month() {
        assert_eq!(cutoff(date(2025, 12, 4)), Period::new(11, 2025).expect("period"));
        assert_eq!(cutoff(date(2025, 12, 19)), Period::new(11, 2025).expect("period"));
    }

    #[test]
    fn cutoff_from_the_twentieth_is_current_month() {
        assert_eq!(cutoff(date(2025, 12, 20)), Period::new(12, 2025).expect("period"));
        assert_eq!(cutoff(date(2025, 12, 21)), Period::new(12, 2025).expect("period"));
    }

    #[test]
    fn cutoff_rolls_back_over_new_year() {
        assert_eq!(cutoff(date(2026, 1, 4)), Period::new(12, 2025).expect("period"));
    }

    #[test]
    fn parse_accepts_zero_padded_month() {
        let period = Period::parse("112025").expect("valid period");
        assert_eq!(period.month(), 11);
        assert_eq!(period.year(), 2025);

        let january = Period::parse("012026").expect("valid period");
        assert_eq!(january.month(), 1);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(matches!(
            Period::parse("1120"),
            Err(PeriodError::Length { expected: 6, actual: 4 })
        ));
        assert_eq!(Period::parse("132025"), Err(PeriodError::MonthOutOfRange(13)));
        assert_eq!(Period::parse("002025"), Err(PeriodError::MonthOutOfRange(0)));
        assert!(matches!(Period::parse("AB2025"), Err(PeriodError::NotNumeric(_))));
        assert!(matches!(Period::parse("1-2025"), Err(PeriodError::NotNumeric(_))));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let period = Period::from_date(date(2024, 3, 15));
        assert_eq!(period.to_string(), "032024");
        assert_eq!(Period::parse(&period.to_string()), Ok(period));
    }

    #[test]
    fn year_month_form_round_trips() {
        let period = Period::new(7, 2025).expect("period");
        assert_eq!(period.year_month(), "2025-07");
        assert_eq!(Period::parse_year_month("2025-07"), Ok(period));
        assert!(Period::parse_year_month("2025/07").is_err());
    }

    #[test]
    fn bounds_cover_the_whole_month() {
        let february = Period::new(2, 2024).expect("period");
        assert_eq!(february.first_day(), date(2024, 2, 1));
        assert_eq!(february.last_day(), date(2024, 2, 29));
        assert_eq!(Period::new(12, 2025).expect("period").last_day(), date(2025, 12, 31));
    }

    #[test]
    fn ordering_is_chronological() {
        let december = Period::new(12, 2024).expect("period");
        let january = Period::new(1, 2025).expect("period");
        assert!(december < january);
        assert_eq!(january.previous(), december);
        assert_eq!(december.next(), january);
    }
}
