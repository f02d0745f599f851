//! Calendar date ranges and the iterators that drive a download run.

use std::fmt;
use std::iter::FusedIterator;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// An inclusive range of calendar dates with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = TimeParseError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TimeParseError> {
        if start > end {
            return Err(TimeParseError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering one day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Parse both ends with [`parse_date`].
    pub fn parse(start: &str, end: &str) -> Result<Self, TimeParseError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range, both ends included.
    pub fn num_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Intersect with another range, `None` when they do not overlap.
    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        DateRange::new(start, end).ok()
    }

    /// The part of `year` that falls inside this range.
    pub fn clip_to_year(&self, year: i32) -> Option<DateRange> {
        self.intersection(&calendar_year(year)?)
    }

    /// Every date in the range, in order.
    pub fn days(&self) -> DailySteps {
        DailySteps {
            next: Some(self.start),
            end: self.end,
        }
    }

    /// Per-year sub-ranges for `first_year..=last_year`, clipped to this range.
    ///
    /// Years that do not overlap the range are skipped.
    pub fn years(&self, first_year: i32, last_year: i32) -> YearlyWindows {
        YearlyWindows {
            bounds: *self,
            year: first_year,
            last_year,
        }
    }

    /// Sub-ranges at the given granularity. Daily steps yield one-day ranges.
    pub fn windows(&self, step: Step) -> Windows {
        match step {
            Step::Daily => Windows::Daily(self.days()),
            Step::Yearly => Windows::Yearly(self.years(self.start.year(), self.end.year())),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

fn calendar_year(year: i32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
    Some(DateRange { start, end })
}

/// Parse a calendar date as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, TimeParseError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| TimeParseError::InvalidFormat(s.to_string()))
}

/// Iteration granularity for a download run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Daily,
    Yearly,
}

/// Iterator over each date of a [`DateRange`].
#[derive(Debug, Clone)]
pub struct DailySteps {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DailySteps {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        let end = self.end;
        self.next = current.succ_opt().filter(|d| *d <= end);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self
            .next
            .map(|d| (self.end - d).num_days() as usize + 1)
            .unwrap_or(0);
        (n, Some(n))
    }
}

impl ExactSizeIterator for DailySteps {}
impl FusedIterator for DailySteps {}

/// Iterator over year-bounded sub-ranges of a [`DateRange`].
#[derive(Debug, Clone)]
pub struct YearlyWindows {
    bounds: DateRange,
    year: i32,
    last_year: i32,
}

impl Iterator for YearlyWindows {
    type Item = DateRange;

    fn next(&mut self) -> Option<DateRange> {
        while self.year <= self.last_year {
            let year = self.year;
            self.year += 1;
            if let Some(window) = self.bounds.clip_to_year(year) {
                return Some(window);
            }
        }
        None
    }
}

impl FusedIterator for YearlyWindows {}

/// Either granularity, yielding [`DateRange`] items.
#[derive(Debug, Clone)]
pub enum Windows {
    Daily(DailySteps),
    Yearly(YearlyWindows),
}

impl Iterator for Windows {
    type Item = DateRange;

    fn next(&mut self) -> Option<DateRange> {
        match self {
            Windows::Daily(days) => days.next().map(DateRange::single),
            Windows::Yearly(years) => years.next(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid date format: {0}. Expected YYYY-MM-DD or YYYYMMDD")]
    InvalidFormat(String),

    #[error("Date range is inverted: {start} is after {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}
