//! Dates carried in remote directory and file names

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::warn;

const ISO: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const MONTH_DAY_YEAR: &[BorrowedFormatItem<'static>] =
    format_description!("[month repr:short]-[day]-[year]");
const COMPACT: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");

static ISO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid iso date pattern"));
static MONTH_DAY_YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z][a-z]{2}-\d{2}-\d{4}").expect("valid month-day-year pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Invalid(String),

    #[error("last date {last} is before first date {first}")]
    Reversed { first: Date, last: Date },
}

/// How a product spells the dates in its directory names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateFormat {
    /// `Jan-04-2009`
    #[default]
    MonthDayYear,
    /// `2009-01-04`
    Iso,
}

impl DateFormat {
    fn pattern(&self) -> &'static Regex {
        match self {
            DateFormat::MonthDayYear => &MONTH_DAY_YEAR_PATTERN,
            DateFormat::Iso => &ISO_PATTERN,
        }
    }

    fn parse(&self, text: &str) -> Option<Date> {
        let format = match self {
            DateFormat::MonthDayYear => MONTH_DAY_YEAR,
            DateFormat::Iso => ISO,
        };
        Date::parse(text, format).ok()
    }
}

/// Start and end date of a directory name, in chronological order
///
/// Only the first two dates in the name count; a name with fewer than two has
/// no span.
pub fn directory_span(name: &str, format: DateFormat) -> Option<(Date, Date)> {
    let mut dates = format
        .pattern()
        .find_iter(name)
        .filter_map(|m| format.parse(m.as_str()));
    let a = dates.next()?;
    let b = dates.next()?;
    Some((a.min(b), a.max(b)))
}

/// Production date of a Sentinel-1 orbit file name
///
/// `S1A_OPER_AUX_POEORB_OPOD_20200324T120722_V..._....EOF` yields 2020-03-24.
pub fn orbit_production_date(file_name: &str) -> Option<Date> {
    let field = file_name.split('_').nth(5)?;
    let day = field.split('T').next()?;
    Date::parse(day, COMPACT).ok()
}

/// `YYYY-MM-DD` as given on the command line
pub fn parse_date(text: &str) -> Result<Date, DateError> {
    Date::parse(text.trim(), ISO).map_err(|_| DateError::Invalid(text.to_string()))
}

/// Today's date in local time, UTC when the offset is unknown
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Inclusive range of acquisition dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    first: Date,
    last: Date,
}

impl DateRange {
    /// Range from `first` to `last`; a missing `last` means the single day
    pub fn new(first: Date, last: Option<Date>) -> Result<Self, DateError> {
        let last = last.unwrap_or(first);
        if last < first {
            return Err(DateError::Reversed { first, last });
        }
        Ok(Self { first, last })
    }

    pub fn first(&self) -> Date {
        self.first
    }

    pub fn last(&self) -> Date {
        self.last
    }

    /// Whether a `[start, end]` span shares at least one day with the range
    pub fn overlaps(&self, start: Date, end: Date) -> bool {
        end >= self.first && start <= self.last
    }

    /// Directory names whose span overlaps the range, in input order
    pub fn select(&self, names: Vec<String>, format: DateFormat) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| match directory_span(name, format) {
                Some((start, end)) => self.overlaps(start, end),
                None => {
                    warn!(name, ?format, "Directory name has no date span, leaving it out");
                    false
                }
            })
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{} to {}", self.first, self.last)
        }
    }
}
