use std::{fmt, str::FromStr};

use time::Date;

/// Calendar month as it appears in meter sheet column headers (`Jan`, `Feb`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    /// All months in calendar order.
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    pub fn abbrev(self) -> &'static str {
        match self {
            Month::Jan => "Jan",
            Month::Feb => "Feb",
            Month::Mar => "Mar",
            Month::Apr => "Apr",
            Month::May => "May",
            Month::Jun => "Jun",
            Month::Jul => "Jul",
            Month::Aug => "Aug",
            Month::Sep => "Sep",
            Month::Oct => "Oct",
            Month::Nov => "Nov",
            Month::Dec => "Dec",
        }
    }

    /// Case-insensitive lookup by three-letter abbreviation.
    pub fn from_abbrev(s: &str) -> Option<Month> {
        let s = s.trim();
        Month::ALL
            .into_iter()
            .find(|m| m.abbrev().eq_ignore_ascii_case(s))
    }
}

impl From<time::Month> for Month {
    fn from(m: time::Month) -> Self {
        Month::ALL[u8::from(m) as usize - 1]
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodParseError {
    #[error("period '{0}' is not of the form Mon-YY")]
    Format(String),
    #[error("unknown month '{0}'")]
    Month(String),
    #[error("invalid year '{0}'")]
    Year(String),
}

/// A reporting period: one month of one year, keyed as `Mar-25` in sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: Month,
}

impl Period {
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    pub fn from_date(date: Date) -> Self {
        Self {
            year: date.year(),
            month: date.month().into(),
        }
    }

    /// Sheet column key, e.g. `Mar-25`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// All twelve periods of `year` in calendar order.
    pub fn months_of(year: i32) -> impl Iterator<Item = Period> {
        Month::ALL.into_iter().map(move |month| Period { year, month })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.month, self.year.rem_euclid(100))
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    /// Accepts `Mar-25`, `Mar_25` and `Mar-2025`. Two-digit years are taken as 20YY.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (month_str, year_str) = trimmed
            .split_once(['-', '_', ' '])
            .ok_or_else(|| PeriodParseError::Format(trimmed.to_string()))?;

        let month =
            Month::from_abbrev(month_str).ok_or_else(|| PeriodParseError::Month(month_str.to_string()))?;

        let year_str = year_str.trim();
        let digits: u32 = year_str
            .parse()
            .map_err(|_| PeriodParseError::Year(year_str.to_string()))?;
        let year = match year_str.len() {
            2 => 2000 + digits as i32,
            4 => digits as i32,
            _ => return Err(PeriodParseError::Year(year_str.to_string())),
        };

        Ok(Period { year, month })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn period_key_uses_two_digit_year() {
        assert_eq!(Period::new(2025, Month::Mar).key(), "Mar-25");
        assert_eq!(Period::new(2009, Month::Dec).key(), "Dec-09");
    }

    #[test]
    fn period_parses_sheet_variants() {
        let expected = Period::new(2025, Month::Mar);
        assert_eq!("Mar-25".parse::<Period>().unwrap(), expected);
        assert_eq!("mar_25".parse::<Period>().unwrap(), expected);
        assert_eq!(" MAR-2025 ".parse::<Period>().unwrap(), expected);
    }

    #[test]
    fn period_rejects_garbage() {
        assert!(matches!("March".parse::<Period>(), Err(PeriodParseError::Format(_))));
        assert!(matches!("Foo-25".parse::<Period>(), Err(PeriodParseError::Month(_))));
        assert!(matches!("Mar-2x".parse::<Period>(), Err(PeriodParseError::Year(_))));
        assert!(matches!("Mar-125".parse::<Period>(), Err(PeriodParseError::Year(_))));
    }

    #[test]
    fn period_from_date_maps_month() {
        assert_eq!(Period::from_date(date!(2024 - 06 - 01)), Period::new(2024, Month::Jun));
    }

    #[test]
    fn months_of_is_calendar_ordered() {
        let keys: Vec<String> = Period::months_of(2024).map(|p| p.key()).collect();
        assert_eq!(keys.first().map(String::as_str), Some("Jan-24"));
        assert_eq!(keys.last().map(String::as_str), Some("Dec-24"));
        assert_eq!(keys.len(), 12);
    }
}
