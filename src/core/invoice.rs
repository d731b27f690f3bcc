//! Statement bucketing for credit-card purchases.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as DeError};
use std::fmt;
use std::str::FromStr;

/// Error returned when a reference month string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidReferenceMonth;

impl fmt::Display for InvalidReferenceMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reference month must look like YYYY-MM")
    }
}

impl std::error::Error for InvalidReferenceMonth {}

/// Year-month key identifying one monthly invoice bucket, rendered `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceMonth {
    year: i32,
    month: u32,
}

impl ReferenceMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidReferenceMonth> {
        if !(1..=12).contains(&month) {
            return Err(InvalidReferenceMonth);
        }
        Ok(Self { year, month })
    }

    /// The bucket a date falls into, ignoring any closing day.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The following calendar month, rolling December into January.
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

    /// The invoice bucket for a purchase on `date` against a card that closes
    /// its statement on `closing_day`. Purchases after the close roll into the
    /// next month's bill.
    pub fn bucket_for(date: NaiveDate, closing_day: u32) -> Self {
        let month = Self::of(date);
        if date.day() > closing_day {
            month.next()
        } else {
            month
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for ReferenceMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ReferenceMonth {
    type Err = InvalidReferenceMonth;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or(InvalidReferenceMonth)?;
        let year = year.parse().map_err(|_| InvalidReferenceMonth)?;
        let month = month.parse().map_err(|_| InvalidReferenceMonth)?;
        Self::new(year, month)
    }
}

impl Serialize for ReferenceMonth {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReferenceMonth {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ReferenceMonth::from_str(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn on_closing_day_stays_in_current_month() {
        let bucket = ReferenceMonth::bucket_for(date(2024, 3, 25), 25);
        assert_eq!(bucket, ReferenceMonth::new(2024, 3).unwrap());
    }

    #[test]
    fn after_closing_day_rolls_forward() {
        let bucket = ReferenceMonth::bucket_for(date(2024, 3, 26), 25);
        assert_eq!(bucket, ReferenceMonth::new(2024, 4).unwrap());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let bucket = ReferenceMonth::bucket_for(date(2024, 12, 26), 25);
        assert_eq!(bucket, ReferenceMonth::new(2025, 1).unwrap());
    }

    #[test]
    fn display_and_parse_round_trip() {
        let month = ReferenceMonth::new(2025, 7).unwrap();
        assert_eq!(month.to_string(), "2025-07");
        assert_eq!("2025-07".parse::<ReferenceMonth>().unwrap(), month);
        assert!("2025-13".parse::<ReferenceMonth>().is_err());
        assert!("garbage".parse::<ReferenceMonth>().is_err());
    }

    #[test]
    fn months_order_chronologically() {
        let earlier = ReferenceMonth::new(2024, 12).unwrap();
        let later = ReferenceMonth::new(2025, 1).unwrap();
        assert!(earlier < later);
    }
}
