// File: ./src/model/date_key.rs
//! Calendar-day cache key.
//!
//! A `DateKey` is the (year, month, day) triple of a calendar date. It is the
//! only index of the activity cache, so it deliberately carries no time of
//! day and no offset: two timestamps that fall on the same local calendar day
//! always produce the same key.
use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateKeyError {
    #[error("{year:04}-{month:02}-{day:02} is not a calendar date")]
    OutOfRange { year: i32, month: u32, day: u32 },
    #[error("cannot parse '{0}' as YYYY-MM-DD")]
    Unparseable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey {
    year: i32,
    month: u32,
    day: u32,
}

impl DateKey {
    /// Builds a key from a raw triple, rejecting dates that do not exist
    /// (month 13, February 30th, ...).
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self, DateKeyError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self::from_date)
            .ok_or(DateKeyError::OutOfRange { year, month, day })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        Self::from_date(dt.date())
    }

    /// Key of the calendar day a zoned timestamp falls on, in its own offset.
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self::from_date(dt.date_naive())
    }

    pub fn today() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn to_naive_date(&self) -> NaiveDate {
        // The triple was validated on construction.
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).unwrap_or(NaiveDate::MIN)
    }

    pub fn succ(&self) -> Self {
        self.offset_days(1)
    }

    pub fn pred(&self) -> Self {
        self.offset_days(-1)
    }

    pub fn offset_days(&self, days: i64) -> Self {
        let date = self.to_naive_date();
        let shifted = if days >= 0 {
            date.checked_add_days(Days::new(days.unsigned_abs()))
        } else {
            date.checked_sub_days(Days::new(days.unsigned_abs()))
        };
        Self::from_date(shifted.unwrap_or(date))
    }

    /// Monday through Sunday of the ISO week containing this key.
    pub fn week(&self) -> [DateKey; 7] {
        let monday = self.offset_days(-i64::from(
            self.to_naive_date().weekday().num_days_from_monday(),
        ));
        std::array::from_fn(|i| monday.offset_days(i as i64))
    }

    /// The timestamp at `time` on this day.
    pub fn at(&self, time: NaiveTime) -> NaiveDateTime {
        self.to_naive_date().and_time(time)
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| DateKeyError::Unparseable(s.to_string()))
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn rejects_impossible_dates() {
        assert!(DateKey::new(2024, 2, 30).is_err());
        assert!(DateKey::new(2024, 13, 1).is_err());
        assert!(DateKey::new(2024, 2, 29).is_ok());
    }

    #[test]
    fn same_local_day_same_key_regardless_of_offset() {
        // 23:30 at +02:00 is already the next day in UTC; the key must follow
        // the local calendar day, not the UTC one.
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let late = plus_two.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        let early = plus_two.with_ymd_and_hms(2024, 5, 1, 0, 15, 0).unwrap();

        assert_eq!(DateKey::from_datetime(&late), DateKey::from_datetime(&early));
        assert_eq!(DateKey::from_datetime(&late), DateKey::new(2024, 5, 1).unwrap());
    }

    #[test]
    fn display_and_parse_agree() {
        let key = DateKey::new(2024, 3, 7).unwrap();
        assert_eq!(key.to_string(), "2024-03-07");
        assert_eq!("2024-03-07".parse::<DateKey>().unwrap(), key);
        assert!("07/03/2024".parse::<DateKey>().is_err());
    }

    #[test]
    fn succ_crosses_month_and_year() {
        let key = DateKey::new(2024, 12, 31).unwrap();
        assert_eq!(key.succ(), DateKey::new(2025, 1, 1).unwrap());
        assert_eq!(key.succ().pred(), key);
    }

    #[test]
    fn week_starts_on_monday() {
        // 2024-05-01 is a Wednesday.
        let week = DateKey::new(2024, 5, 1).unwrap().week();
        assert_eq!(week[0], DateKey::new(2024, 4, 29).unwrap());
        assert_eq!(week[6], DateKey::new(2024, 5, 5).unwrap());
    }
}
