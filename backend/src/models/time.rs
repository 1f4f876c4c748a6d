//! Clock-time and calendar primitives.
//!
//! The schedule document stores clock times as `HH:MM` strings in the
//! schedule's implicit local zone and dates as ISO `YYYY-MM-DD`. This module
//! provides the conversions between those textual forms and the minute /
//! [`NaiveDate`] representations the solver works with, plus the day-type
//! classification used to select template columns.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::state::Holiday;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Day classification for a calendar date. Holidays take precedence over the
/// weekday, so a holiday Monday uses the `holiday` template column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
    Holiday,
}

impl DayType {
    /// All day types in template-column order (weekdays first, holiday last).
    pub const ALL: [DayType; 8] = [
        DayType::Mon,
        DayType::Tue,
        DayType::Wed,
        DayType::Thu,
        DayType::Fri,
        DayType::Sat,
        DayType::Sun,
        DayType::Holiday,
    ];

    /// The seven weekday keys used by preferred-working-time maps.
    pub const WEEKDAYS: [DayType; 7] = [
        DayType::Mon,
        DayType::Tue,
        DayType::Wed,
        DayType::Thu,
        DayType::Fri,
        DayType::Sat,
        DayType::Sun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Mon => "mon",
            DayType::Tue => "tue",
            DayType::Wed => "wed",
            DayType::Thu => "thu",
            DayType::Fri => "fri",
            DayType::Sat => "sat",
            DayType::Sun => "sun",
            DayType::Holiday => "holiday",
        }
    }

    pub fn parse(value: &str) -> Option<DayType> {
        DayType::ALL.into_iter().find(|d| d.as_str() == value)
    }

    /// Position in [`DayType::ALL`], used as the day component of the
    /// slot-context ordering key.
    pub fn order(&self) -> usize {
        DayType::ALL.iter().position(|d| d == self).unwrap_or(0)
    }

    pub fn from_weekday(weekday: Weekday) -> DayType {
        match weekday {
            Weekday::Mon => DayType::Mon,
            Weekday::Tue => DayType::Tue,
            Weekday::Wed => DayType::Wed,
            Weekday::Thu => DayType::Thu,
            Weekday::Fri => DayType::Fri,
            Weekday::Sat => DayType::Sat,
            Weekday::Sun => DayType::Sun,
        }
    }
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date_iso(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

pub fn format_date_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Weekday key (`mon`..`sun`) of a date, ignoring holidays.
pub fn weekday_key(date: NaiveDate) -> DayType {
    DayType::from_weekday(date.weekday())
}

/// Day type of a date: `holiday` when the date appears in the holiday list,
/// the weekday key otherwise.
pub fn day_type_for(date_iso: &str, holidays: &[Holiday]) -> DayType {
    if holidays.iter().any(|h| h.date_iso == date_iso) {
        return DayType::Holiday;
    }
    match parse_date_iso(date_iso) {
        Some(date) => weekday_key(date),
        None => DayType::Mon,
    }
}

/// Monday of the week containing `date`.
pub fn week_start_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Parse `HH:MM` to minutes since midnight. Hours must be 0..=23 and minutes
/// a two-digit 00..=59; anything else is rejected.
pub fn parse_time_minutes(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    let (hours_raw, minutes_raw) = trimmed.split_once(':')?;
    if minutes_raw.len() != 2 || hours_raw.is_empty() || hours_raw.len() > 2 {
        return None;
    }
    let hours: u32 = hours_raw.parse().ok()?;
    let minutes: u32 = minutes_raw.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Format minutes since midnight as `HH:MM`, wrapping at 24h.
pub fn format_minutes(total_minutes: u32) -> String {
    let clamped = total_minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", clamped / 60, clamped % 60)
}
