//! Common utilities and helper functions
//!
//! Retry combinators plus the clock and formatting helpers shared by the
//! resolver and the producers.

pub mod retry;

use chrono::{DateTime, NaiveTime, TimeZone, Timelike};

/// Minutes in a day, used for cyclic time-slot arithmetic
pub const MINUTES_PER_DAY: i64 = 1440;

/// Parse an `HH:MM` slot into minutes since midnight
pub fn slot_minutes(slot: &str) -> Option<i64> {
    let time = NaiveTime::parse_from_str(slot.trim(), "%H:%M").ok()?;
    Some(i64::from(time.hour()) * 60 + i64::from(time.minute()))
}

/// Format a local time as an `HH:MM` slot
pub fn format_slot<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%H:%M").to_string()
}

/// `dd.mm.yyyy`
pub fn format_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%d.%m.%Y").to_string()
}

/// `dd.mm.yyyy, HH:MM:SS`
pub fn format_date_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%d.%m.%Y, %H:%M:%S").to_string()
}

/// Format a rate with four decimals
pub fn format_rate(value: f64) -> String {
    format!("{value:.4}")
}
