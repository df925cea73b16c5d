//! Comparison window for rate differences
//!
//! A firing compares the latest rates against the values recorded one window
//! earlier. The window is, in order of precedence:
//!
//! 1. a fixed point `dayToGetDiff` days away at `timeToGetDiff`,
//! 2. the gap back to an explicit `timeToGetDiff` on the same day,
//! 3. the gap back to the previous slot in the subscription's time list,
//! 4. four hours when none of the above can be computed.

use chrono::{DateTime, Duration, NaiveTime};
use chrono_tz::Tz;

use crate::utils::{slot_minutes, MINUTES_PER_DAY};

/// Window used when nothing else applies
pub const FALLBACK_WINDOW_MINUTES: i64 = 4 * 60;

/// How a window was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSource {
    FixedDay,
    ExplicitTime,
    PreviousSlot,
    Fallback,
}

/// Comparison window for one subscription firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffWindow {
    pub duration: Duration,
    pub source: WindowSource,
}

impl DiffWindow {
    fn minutes(minutes: i64, source: WindowSource) -> Self {
        Self {
            duration: Duration::minutes(minutes),
            source,
        }
    }

    fn fallback() -> Self {
        Self::minutes(FALLBACK_WINDOW_MINUTES, WindowSource::Fallback)
    }

    /// Comparison point as epoch milliseconds
    pub fn target_millis(&self, now: &DateTime<Tz>) -> i64 {
        now.timestamp_millis() - self.duration.num_milliseconds()
    }
}

/// Compute the window for a firing at `time`
///
/// `slots` is the subscription's ordered time list. A zero day offset counts
/// as no offset.
pub fn diff_window(
    time: &str,
    slots: &[String],
    time_to_get_diff: Option<&str>,
    day_to_get_diff: Option<i64>,
    now: &DateTime<Tz>,
) -> DiffWindow {
    match day_to_get_diff.filter(|days| *days != 0) {
        Some(days) => fixed_day(days, time_to_get_diff, now),
        None => slot_gap(time, slots, time_to_get_diff),
    }
    .unwrap_or_else(DiffWindow::fallback)
}

fn fixed_day(days: i64, time_to_get_diff: Option<&str>, now: &DateTime<Tz>) -> Option<DiffWindow> {
    let at = NaiveTime::parse_from_str(time_to_get_diff?.trim(), "%H:%M").ok()?;
    let day = now.date_naive().checked_add_signed(Duration::days(days))?;
    let target = day
        .and_time(at)
        .and_local_timezone(now.timezone())
        .earliest()?;

    Some(DiffWindow {
        duration: now.clone().signed_duration_since(target),
        source: WindowSource::FixedDay,
    })
}

fn slot_gap(time: &str, slots: &[String], time_to_get_diff: Option<&str>) -> Option<DiffWindow> {
    let current = slot_minutes(time)?;

    if let Some(explicit) = time_to_get_diff {
        let previous = slot_minutes(explicit)?;
        let mut gap = current - previous;
        if gap < 0 {
            gap += MINUTES_PER_DAY;
        }
        return Some(DiffWindow::minutes(gap, WindowSource::ExplicitTime));
    }

    if slots.is_empty() {
        return None;
    }

    // An unknown slot behaves as if it sat before the first entry
    let current_index = slots.iter().position(|slot| slot == time);
    let previous_index = match current_index {
        Some(index) if index > 0 => index - 1,
        _ => slots.len() - 1,
    };
    let previous = slot_minutes(&slots[previous_index])?;

    let wraps = current_index.map_or(true, |index| previous_index >= index);
    let gap = if wraps {
        current + MINUTES_PER_DAY - previous
    } else {
        current - previous
    };
    Some(DiffWindow::minutes(gap, WindowSource::PreviousSlot))
}
