//! Week-availability masks

use chrono::Weekday;

/// Marker for an active day
pub const ACTIVE_DAY: char = '*';

/// Whether a subscription with `mask` fires on `weekday`
///
/// The mask is indexed Monday first. A missing or empty mask means every day;
/// a mask too short to cover the day means that day is off.
pub fn is_available(mask: Option<&str>, weekday: Weekday) -> bool {
    match mask {
        None => true,
        Some(mask) if mask.is_empty() => true,
        Some(mask) => {
            mask.chars().nth(weekday.num_days_from_monday() as usize) == Some(ACTIVE_DAY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday_mask() {
        let workdays = Some("*****--");
        assert!(is_available(workdays, Weekday::Mon));
        assert!(is_available(workdays, Weekday::Fri));
        assert!(!is_available(workdays, Weekday::Sat));
        assert!(!is_available(workdays, Weekday::Sun));
    }

    #[test]
    fn test_sunday_is_last_position() {
        assert!(is_available(Some("------*"), Weekday::Sun));
        assert!(!is_available(Some("------*"), Weekday::Mon));
    }

    #[test]
    fn test_missing_mask_keeps() {
        assert!(is_available(None, Weekday::Wed));
        assert!(is_available(Some(""), Weekday::Wed));
    }

    #[test]
    fn test_short_mask_drops_uncovered_days() {
        assert!(is_available(Some("**"), Weekday::Tue));
        assert!(!is_available(Some("**"), Weekday::Wed));
    }

    #[test]
    fn test_other_markers_are_inactive() {
        assert!(!is_available(Some("x+1****"), Weekday::Mon));
        assert!(!is_available(Some("x+1****"), Weekday::Tue));
    }
}
