//! Office-hours gate
//!
//! Sends may only hit the wire inside the half-open window
//! [start, end) of the hour of day. The gate is evaluated when a send
//! job runs, not when it was scheduled. No weekend exclusion.

use chrono::{DateTime, Duration, Timelike, Utc};

/// The configured send window
#[derive(Debug, Clone, Copy)]
pub struct OfficeHours {
    pub start: u32,
    pub end: u32,
}

impl OfficeHours {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether the instant falls inside the window. A window crossing
    /// midnight (start > end) wraps; start == end means always open.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if self.start == self.end {
            return true;
        }
        let hour = at.hour();
        if self.start < self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }

    /// The next instant at which the window opens, for an instant outside
    /// it: the start hour of today when still ahead, otherwise the start
    /// hour of tomorrow.
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = at
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);

        let today_open = day_start + Duration::hours(self.start as i64);
        if at < today_open {
            today_open
        } else {
            today_open + Duration::days(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_inside_window() {
        let hours = OfficeHours::new(8, 18);
        assert!(hours.contains(at(8, 0)));
        assert!(hours.contains(at(12, 30)));
        assert!(hours.contains(at(17, 59)));
    }

    #[test]
    fn test_outside_window() {
        let hours = OfficeHours::new(8, 18);
        assert!(!hours.contains(at(7, 59)));
        assert!(!hours.contains(at(18, 0)));
        assert!(!hours.contains(at(23, 0)));
        assert!(!hours.contains(at(0, 0)));
    }

    #[test]
    fn test_next_open_before_start() {
        let hours = OfficeHours::new(8, 18);
        let next = hours.next_open(at(6, 30));
        assert_eq!(next, at(8, 0));
    }

    #[test]
    fn test_next_open_after_end_is_tomorrow() {
        let hours = OfficeHours::new(8, 18);
        let next = hours.next_open(at(19, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 16, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_friday_evening_defers_to_saturday() {
        // 2024-03-15 is a Friday; weekends are not excluded
        let hours = OfficeHours::new(9, 17);
        let next = hours.next_open(at(20, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 16, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_wrapping_window() {
        let hours = OfficeHours::new(22, 6);
        assert!(hours.contains(at(23, 0)));
        assert!(hours.contains(at(3, 0)));
        assert!(!hours.contains(at(12, 0)));
    }

    #[test]
    fn test_collapsed_window_is_always_open() {
        let hours = OfficeHours::new(0, 0);
        assert!(hours.contains(at(3, 0)));
        assert!(hours.contains(at(15, 0)));
    }
}
