//! Hour-aligned time windows used as cohort boundaries.
//!
//! The simulated economy never ends, so there are no natural episode
//! boundaries to compare agents across. Instead, every trajectory is tagged
//! with the hour-aligned window it started in, and all trajectories sharing a
//! window form one comparison cohort. The mapping from timestamp to window id
//! is a pure function; nothing here holds state.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

use crate::{Error, Result};

/// Format of a window identifier, e.g. `2025-01-01T10:00`.
const WINDOW_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Map a timestamp to its hour-aligned window identifier.
///
/// All timestamps within the same UTC clock hour map to the same id. Window
/// ids compare lexicographically in chronological order, which the store
/// queries rely on for "strictly before the current window" filters.
pub fn window_id(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:00").to_string()
}

/// Parse a window id back into its starting timestamp.
pub fn window_start(id: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(id, WINDOW_FORMAT)
        .map_err(|_| Error::InvalidWindowId(id.to_string()))?;
    if naive.minute() != 0 {
        return Err(Error::InvalidWindowId(id.to_string()));
    }
    Ok(naive.and_utc())
}

/// Start (inclusive) and end (exclusive) bounds of a window.
pub fn window_bounds(id: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = window_start(id)?;
    Ok((start, start + Duration::hours(1)))
}

/// Window id one hour before the given one, for look-back queries.
pub fn previous_window_id(id: &str) -> Result<String> {
    let start = window_start(id)?;
    Ok(window_id(start - Duration::hours(1)))
}

/// Source of "now" for everything that groups by window.
///
/// Injected rather than read from a global so tests can pin time exactly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Window id of the current hour.
    fn current_window_id(&self) -> String {
        window_id(self.now())
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn same_hour_same_window() {
        let a = ts(2025, 1, 1, 10, 0, 0);
        let b = ts(2025, 1, 1, 10, 59, 59);
        assert_eq!(window_id(a), window_id(b));
        assert_eq!(window_id(a), "2025-01-01T10:00");
    }

    #[test]
    fn different_hours_different_windows() {
        let a = ts(2025, 1, 1, 10, 30, 0);
        let b = ts(2025, 1, 1, 11, 30, 0);
        assert_ne!(window_id(a), window_id(b));
    }

    #[test]
    fn previous_window_crosses_day_boundary() {
        assert_eq!(
            previous_window_id("2025-01-01T00:00").unwrap(),
            "2024-12-31T23:00"
        );
    }

    #[test]
    fn bounds_span_one_hour() {
        let (start, end) = window_bounds("2025-01-01T10:00").unwrap();
        assert_eq!(start, ts(2025, 1, 1, 10, 0, 0));
        assert_eq!(end, ts(2025, 1, 1, 11, 0, 0));
    }

    #[test]
    fn rejects_misaligned_ids() {
        assert!(window_start("2025-01-01T10:30").is_err());
        assert!(window_start("not-a-window").is_err());
    }

    #[test]
    fn ids_sort_chronologically() {
        let earlier = window_id(ts(2025, 1, 1, 9, 0, 0));
        let later = window_id(ts(2025, 1, 1, 10, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn fixed_clock_pins_current_window() {
        let clock = FixedClock(ts(2025, 1, 1, 10, 45, 0));
        assert_eq!(clock.current_window_id(), "2025-01-01T10:00");
    }
}
