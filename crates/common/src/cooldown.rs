//! # Cooldown Windows and Day Boundaries
//!
//! Pure time arithmetic used by every reward rule. Nothing here reads a clock:
//! callers pass `now` explicitly so eligibility checks can be evaluated twice
//! (once for an early rejection, once inside the atomic update) with the same
//! instant.
//!
//! ## Overview
//!
//! | Window | Duration | Remaining reported as |
//! |--------|----------|-----------------------|
//! | Spin | 24 hours | `24 - floor(elapsed_hours)` |
//! | Book reading | 2 minutes | `ceil(remaining / 1s)` |
//! | Social follow | 15 minutes | seconds and `ceil` minutes |
//!
//! Quiz limits use the local-day boundary of [`DayClock`]; the leaderboard
//! week starts Monday 00:00 UTC ([`week_start`]).
//!
//! ## Safety Properties
//!
//! - A `last` timestamp in the future of `now` keeps the window active.
//!   Clock skew never opens a cooldown early.
//! - Reported remaining values never go below zero.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════════

/// Spin wheel window: 24 hours in seconds.
pub const SPIN_COOLDOWN_SECS: i64 = 86_400;

/// Book-reading reward window: 2 minutes in seconds.
pub const READING_COOLDOWN_SECS: i64 = 120;

/// Wait between starting and verifying a social follow: 15 minutes.
pub const SOCIAL_WAIT_SECS: i64 = 900;

// ════════════════════════════════════════════════════════════════════════════════
// COOLDOWN WINDOW
// ════════════════════════════════════════════════════════════════════════════════

/// A fixed-length window measured from the last time an action happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownWindow {
    /// Window length in seconds.
    pub duration_secs: i64,
}

impl CooldownWindow {
    pub const fn from_secs(duration_secs: i64) -> Self {
        Self { duration_secs }
    }

    pub const fn spin() -> Self {
        Self::from_secs(SPIN_COOLDOWN_SECS)
    }

    pub const fn reading() -> Self {
        Self::from_secs(READING_COOLDOWN_SECS)
    }

    pub const fn social_wait() -> Self {
        Self::from_secs(SOCIAL_WAIT_SECS)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }

    /// Whether the window that started at `last` is still running at `now`.
    ///
    /// ## Rules
    ///
    /// 1. No `last` → `false` (never happened, nothing to wait for)
    /// 2. `now < last` → `true` (skewed timestamp, stay closed)
    /// 3. `now - last < duration` → `true`
    /// 4. Otherwise → `false`
    #[must_use]
    pub fn is_active(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last else {
            return false;
        };
        if now < last {
            return true;
        }
        now - last < self.duration()
    }

    /// Time left until the window closes; zero when inactive.
    #[must_use]
    pub fn remaining(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(last) = last else {
            return Duration::zero();
        };
        let elapsed = (now - last).max(Duration::zero());
        (self.duration() - elapsed).max(Duration::zero())
    }

    /// Remaining time rounded up to whole seconds.
    #[must_use]
    pub fn remaining_secs_ceil(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
        ceil_div(self.remaining(last, now).num_milliseconds(), 1_000)
    }

    /// Remaining time rounded up to whole minutes.
    #[must_use]
    pub fn remaining_minutes_ceil(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
        ceil_div(self.remaining(last, now).num_milliseconds(), 60_000)
    }

    /// Whole hours still owed: `window_hours - floor(elapsed_hours)`.
    ///
    /// A claim 23h59m after the last spin reports `1`. Never above the window
    /// length and never below zero.
    #[must_use]
    pub fn hours_left(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
        let Some(last) = last else {
            return 0;
        };
        let window_hours = self.duration_secs / 3_600;
        let elapsed_hours = (now - last).num_hours().max(0);
        u64::try_from(window_hours.saturating_sub(elapsed_hours).max(0)).unwrap_or(0)
    }
}

fn ceil_div(value: i64, unit: i64) -> u64 {
    if value <= 0 {
        return 0;
    }
    u64::try_from((value + unit - 1) / unit).unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════════
// DAY CLOCK
// ════════════════════════════════════════════════════════════════════════════════

/// Local-day boundary used by the quiz counter.
///
/// The offset is fixed at construction. Zero means UTC days.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayClock {
    offset: FixedOffset,
}

impl Default for DayClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayClock {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Builds a clock from an offset east of UTC in minutes.
    ///
    /// Offsets outside ±24h fall back to UTC.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        match minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// Midnight of the local day containing `now`, as a UTC instant.
    #[must_use]
    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let midnight = local.date_naive().and_time(NaiveTime::MIN);
        match self.offset.from_local_datetime(&midnight).single() {
            Some(dt) => dt.with_timezone(&Utc),
            None => now,
        }
    }

    /// `true` when `ts` is absent or falls before today's local midnight.
    #[must_use]
    pub fn before_today(&self, ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match ts {
            Some(ts) => ts < self.start_of_day(now),
            None => true,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// WEEK BOUNDARY
// ════════════════════════════════════════════════════════════════════════════════

/// Length of a leaderboard week.
pub const WEEK_SECS: i64 = 7 * 86_400;

/// Monday 00:00 UTC of the week containing `now`.
#[must_use]
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_from_monday);
    monday.and_time(NaiveTime::MIN).and_utc()
}

/// Countdown to the next Monday 00:00 UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetCountdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub next_reset: DateTime<Utc>,
}

#[must_use]
pub fn time_until_next_reset(now: DateTime<Utc>) -> ResetCountdown {
    let next_reset = week_start(now) + Duration::seconds(WEEK_SECS);
    let left = next_reset - now;
    ResetCountdown {
        days: left.num_days(),
        hours: left.num_hours() % 24,
        minutes: left.num_minutes() % 60,
        next_reset,
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    const T0: i64 = 1_700_000_000;

    // ── 1. ACTIVE / INACTIVE ────────────────────────────────────────────

    #[test]
    fn test_window_never_started_is_inactive() {
        let w = CooldownWindow::spin();
        assert!(!w.is_active(None, ts(T0)));
        assert_eq!(w.remaining_secs_ceil(None, ts(T0)), 0);
        assert_eq!(w.hours_left(None, ts(T0)), 0);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let w = CooldownWindow::spin();
        let last = Some(ts(T0));
        assert!(w.is_active(last, ts(T0 + SPIN_COOLDOWN_SECS - 1)));
        assert!(!w.is_active(last, ts(T0 + SPIN_COOLDOWN_SECS)));
    }

    #[test]
    fn test_future_last_stays_active() {
        let w = CooldownWindow::reading();
        assert!(w.is_active(Some(ts(T0 + 10)), ts(T0)));
    }

    // ── 2. SPIN HOURS LEFT ──────────────────────────────────────────────

    #[test]
    fn test_hours_left_floor_semantics() {
        let w = CooldownWindow::spin();
        let last = Some(ts(T0));
        // 23h59m elapsed → floor = 23 → 1 hour left
        assert_eq!(w.hours_left(last, ts(T0 + 23 * 3_600 + 59 * 60)), 1);
        // just spun
        assert_eq!(w.hours_left(last, ts(T0)), 24);
        // 1h30m elapsed
        assert_eq!(w.hours_left(last, ts(T0 + 5_400)), 23);
    }

    // ── 3. READING SECONDS ──────────────────────────────────────────────

    #[test]
    fn test_remaining_secs_rounds_up() {
        let w = CooldownWindow::reading();
        let last = Some(ts(T0));
        assert_eq!(w.remaining_secs_ceil(last, ts(T0 + 30)), 90);
        let almost = ts(T0) + Duration::milliseconds(119_500);
        assert_eq!(w.remaining_secs_ceil(last, almost), 1);
        assert_eq!(w.remaining_secs_ceil(last, ts(T0 + 200)), 0);
    }

    // ── 4. SOCIAL MINUTES ───────────────────────────────────────────────

    #[test]
    fn test_remaining_minutes_rounds_up() {
        let w = CooldownWindow::social_wait();
        let started = Some(ts(T0));
        assert_eq!(w.remaining_minutes_ceil(started, ts(T0 + 60)), 14);
        assert_eq!(w.remaining_minutes_ceil(started, ts(T0 + 61)), 14);
        assert_eq!(w.remaining_minutes_ceil(started, ts(T0 + 899)), 1);
        assert_eq!(w.remaining_secs_ceil(started, ts(T0 + 600)), 300);
    }

    // ── 5. DAY CLOCK ────────────────────────────────────────────────────

    #[test]
    fn test_start_of_day_utc() {
        let clock = DayClock::utc();
        // 2023-11-14T22:13:20Z
        let now = ts(T0);
        let start = clock.start_of_day(now);
        assert_eq!(start.to_rfc3339(), "2023-11-14T00:00:00+00:00");
        assert!(clock.before_today(Some(start - Duration::seconds(1)), now));
        assert!(!clock.before_today(Some(start), now));
        assert!(clock.before_today(None, now));
    }

    #[test]
    fn test_start_of_day_with_offset() {
        // UTC+3: 22:13Z is 01:13 local on the 15th
        let clock = DayClock::from_offset_minutes(180);
        let start = clock.start_of_day(ts(T0));
        assert_eq!(start.to_rfc3339(), "2023-11-14T21:00:00+00:00");
        assert_eq!(clock.offset_minutes(), 180);
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        let clock = DayClock::from_offset_minutes(60 * 48);
        assert_eq!(clock.offset_minutes(), 0);
    }

    // ── 6. WEEK BOUNDARY ────────────────────────────────────────────────

    #[test]
    fn test_week_start_is_monday_midnight() {
        // Tuesday 2023-11-14T22:13:20Z
        let start = week_start(ts(T0));
        assert_eq!(start.to_rfc3339(), "2023-11-13T00:00:00+00:00");
        // a Monday midnight maps to itself
        assert_eq!(week_start(start), start);
    }

    #[test]
    fn test_time_until_next_reset() {
        let c = time_until_next_reset(ts(T0));
        assert_eq!(c.next_reset.to_rfc3339(), "2023-11-20T00:00:00+00:00");
        // 5 days 1 hour 46 minutes 40 seconds
        assert_eq!((c.days, c.hours, c.minutes), (5, 1, 46));
    }
}
