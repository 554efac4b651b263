//! Clock and timezone resolution.
//!
//! All day-boundary math lives here. The rest of the engine receives resolved
//! calendar dates and window states, never raw instants, so tests can pin time
//! with `FixedClock`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::errors::AppError;

/// Hours past local midnight during which the previous day stays claimable.
pub const CLAIM_GRACE_HOURS: i64 = 3;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replay tooling.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A validated IANA timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserTimezone(Tz);

impl UserTimezone {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidTimezone(raw.to_string()));
        }
        trimmed
            .parse::<Tz>()
            .map(UserTimezone)
            .map_err(|_| AppError::InvalidTimezone(raw.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn tz(&self) -> Tz {
        self.0
    }
}

/// Where an instant falls relative to a date's claim window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NotYetOpen,
    Open,
    Closed,
}

pub fn local_date(tz: UserTimezone, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&tz.tz()).date_naive()
}

/// First instant of `date` in `tz`.
pub fn start_of_day(tz: UserTimezone, date: NaiveDate) -> DateTime<Utc> {
    // DST can skip local midnight; the day then starts at the first valid hour.
    (0..24)
        .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
        .find_map(|local| tz.tz().from_local_datetime(&local).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::default())))
}

/// 03:00 local wall-clock time on `date + 1`. Claims for `date` must land
/// strictly before this instant.
pub fn claim_cutoff(tz: UserTimezone, date: NaiveDate) -> DateTime<Utc> {
    let next = date + Duration::days(1);
    next.and_hms_opt(CLAIM_GRACE_HOURS as u32, 0, 0)
        .and_then(|local| tz.tz().from_local_datetime(&local).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        // 03:00 itself skipped by a DST jump.
        .unwrap_or_else(|| start_of_day(tz, next) + Duration::hours(CLAIM_GRACE_HOURS))
}

pub fn window_state(tz: UserTimezone, date: NaiveDate, now: DateTime<Utc>) -> WindowState {
    if now < start_of_day(tz, date) {
        WindowState::NotYetOpen
    } else if now < claim_cutoff(tz, date) {
        WindowState::Open
    } else {
        WindowState::Closed
    }
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Shared resolver handed to every component that needs "today".
#[derive(Clone)]
pub struct TimeResolver {
    clock: Arc<dyn Clock>,
}

impl TimeResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self, tz: UserTimezone) -> NaiveDate {
        local_date(tz, self.now())
    }

    pub fn window(&self, tz: UserTimezone, date: NaiveDate) -> WindowState {
        window_state(tz, date, self.now())
    }

    /// Most recent local date whose claim window has fully closed.
    pub fn latest_closed_day(&self, tz: UserTimezone) -> NaiveDate {
        let yesterday = self.today(tz) - Duration::days(1);
        if self.window(tz, yesterday) == WindowState::Closed {
            yesterday
        } else {
            yesterday - Duration::days(1)
        }
    }

    pub fn is_local_monday(&self, tz: UserTimezone) -> bool {
        self.today(tz).weekday() == Weekday::Mon
    }

    /// Instant at which the user's current local week began.
    pub fn current_week_start(&self, tz: UserTimezone) -> DateTime<Utc> {
        start_of_day(tz, week_start(self.today(tz)))
    }

    /// Instant of the next local Monday midnight.
    pub fn next_week_start(&self, tz: UserTimezone) -> DateTime<Utc> {
        start_of_day(tz, week_start(self.today(tz)) + Duration::days(7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz(name: &str) -> UserTimezone {
        UserTimezone::parse(name).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        assert!(matches!(
            UserTimezone::parse("Mars/Olympus_Mons"),
            Err(AppError::InvalidTimezone(_))
        ));
        assert!(matches!(
            UserTimezone::parse("  "),
            Err(AppError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_local_date_crosses_utc_midnight() {
        // 02:30 UTC on Mar 3 is still Mar 2 evening in New York.
        let ny = tz("America/New_York");
        assert_eq!(local_date(ny, utc("2026-03-03T02:30:00Z")), date(2026, 3, 2));
        let tokyo = tz("Asia/Tokyo");
        assert_eq!(local_date(tokyo, utc("2026-03-02T16:00:00Z")), date(2026, 3, 3));
    }

    #[test]
    fn test_window_spans_local_midnight_to_three_am_next_day() {
        let berlin = tz("Europe/Berlin"); // UTC+1 in March before DST
        let d = date(2026, 3, 2);
        assert_eq!(start_of_day(berlin, d), utc("2026-03-01T23:00:00Z"));
        assert_eq!(claim_cutoff(berlin, d), utc("2026-03-03T02:00:00Z"));

        assert_eq!(
            window_state(berlin, d, utc("2026-03-01T22:59:59Z")),
            WindowState::NotYetOpen
        );
        assert_eq!(
            window_state(berlin, d, utc("2026-03-01T23:00:00Z")),
            WindowState::Open
        );
        assert_eq!(
            window_state(berlin, d, utc("2026-03-03T01:59:59Z")),
            WindowState::Open
        );
        assert_eq!(
            window_state(berlin, d, utc("2026-03-03T02:00:00Z")),
            WindowState::Closed
        );
    }

    #[test]
    fn test_cutoff_is_three_am_wall_clock_across_dst() {
        let ny = tz("America/New_York");
        // Springs forward on 2026-03-08: 03:00 EDT.
        assert_eq!(claim_cutoff(ny, date(2026, 3, 7)), utc("2026-03-08T07:00:00Z"));
        // Falls back on 2026-11-01: 03:00 EST.
        assert_eq!(claim_cutoff(ny, date(2026, 10, 31)), utc("2026-11-01T08:00:00Z"));
    }

    #[test]
    fn test_latest_closed_day_respects_grace() {
        let utc_tz = tz("UTC");
        let clock = Arc::new(FixedClock::new(utc("2026-03-04T02:00:00Z")));
        let resolver = TimeResolver::new(clock.clone());
        assert_eq!(resolver.latest_closed_day(utc_tz), date(2026, 3, 2));
        clock.set(utc("2026-03-04T03:00:00Z"));
        assert_eq!(resolver.latest_closed_day(utc_tz), date(2026, 3, 3));
    }

    #[test]
    fn test_week_boundaries_are_local_mondays() {
        // 2026-03-02 is a Monday.
        assert_eq!(week_start(date(2026, 3, 4)), date(2026, 3, 2));
        assert_eq!(week_start(date(2026, 3, 2)), date(2026, 3, 2));

        let clock = Arc::new(FixedClock::new(utc("2026-03-01T20:00:00Z")));
        let resolver = TimeResolver::new(clock);
        // Sunday evening in UTC, already Monday in Tokyo.
        assert!(!resolver.is_local_monday(tz("UTC")));
        assert!(resolver.is_local_monday(tz("Asia/Tokyo")));
        assert_eq!(
            resolver.current_week_start(tz("Asia/Tokyo")),
            utc("2026-03-01T15:00:00Z")
        );
        assert_eq!(
            resolver.next_week_start(tz("UTC")),
            utc("2026-03-02T00:00:00Z")
        );
    }
}
