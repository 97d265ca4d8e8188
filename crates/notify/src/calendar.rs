//! Business calendar gate: weekends, cached holidays, work-hour window.
//!
//! All date math lives on [`CalendarConfig`] as pure functions over an
//! explicit holiday set, so the rules are testable without a provider.
//! [`BusinessCalendar`] adds the per-year holiday cache (6 h TTL) on top and
//! fails open when the provider is unavailable: a missed holiday only makes
//! the gate too permissive, never blocks a send.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tokio::sync::RwLock;

use shopline_core::types::Timestamp;

use crate::holidays::{HolidayLookup, HolidayProvider};

/// How long a fetched per-year holiday set stays fresh.
const HOLIDAY_CACHE_TTL: Duration = Duration::from_secs(6 * 3600);

/// Bound on the forward day-by-day walk in `next_sendable_from`, so it
/// terminates even if every examined day is a holiday.
const MAX_FORWARD_DAYS: u64 = 10;

// ---------------------------------------------------------------------------
// CalendarConfig
// ---------------------------------------------------------------------------

/// Organization calendar settings: fixed timezone offset and the half-open
/// daily work window.
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Offset from UTC in minutes (e.g. `-180` for the shop's timezone).
    pub utc_offset_minutes: i32,
    /// Inclusive start of the send window.
    pub work_start: NaiveTime,
    /// Exclusive end of the send window.
    pub work_end: NaiveTime,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -180,
            work_start: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
        }
    }
}

impl CalendarConfig {
    /// Load from environment variables with defaults.
    ///
    /// | Env Var                      | Default  |
    /// |------------------------------|----------|
    /// | `CALENDAR_UTC_OFFSET_MINUTES`| `-180`   |
    /// | `CALENDAR_WORK_START`        | `07:30`  |
    /// | `CALENDAR_WORK_END`          | `18:30`  |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let utc_offset_minutes = std::env::var("CALENDAR_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.utc_offset_minutes);
        let work_start = std::env::var("CALENDAR_WORK_START")
            .ok()
            .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
            .unwrap_or(defaults.work_start);
        let work_end = std::env::var("CALENDAR_WORK_END")
            .ok()
            .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
            .unwrap_or(defaults.work_end);

        Self {
            utc_offset_minutes,
            work_start,
            work_end,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .expect("CALENDAR_UTC_OFFSET_MINUTES out of range")
    }

    fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn is_working_day(&self, date: NaiveDate, holidays: &HashSet<NaiveDate>) -> bool {
        !Self::is_weekend(date) && !holidays.contains(&date)
    }

    /// Whether a local clock time falls inside the half-open work window.
    fn within_window(&self, time: NaiveTime) -> bool {
        time >= self.work_start && time < self.work_end
    }

    /// Pure form of the gate: can a send happen at `now` given this holiday
    /// set?
    pub fn can_send_at(&self, now: DateTime<Utc>, holidays: &HashSet<NaiveDate>) -> bool {
        let local = now.with_timezone(&self.offset());
        self.is_working_day(local.date_naive(), holidays) && self.within_window(local.time())
    }

    /// Pure form of the next-permitted-instant computation.
    ///
    /// Returns `now` itself when the gate is already open. Otherwise walks
    /// forward day-by-day (at most [`MAX_FORWARD_DAYS`] steps) skipping
    /// weekends and holidays, and returns the first qualifying day at the
    /// work-start time. If the bound is hit, the last examined day is
    /// returned so the computation always terminates.
    pub fn next_sendable_from(&self, now: DateTime<Utc>, holidays: &HashSet<NaiveDate>) -> Timestamp {
        if self.can_send_at(now, holidays) {
            return now;
        }

        let offset = self.offset();
        let local = now.with_timezone(&offset);
        let today = local.date_naive();

        let mut candidate = today;
        for step in 0..=MAX_FORWARD_DAYS {
            candidate = today + Days::new(step);
            // Today only qualifies while the work window is still ahead.
            let start_is_ahead = step > 0 || local.time() < self.work_start;
            if start_is_ahead && self.is_working_day(candidate, holidays) {
                break;
            }
        }

        let local_start = candidate.and_time(self.work_start);
        offset
            .from_local_datetime(&local_start)
            .single()
            .expect("fixed-offset local time is unambiguous")
            .with_timezone(&Utc)
    }
}

// ---------------------------------------------------------------------------
// BusinessCalendar
// ---------------------------------------------------------------------------

struct CachedYear {
    fetched_at: Instant,
    holidays: HashSet<NaiveDate>,
}

/// Calendar gate with a TTL-cached holiday set per year.
pub struct BusinessCalendar {
    config: CalendarConfig,
    provider: Arc<dyn HolidayProvider>,
    cache: RwLock<HashMap<i32, CachedYear>>,
}

impl BusinessCalendar {
    pub fn new(config: CalendarConfig, provider: Arc<dyn HolidayProvider>) -> Self {
        Self {
            config,
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a send is permitted right now.
    pub async fn can_send_now(&self) -> bool {
        self.can_send_at(Utc::now()).await
    }

    /// Gate decision for an arbitrary instant.
    pub async fn can_send_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.config.offset());

        // Weekend fast path: no holiday lookup needed.
        if CalendarConfig::is_weekend(local.date_naive()) {
            return false;
        }

        let holidays = self.holidays_for(local.year()).await;
        self.config.can_send_at(now, &holidays)
    }

    /// The next instant at which a send is permitted.
    pub async fn next_sendable_time(&self) -> Timestamp {
        self.next_sendable_from(Utc::now()).await
    }

    /// Next permitted instant from an arbitrary starting point.
    ///
    /// The forward walk can cross a year boundary, so the holiday sets of
    /// both the current and the following year are merged before the pure
    /// computation runs.
    pub async fn next_sendable_from(&self, now: DateTime<Utc>) -> Timestamp {
        let local = now.with_timezone(&self.config.offset());
        let year = local.year();

        let mut holidays = self.holidays_for(year).await;
        let horizon = local.date_naive() + Days::new(MAX_FORWARD_DAYS);
        if horizon.year() != year {
            holidays.extend(self.holidays_for(horizon.year()).await);
        }

        self.config.next_sendable_from(now, &holidays)
    }

    /// Cached holiday set for a year, refreshed on a fixed TTL.
    ///
    /// Provider unavailability never surfaces as an error: the previous
    /// (possibly stale) set is kept when one exists, otherwise the gate
    /// proceeds with an empty set.
    async fn holidays_for(&self, year: i32) -> HashSet<NaiveDate> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&year) {
                if entry.fetched_at.elapsed() < HOLIDAY_CACHE_TTL {
                    return entry.holidays.clone();
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(entry) = cache.get(&year) {
            if entry.fetched_at.elapsed() < HOLIDAY_CACHE_TTL {
                return entry.holidays.clone();
            }
        }

        let holidays = match self.provider.get_holidays(year).await {
            HolidayLookup::Available(list) => list.into_iter().map(|h| h.date).collect(),
            HolidayLookup::Unavailable => {
                let stale = cache.remove(&year).map(|e| e.holidays).unwrap_or_default();
                tracing::warn!(
                    year,
                    known_holidays = stale.len(),
                    "Holiday provider unavailable, calendar gate failing open"
                );
                stale
            }
        };

        cache.insert(
            year,
            CachedYear {
                fetched_at: Instant::now(),
                holidays: holidays.clone(),
            },
        );
        holidays
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holidays::{Holiday, StaticHolidayProvider};
    use async_trait::async_trait;

    fn config() -> CalendarConfig {
        CalendarConfig::default()
    }

    /// Build the UTC instant for a local (offset -03:00) date and time.
    fn local(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(-3 * 3600).unwrap();
        offset
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(hh, mm, 0)
                    .unwrap(),
            )
            .unwrap()
            .with_timezone(&Utc)
    }

    fn no_holidays() -> HashSet<NaiveDate> {
        HashSet::new()
    }

    // 2024-06-07 is a Friday; 2024-06-10 the following Monday.

    #[test]
    fn friday_evening_is_blocked() {
        assert!(!config().can_send_at(local(2024, 6, 7, 19, 0), &no_holidays()));
    }

    #[test]
    fn friday_evening_rolls_to_monday_work_start() {
        let next = config().next_sendable_from(local(2024, 6, 7, 19, 0), &no_holidays());
        assert_eq!(next, local(2024, 6, 10, 7, 30));
    }

    #[test]
    fn weekday_within_window_is_open() {
        let now = local(2024, 6, 5, 10, 0);
        assert!(config().can_send_at(now, &no_holidays()));
        assert_eq!(config().next_sendable_from(now, &no_holidays()), now);
    }

    #[test]
    fn window_start_inclusive_end_exclusive() {
        let cfg = config();
        assert!(cfg.can_send_at(local(2024, 6, 5, 7, 30), &no_holidays()));
        assert!(!cfg.can_send_at(local(2024, 6, 5, 18, 30), &no_holidays()));
        assert!(cfg.can_send_at(local(2024, 6, 5, 18, 29), &no_holidays()));
    }

    #[test]
    fn before_work_start_waits_for_today() {
        let next = config().next_sendable_from(local(2024, 6, 5, 6, 0), &no_holidays());
        assert_eq!(next, local(2024, 6, 5, 7, 30));
    }

    #[test]
    fn saturday_is_blocked_and_rolls_to_monday() {
        let cfg = config();
        let now = local(2024, 6, 8, 10, 0);
        assert!(!cfg.can_send_at(now, &no_holidays()));
        assert_eq!(
            cfg.next_sendable_from(now, &no_holidays()),
            local(2024, 6, 10, 7, 30)
        );
    }

    #[test]
    fn holiday_is_skipped() {
        let mut holidays = HashSet::new();
        holidays.insert(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());

        let cfg = config();
        assert!(!cfg.can_send_at(local(2024, 6, 10, 10, 0), &holidays));
        // Friday evening now rolls past the Monday holiday to Tuesday.
        assert_eq!(
            cfg.next_sendable_from(local(2024, 6, 7, 19, 0), &holidays),
            local(2024, 6, 11, 7, 30)
        );
    }

    #[test]
    fn forward_walk_terminates_when_every_day_is_blocked() {
        let mut holidays = HashSet::new();
        for day in 1..=30 {
            holidays.insert(NaiveDate::from_ymd_opt(2024, 6, day).unwrap());
        }
        // Must return something within the bound rather than loop forever.
        let next = config().next_sendable_from(local(2024, 6, 3, 10, 0), &holidays);
        assert!(next > local(2024, 6, 3, 10, 0));
    }

    #[tokio::test]
    async fn gate_uses_provider_holidays() {
        let provider = StaticHolidayProvider::new(vec![Holiday {
            date: NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
            description: "Shop anniversary".into(),
        }]);
        let calendar = BusinessCalendar::new(config(), Arc::new(provider));

        assert!(!calendar.can_send_at(local(2024, 6, 5, 10, 0)).await);
        assert!(calendar.can_send_at(local(2024, 6, 6, 10, 0)).await);
    }

    struct UnavailableProvider;

    #[async_trait]
    impl HolidayProvider for UnavailableProvider {
        async fn get_holidays(&self, _year: i32) -> HolidayLookup {
            HolidayLookup::Unavailable
        }
    }

    #[tokio::test]
    async fn provider_failure_fails_open() {
        let calendar = BusinessCalendar::new(config(), Arc::new(UnavailableProvider));
        // Ordinary weekday: treated as a working day despite the dead provider.
        assert!(calendar.can_send_at(local(2024, 6, 5, 10, 0)).await);
    }

    #[tokio::test]
    async fn weekend_fast_path_skips_provider() {
        // The weekend branch answers before the (dead) provider is consulted.
        let calendar = BusinessCalendar::new(config(), Arc::new(UnavailableProvider));
        assert!(!calendar.can_send_at(local(2024, 6, 8, 10, 0)).await);
    }
}
