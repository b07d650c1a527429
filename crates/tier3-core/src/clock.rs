//! Business-date and timestamp source.
//!
//! The daily transaction cap keys on the calendar date of the request, so the
//! date provider is injectable: production uses [`SystemClock`], tests pin a
//! [`FixedClock`] to exercise day-boundary behavior deterministically.

use chrono::{DateTime, NaiveDate, Utc};

/// Source of "now" for the decision pipeline.
pub trait Clock: Send + Sync {
    /// Current UTC timestamp, used for audit rows and profile touches.
    fn now(&self) -> DateTime<Utc>;

    /// Business date used to key daily transaction counts.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock implementation used by the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Convenience constructor from an ISO date, pinned to noon UTC.
    ///
    /// # Panics
    ///
    /// Panics if the date is invalid; intended for test fixtures only.
    #[must_use]
    pub fn on_date(year: i32, month: u32, day: u32) -> Self {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .expect("valid fixture date")
            .and_hms_opt(12, 0, 0)
            .expect("valid fixture time");
        Self {
            now: DateTime::from_naive_utc_and_offset(date, Utc),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
