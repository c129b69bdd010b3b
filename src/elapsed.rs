use chrono::{DateTime, TimeZone, Utc};

use std::time::Duration;

/// A full calendar day.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Seven full days.
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Elapsed time since the most recent daily reset boundary.
///
/// The boundary falls at UTC midnight plus `shift` each day. Instants are
/// normalized to UTC before the boundary arithmetic, so two representations
/// of the same moment in different zones always produce the same value.
///
/// Values built by [`new`](Self::new) are always in `[0, 24h)`. Values built
/// directly from a raw duration (via `From<Duration>`) may be 24h or more and
/// represent a boundary that was not reset in time; for those,
/// [`remaining`](Self::remaining) is zero and [`full_hours`](Self::full_hours)
/// exceeds 23.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use timesource::DayElapsed;
///
/// // Boundary at 15:00 UTC every day.
/// let now = Utc.with_ymd_and_hms(2021, 3, 15, 15, 59, 30).unwrap();
/// let elapsed = DayElapsed::new(now, Duration::from_secs(15 * 3600));
///
/// assert_eq!(elapsed.as_duration(), Duration::from_secs(59 * 60 + 30));
/// assert_eq!(elapsed.full_hours(), 0);
/// assert_eq!(elapsed.remaining(), Duration::from_secs(23 * 3600 + 30));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayElapsed(Duration);

impl DayElapsed {
    /// Elapsed time at `current` since the last boundary at midnight plus
    /// `shift`.
    ///
    /// An instant exactly on the boundary belongs to the new day: elapsed is
    /// zero and [`remaining`](Self::remaining) is a full day. Shifts of 24h or
    /// more reduce modulo one day. Millisecond precision.
    pub fn new<Tz: TimeZone>(current: DateTime<Tz>, shift: Duration) -> Self {
        let now_ms = current.with_timezone(&Utc).timestamp_millis();
        let shift_ms = (shift.as_millis() % DAY_MS as u128) as i64;
        // Euclidean remainders keep the result in [0, 24h): when the time of
        // day precedes the boundary, the relevant boundary is yesterday's.
        let elapsed_ms = (now_ms.rem_euclid(DAY_MS) - shift_ms).rem_euclid(DAY_MS);
        Self(Duration::from_millis(elapsed_ms as u64))
    }

    fn hours(&self) -> f64 {
        self.0.as_secs_f64() / 3600.0
    }

    /// Whole hours elapsed since the boundary. Exceeds 23 only for values
    /// constructed directly from a duration of 24h or more.
    pub fn full_hours(&self) -> u64 {
        self.0.as_secs() / 3600
    }

    /// Fraction of the current hour already elapsed, in `[0, 1)`.
    pub fn hour_part(&self) -> f64 {
        self.hours().fract()
    }

    /// Time until the next boundary; zero for overdue values.
    pub fn remaining(&self) -> Duration {
        DAY.saturating_sub(self.0)
    }

    /// The elapsed time as a plain duration.
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for DayElapsed {
    fn from(elapsed: Duration) -> Self {
        Self(elapsed)
    }
}

impl From<DayElapsed> for Duration {
    fn from(elapsed: DayElapsed) -> Self {
        elapsed.0
    }
}
