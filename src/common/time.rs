// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    ops::Deref,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

pub const NANOSECOND: i64 = 1;
pub const MICROSECOND: i64 = NANOSECOND * 1000;
pub const MILLISECOND: i64 = MICROSECOND * 1000;
pub const SECOND: i64 = MILLISECOND * 1000;
pub const MINUTE: i64 = SECOND * 60;
pub const HOUR: i64 = MINUTE * 60;
pub const DAY: i64 = HOUR * 24;

/// Nanoseconds since the Unix epoch. Wall-clock time: used for file naming
/// and every DB timestamp (§4.1).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixNano(i64);

impl UnixNano {
    #[must_use]
    pub fn now() -> Self {
        Self(
            i64::try_from(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("time went backwards")
                    .as_nanos(),
            )
            .expect("timestamp to fit i64"),
        )
    }

    #[must_use]
    pub fn add_duration(&self, duration: Duration) -> Option<Self> {
        Some(Self(self.0.checked_add(duration.0)?))
    }

    #[must_use]
    pub fn sub_duration(&self, duration: Duration) -> Option<Self> {
        Some(Self(self.0.checked_sub(duration.0)?))
    }

    /// Reports whether the time instant `self` is after `other`.
    #[must_use]
    pub fn after(&self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Reports whether the time instant `self` is before `other`.
    #[must_use]
    pub fn before(&self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns the duration `self - other`.
    #[must_use]
    pub fn sub(&self, other: Self) -> Option<Duration> {
        self.0.checked_sub(other.0).map(Duration)
    }

    #[must_use]
    pub fn as_chrono(&self) -> Option<NaiveDateTime> {
        let sec = self.0.div_euclid(SECOND);
        let nsec = self.0.rem_euclid(SECOND);
        #[allow(clippy::as_conversions)]
        DateTime::from_timestamp(sec, nsec as u32).map(|dt| dt.naive_utc())
    }

    #[must_use]
    pub fn from_chrono(dt: NaiveDateTime) -> Self {
        let ts: DateTime<Utc> = dt.and_utc();
        Self(ts.timestamp_nanos_opt().unwrap_or(0))
    }

    pub const MAX: UnixNano = UnixNano(i64::MAX);
    pub const ZERO: UnixNano = UnixNano(0);
}

impl From<i64> for UnixNano {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl Deref for UnixNano {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for UnixNano {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `std::time::Duration` but signed and without the u128 conversions,
/// matching the precision of `UnixNano`.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Duration(i64);

impl Duration {
    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        Self(secs * SECOND)
    }

    #[must_use]
    pub fn from_minutes(minutes: i64) -> Self {
        Self(minutes * MINUTE)
    }

    #[must_use]
    pub fn from_hours(hours: i64) -> Self {
        Self(hours * HOUR)
    }

    #[must_use]
    pub fn from_days(days: i64) -> Self {
        Self(days * DAY)
    }

    #[must_use]
    pub fn as_std(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_nanos(u64::try_from(self.0).ok()?))
    }

    #[must_use]
    pub fn as_secs(&self) -> i64 {
        self.0 / SECOND
    }
}

impl From<i64> for Duration {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl Deref for Duration {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Monotonic clock, used for timeouts, age-of-activity, and backoff (§4.1).
/// Never used for file naming or anything persisted, since it has no
/// relationship to wall-clock time across restarts.
#[derive(Clone, Copy, Debug)]
pub struct Monotonic(Instant);

impl Monotonic {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.0.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_after_before() {
        let a = UnixNano::from(100);
        let b = UnixNano::from(200);
        assert!(b.after(a));
        assert!(a.before(b));
        assert!(!a.after(b));
    }

    #[test]
    fn test_add_sub_duration() {
        let a = UnixNano::from(1000);
        let d = Duration::from_nanos(500);
        assert_eq!(a.add_duration(d), Some(UnixNano::from(1500)));
        assert_eq!(a.sub_duration(d), Some(UnixNano::from(500)));
    }

    #[test]
    fn test_sub() {
        let a = UnixNano::from(1000);
        let b = UnixNano::from(400);
        assert_eq!(a.sub(b), Some(Duration::from_nanos(600)));
    }

    #[test]
    fn test_duration_from_days() {
        assert_eq!(Duration::from_days(1), Duration::from_secs(86400));
    }
}
