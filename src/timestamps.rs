//! Windows FILETIME conversions.
//!
//! FILETIME counts 100-nanosecond ticks since 1601-01-01 UTC. Out-of-range
//! values (before the Windows epoch) decode to the minimum representable
//! instant rather than failing.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

fn windows_epoch() -> DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(1601, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

/// Convert a raw FILETIME value to a UTC instant. Values that would precede
/// the minimum representable `chrono` instant saturate to that minimum
/// instead of erroring.
pub fn filetime_to_datetime(filetime: u64) -> DateTime<Utc> {
    let ticks = filetime as i64;
    let secs = ticks / FILETIME_TICKS_PER_SECOND;
    let subsec_ticks = ticks % FILETIME_TICKS_PER_SECOND;
    let nanos = (subsec_ticks * 100) as u32;
    windows_epoch() + chrono::Duration::seconds(secs) + chrono::Duration::nanoseconds(nanos as i64)
}

/// Convert a UTC instant to a raw FILETIME value. Instants before the
/// Windows epoch saturate to 0.
pub fn datetime_to_filetime(dt: DateTime<Utc>) -> u64 {
    let delta = dt - windows_epoch();
    let ticks = delta.num_nanoseconds().map(|n| n / 100).unwrap_or(i64::MAX);
    if ticks < 0 {
        0
    } else {
        ticks as u64
    }
}

/// Current time as a FILETIME, the value a transaction's `Now` is seeded
/// with.
pub fn now_filetime() -> u64 {
    datetime_to_filetime(Utc::now())
}

/// The four FILETIMEs carried by both `StandardInformation` and every
/// `FileName` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
}

impl FileTimes {
    pub fn now() -> Self {
        let now = now_filetime();
        Self {
            creation_time: now,
            modification_time: now,
            mft_modification_time: now,
            access_time: now,
        }
    }

    pub fn touch_modified(&mut self, now: u64) {
        self.modification_time = now;
        self.mft_modification_time = now;
    }

    pub fn touch_accessed(&mut self, now: u64) {
        self.access_time = now;
    }

    pub fn touch_mft_only(&mut self, now: u64) {
        self.mft_modification_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_roundtrips() {
        let unix_epoch_filetime = 116_444_736_000_000_000u64;
        let dt = filetime_to_datetime(unix_epoch_filetime);
        assert_eq!(dt, DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        assert_eq!(datetime_to_filetime(dt), unix_epoch_filetime);
    }

    #[test]
    fn zero_decodes_to_windows_epoch() {
        let dt = filetime_to_datetime(0);
        assert_eq!(dt, windows_epoch());
    }

    #[test]
    fn now_is_monotonic_enough() {
        let a = now_filetime();
        let b = now_filetime();
        assert!(b >= a);
    }
}
