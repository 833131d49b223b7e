//! MS-DOS and NTFS timestamp conversion.
//!
//! ZIP headers store the modification time as a packed DOS date/time pair
//! with two-second precision and a 1980..=2107 year range. Extra fields can
//! carry more precise values: NTFS 100 ns ticks since 1601 or Unix seconds.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

/// Seconds between 1601-01-01 and 1970-01-01.
const NTFS_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// NTFS ticks per second (100 ns resolution).
const NTFS_TICKS_PER_SEC: i64 = 10_000_000;

/// A packed DOS date/time pair as stored in ZIP headers.
///
/// Time: bits 0-4 seconds / 2, bits 5-10 minutes, bits 11-15 hours.
/// Date: bits 0-4 day, bits 5-8 month, bits 9-15 years since 1980.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DosDateTime {
    /// Packed time field.
    pub time: u16,
    /// Packed date field.
    pub date: u16,
}

impl DosDateTime {
    /// Earliest representable instant: 1980-01-01 00:00:00.
    pub const MIN: Self = Self {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Wrap raw header fields.
    pub const fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    /// Pack a calendar time, clamping to the DOS year range.
    ///
    /// Seconds are truncated to an even value.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::MIN;
        }
        if dt.year() > 2107 {
            return Self {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        let date =
            (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        Self { time, date }
    }

    /// Current local time.
    pub fn now() -> Self {
        Self::from_naive(&chrono::Local::now().naive_local())
    }

    /// Unpack into a calendar time. Returns `None` for out-of-range fields
    /// (month 0, hour 25 and the like), which some writers emit.
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let seconds = (self.time & 0x1F) as u32 * 2;
        let minutes = ((self.time >> 5) & 0x3F) as u32;
        let hours = ((self.time >> 11) & 0x1F) as u32;

        let day = (self.date & 0x1F) as u32;
        let month = ((self.date >> 5) & 0x0F) as u32;
        let year = ((self.date >> 9) & 0x7F) as i32 + 1980;

        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hours, minutes, seconds)
    }

    /// High byte of the time field, used as the legacy cipher check byte
    /// when sizes are deferred to a data descriptor.
    pub fn check_byte(self) -> u8 {
        (self.time >> 8) as u8
    }
}

impl From<NaiveDateTime> for DosDateTime {
    fn from(dt: NaiveDateTime) -> Self {
        Self::from_naive(&dt)
    }
}

/// Convert NTFS ticks (100 ns since 1601-01-01 UTC) to a calendar time.
pub fn ntfs_to_naive(ticks: u64) -> Option<NaiveDateTime> {
    let ticks = i64::try_from(ticks).ok()?;
    let secs = ticks / NTFS_TICKS_PER_SEC - NTFS_EPOCH_OFFSET_SECS;
    let nanos = (ticks % NTFS_TICKS_PER_SEC) as u32 * 100;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Convert a calendar time (taken as UTC) to NTFS ticks.
///
/// Instants before 1601 saturate to zero.
pub fn naive_to_ntfs(dt: &NaiveDateTime) -> u64 {
    let utc = dt.and_utc();
    let secs = utc.timestamp() + NTFS_EPOCH_OFFSET_SECS;
    if secs < 0 {
        return 0;
    }
    secs as u64 * NTFS_TICKS_PER_SEC as u64 + (utc.timestamp_subsec_nanos() / 100) as u64
}

/// Convert Unix seconds (extended timestamp extra field) to a calendar time.
pub fn unix_to_naive(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// Truncate a calendar time to DOS precision (even seconds, no fraction).
pub fn truncate_to_dos(dt: &NaiveDateTime) -> NaiveDateTime {
    let extra = TimeDelta::seconds((dt.second() % 2) as i64)
        + TimeDelta::nanoseconds(dt.nanosecond() as i64);
    *dt - extra
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_dos_pack_unpack() {
        let dt = ymd_hms(2021, 7, 15, 13, 45, 30);
        let dos = DosDateTime::from_naive(&dt);
        assert_eq!(dos.time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(dos.date, (41 << 9) | (7 << 5) | 15);
        assert_eq!(dos.to_naive(), Some(dt));
    }

    #[test]
    fn test_dos_odd_seconds_truncated() {
        let dt = ymd_hms(2000, 1, 1, 0, 0, 59);
        let dos = DosDateTime::from_naive(&dt);
        assert_eq!(dos.to_naive(), Some(ymd_hms(2000, 1, 1, 0, 0, 58)));
        assert_eq!(truncate_to_dos(&dt), ymd_hms(2000, 1, 1, 0, 0, 58));
    }

    #[test]
    fn test_dos_clamping() {
        let early = ymd_hms(1970, 1, 1, 0, 0, 0);
        assert_eq!(DosDateTime::from_naive(&early), DosDateTime::MIN);
        assert_eq!(DosDateTime::MIN.to_naive(), Some(ymd_hms(1980, 1, 1, 0, 0, 0)));

        let late = ymd_hms(2200, 1, 1, 0, 0, 0);
        assert_eq!(
            DosDateTime::from_naive(&late).to_naive(),
            Some(ymd_hms(2107, 12, 31, 23, 59, 58))
        );
    }

    #[test]
    fn test_dos_invalid_fields() {
        // Month zero
        assert_eq!(DosDateTime::new(0, 1).to_naive(), None);
        assert_eq!(DosDateTime::default().to_naive(), None);
    }

    #[test]
    fn test_check_byte() {
        let dos = DosDateTime::new(0xAB12, 0);
        assert_eq!(dos.check_byte(), 0xAB);
    }

    #[test]
    fn test_ntfs_epoch() {
        let unix_epoch = ymd_hms(1970, 1, 1, 0, 0, 0);
        assert_eq!(naive_to_ntfs(&unix_epoch), 116_444_736_000_000_000);
        assert_eq!(ntfs_to_naive(116_444_736_000_000_000), Some(unix_epoch));
    }

    #[test]
    fn test_ntfs_subsecond() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_nano_opt(12, 0, 1, 123_456_700)
            .unwrap();
        let ticks = naive_to_ntfs(&dt);
        assert_eq!(ntfs_to_naive(ticks), Some(dt));
    }

    #[test]
    fn test_unix_to_naive() {
        assert_eq!(
            unix_to_naive(1_000_000_000),
            Some(ymd_hms(2001, 9, 9, 1, 46, 40))
        );
    }
}
