//! MS-DOS packed date/time, the timestamp format of ZIP headers
//!
//! The format has a two second resolution and covers 1980-01-01 00:00:00 up to
//! 2107-12-31 23:59:58. Wall-clock values are interpreted as UTC.

use crate::error::{Result, ZipError};
use std::time::{SystemTime, UNIX_EPOCH};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2107;

/// Packed DOS `(time, date)` pair as stored in local and central headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime {
        time: 0,
        date: 1 | (1 << 5),
    };

    /// 2107-12-31 23:59:58
    pub const MAX: DosDateTime = DosDateTime {
        time: 29 | (59 << 5) | (23 << 11),
        date: 31 | (12 << 5) | (127 << 9),
    };

    /// Pack a calendar timestamp, rejecting years the format cannot represent
    pub fn try_from_datetime(dt: PrimitiveDateTime) -> Result<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&dt.year()) {
            return Err(ZipError::InvalidTimestamp(dt.to_string()));
        }
        Ok(Self::pack(dt))
    }

    /// Pack a calendar timestamp, saturating at the ends of the DOS range
    pub fn from_datetime_clamped(dt: PrimitiveDateTime) -> Self {
        if dt.year() < MIN_YEAR {
            Self::MIN
        } else if dt.year() > MAX_YEAR {
            Self::MAX
        } else {
            Self::pack(dt)
        }
    }

    /// Pack a filesystem timestamp (UTC), saturating at the ends of the DOS range
    pub fn from_system_time(t: SystemTime) -> Self {
        // anything before 1970 is already below the DOS floor
        let Ok(since_epoch) = t.duration_since(UNIX_EPOCH) else {
            return Self::MIN;
        };
        let dt = i64::try_from(since_epoch.as_secs())
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());
        match dt {
            Some(dt) => {
                Self::from_datetime_clamped(PrimitiveDateTime::new(dt.date(), dt.time()))
            }
            None => Self::MAX,
        }
    }

    /// Current time (UTC)
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Unpack into a calendar timestamp, `None` when the packed bits are not a valid date
    pub fn to_datetime(self) -> Option<PrimitiveDateTime> {
        let year = MIN_YEAR + i32::from(self.date >> 9);
        let month = Month::try_from(((self.date >> 5) & 0x0F) as u8).ok()?;
        let day = (self.date & 0x1F) as u8;
        let date = Date::from_calendar_date(year, month, day).ok()?;

        let hour = (self.time >> 11) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let second = ((self.time & 0x1F) * 2) as u8;
        let time = Time::from_hms(hour, minute, second).ok()?;

        Some(PrimitiveDateTime::new(date, time))
    }

    fn pack(dt: PrimitiveDateTime) -> Self {
        let time = (u16::from(dt.second()) / 2)
            | (u16::from(dt.minute()) << 5)
            | (u16::from(dt.hour()) << 11);
        let date = u16::from(dt.day())
            | (u16::from(u8::from(dt.month())) << 5)
            | (((dt.year() - MIN_YEAR) as u16) << 9);
        Self { time, date }
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<PrimitiveDateTime> for DosDateTime {
    type Error = ZipError;

    fn try_from(dt: PrimitiveDateTime) -> Result<Self> {
        Self::try_from_datetime(dt)
    }
}
