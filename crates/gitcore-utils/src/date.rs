use bstr::{BStr, BString, ByteSlice, ByteVec};
use chrono::Local;

use crate::error::UtilError;
use crate::Result;

/// A timestamp with the author's timezone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GitDate {
    /// Seconds since Unix epoch.
    pub timestamp: i64,
    /// Timezone offset in minutes from UTC (e.g., -300 for EST).
    pub tz_offset: i32,
}

/// `-0130` style decimal offset to minutes.
fn decimal_tz_to_minutes(tz: i32) -> i32 {
    let sign = if tz < 0 { -1 } else { 1 };
    let abs = tz.unsigned_abs() as i32;
    sign * ((abs / 100) * 60 + abs % 100)
}

fn minutes_to_decimal_tz(minutes: i32) -> i32 {
    let sign = if minutes < 0 { -1 } else { 1 };
    let abs = minutes.unsigned_abs() as i32;
    sign * ((abs / 60) * 100 + abs % 60)
}

impl GitDate {
    pub fn new(timestamp: i64, tz_offset_minutes: i32) -> Self {
        Self {
            timestamp,
            tz_offset: tz_offset_minutes,
        }
    }

    /// The current time in the local timezone.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            timestamp: now.timestamp(),
            tz_offset: now.offset().local_minus_utc() / 60,
        }
    }

    /// Parse `"<timestamp> <+hhmm>"`; the offset may be omitted.
    pub fn parse_raw(input: &str) -> Result<Self> {
        let mut parts = input.trim().splitn(2, ' ');
        let ts = parts.next().unwrap_or_default();
        let timestamp: i64 = ts
            .parse()
            .map_err(|_| UtilError::DateParse(format!("invalid timestamp: '{ts}'")))?;

        let tz_offset = match parts.next() {
            Some(tz) => {
                let tz = tz.trim();
                let value: i32 = tz
                    .parse()
                    .map_err(|_| UtilError::DateParse(format!("invalid timezone: '{tz}'")))?;
                decimal_tz_to_minutes(value)
            }
            None => 0,
        };

        Ok(Self {
            timestamp,
            tz_offset,
        })
    }

    /// Format as `"<timestamp> <+hhmm>"`.
    pub fn to_raw(&self) -> String {
        let tz = minutes_to_decimal_tz(self.tz_offset);
        let sign = if self.tz_offset < 0 { '-' } else { '+' };
        format!("{} {}{:04}", self.timestamp, sign, tz.abs())
    }
}

/// Author/committer identity with timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub date: GitDate,
}

impl Signature {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, date: GitDate) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            date,
        }
    }

    /// Parse `Name <email> timestamp tz`.
    pub fn parse(input: &BStr) -> Result<Self> {
        let input = input.as_bytes();

        let gt = input
            .rfind_byte(b'>')
            .ok_or_else(|| UtilError::Signature("missing '>'".into()))?;
        let lt = input[..gt]
            .rfind_byte(b'<')
            .ok_or_else(|| UtilError::Signature("missing '<'".into()))?;

        let date = std::str::from_utf8(input[gt + 1..].trim())
            .map_err(|_| UtilError::Signature("non-UTF-8 date".into()))?;

        Ok(Self {
            name: BString::from(input[..lt].trim()),
            email: BString::from(&input[lt + 1..gt]),
            date: GitDate::parse_raw(date)?,
        })
    }

    /// Serialize in canonical header form.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(self.name.len() + self.email.len() + 24));
        out.push_str(&self.name);
        out.push_str(b" <");
        out.push_str(&self.email);
        out.push_str(b"> ");
        out.push_str(self.date.to_raw().as_bytes());
        out
    }
}
