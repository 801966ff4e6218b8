//! Purpose: Total order over result rows and the opaque cursor codec built on it.
//! Exports: `KeysetValue`, `Keyset`, `TimeCidKeyset`, timestamp helpers.
//! Role: Leaf module; pagination and the read-after-write merge both order by `KeysetValue`.
//! Invariants: Ordering is `(primary, tie_break)` lexicographic; ties on primary never collapse.
//! Invariants: `KeysetValue::unpack(&value.pack()) == value` for every non-empty tie-break.
//! Invariants: Malformed cursors fail with `MalformedCursor`; nothing defaults to page one.
use crate::core::error::{Error, ErrorKind};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const SEPARATOR: &str = "::";

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KeysetValue {
    /// Epoch milliseconds of the row's sort timestamp.
    pub primary: i64,
    /// Unique per row (a record CID); breaks ties on `primary`.
    pub tie_break: String,
}

impl KeysetValue {
    pub fn new(primary: i64, tie_break: impl Into<String>) -> Self {
        Self {
            primary,
            tie_break: tie_break.into(),
        }
    }

    pub fn pack(&self) -> String {
        format!("{}{SEPARATOR}{}", self.primary, self.tie_break)
    }

    pub fn unpack(cursor: &str) -> Result<Self, Error> {
        let Some((primary, tie_break)) = cursor.split_once(SEPARATOR) else {
            return Err(malformed(cursor, "missing separator"));
        };
        if tie_break.is_empty() {
            return Err(malformed(cursor, "empty tie-break"));
        }
        let value: i64 = primary
            .parse()
            .map_err(|_| malformed(cursor, "primary is not an integer"))?;
        // Only the canonical rendering round-trips; "+12" or "0012" were never packed.
        if value.to_string() != primary {
            return Err(malformed(cursor, "primary is not canonical"));
        }
        Ok(Self::new(value, tie_break))
    }
}

impl fmt::Display for KeysetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pack())
    }
}

fn malformed(cursor: &str, reason: &str) -> Error {
    Error::new(ErrorKind::MalformedCursor)
        .with_message(format!("malformed cursor: {reason}"))
        .with_hint(format!("Pass back a cursor returned by a previous page, not {cursor:?}."))
}

/// Derives keyset positions from rows and moves them through the cursor codec.
pub trait Keyset<R>: Send + Sync {
    fn key(&self, row: &R) -> Result<KeysetValue, Error>;

    fn pack(&self, row: &R) -> Result<String, Error> {
        Ok(self.key(row)?.pack())
    }

    fn unpack(&self, cursor: &str) -> Result<KeysetValue, Error> {
        KeysetValue::unpack(cursor)
    }

    /// Cursor for the position after `rows`; absent when `rows` is empty.
    fn pack_from_result(&self, rows: &[R]) -> Result<Option<String>, Error> {
        rows.last().map(|row| self.pack(row)).transpose()
    }
}

/// Keyset over an RFC 3339 timestamp column with a CID tie-break.
pub struct TimeCidKeyset<R> {
    time: fn(&R) -> &str,
    cid: fn(&R) -> &str,
}

impl<R> TimeCidKeyset<R> {
    pub const fn new(time: fn(&R) -> &str, cid: fn(&R) -> &str) -> Self {
        Self { time, cid }
    }
}

impl<R> Clone for TimeCidKeyset<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for TimeCidKeyset<R> {}

impl<R> Keyset<R> for TimeCidKeyset<R> {
    fn key(&self, row: &R) -> Result<KeysetValue, Error> {
        let primary = timestamp_ms((self.time)(row))?;
        Ok(KeysetValue::new(primary, (self.cid)(row)))
    }
}

pub fn timestamp_ms(value: &str) -> Result<i64, Error> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("invalid row timestamp {value:?}"))
            .with_source(err)
    })?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

pub fn format_timestamp_ms(ms: i64) -> Result<String, Error> {
    let time = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp out of range")
                .with_source(err)
        })?;
    time.format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
