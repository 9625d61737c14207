//! Fixed-point money.
//!
//! Amounts are `i64` scaled by [`AMOUNT_SCALE`] (8 decimal places) and stored in
//! `INTEGER` columns, so sums in Rust and `SUM()` in SQLite are exact. Text is
//! parsed digit by digit; no value ever passes through `f64`.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Scale factor: 1e8 (8 decimal places).
pub const AMOUNT_SCALE: i64 = 100_000_000;
const AMOUNT_DECIMALS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw fixed-point value.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole units, e.g. `from_units(40)` is `40.00000000`.
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(AMOUNT_SCALE).map(Self)
    }

    /// Parse a plain decimal string (`"10"`, `"-0.15"`, `"+.5"`).
    ///
    /// Exponents, more than 8 significant decimals, and out-of-range values are
    /// rejected rather than rounded.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, digits) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let frac = frac.trim_end_matches('0');
        if frac.len() > AMOUNT_DECIMALS {
            return None;
        }

        let mut raw: i64 = 0;
        for b in whole.bytes() {
            raw = raw.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        }
        raw = raw.checked_mul(AMOUNT_SCALE)?;

        let mut frac_raw: i64 = 0;
        for b in frac.bytes() {
            frac_raw = frac_raw * 10 + i64::from(b - b'0');
        }
        frac_raw *= 10_i64.pow((AMOUNT_DECIMALS - frac.len()) as u32);
        raw = raw.checked_add(frac_raw)?;

        Some(Self(if negative { -raw } else { raw }))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Self)
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = AMOUNT_SCALE as u64;
        let (whole, frac) = (abs / scale, abs % scale);
        if frac == 0 {
            return write!(f, "{}{}", sign, whole);
        }
        let frac = format!("{:0width$}", frac, width = AMOUNT_DECIMALS);
        write!(f, "{}{}.{}", sign, whole, frac.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount '{}'", s)))
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}
