//! Exact USD arithmetic for spend-limit enforcement.
//!
//! All ledger amounts are [`Usd`] values: 64-bit integer microdollars
//! (1/1 000 000 USD). Limit checks never touch floating point; conversions
//! from token units or oracle prices truncate toward zero before an amount
//! enters the ledger.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Microdollars per dollar.
pub const MICROS_PER_DOLLAR: i64 = 1_000_000;

/// A non-negative USD amount with fixed 6-decimal precision.
///
/// Stored as signed microdollars so that subtraction can be checked, but
/// every amount that enters a ledger is validated non-negative first.
///
/// # Serialization
///
/// Serializes as the integer number of microdollars.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd(i64);

impl Usd {
    /// Zero dollars.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from whole dollars.
    #[must_use]
    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * MICROS_PER_DOLLAR)
    }

    /// Creates an amount from raw microdollars.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the amount in raw microdollars.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Returns `true` when the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Returns `true` when the amount is negative.
    ///
    /// Negative amounts never enter a ledger; this exists so loaded state
    /// can be validated before use.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtraction that floors at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        let v = self.0.saturating_sub(rhs.0);
        if v < 0 { Self(0) } else { Self(v) }
    }

    /// Converts a token amount in its smallest unit to USD at a 1:1 peg.
    ///
    /// This is the stablecoin fast path: `units / 10^decimals` dollars,
    /// truncated (not rounded) to microdollars. Returns `None` when the
    /// result overflows.
    #[must_use]
    pub fn from_stablecoin_units(units: u128, decimals: u8) -> Option<Self> {
        let micros = if decimals >= 6 {
            units / 10u128.checked_pow(u32::from(decimals) - 6)?
        } else {
            units.checked_mul(10u128.checked_pow(6 - u32::from(decimals))?)?
        };
        i64::try_from(micros).ok().map(Self)
    }

    /// Truncates a decimal dollar amount to microdollars.
    ///
    /// Returns `None` for negative values or on overflow. Used only at the
    /// oracle boundary; ledger arithmetic itself is integer-only.
    #[must_use]
    pub fn from_decimal_truncated(dollars: Decimal) -> Option<Self> {
        if dollars.is_sign_negative() {
            return None;
        }
        let micros = (dollars * Decimal::from(MICROS_PER_DOLLAR)).trunc();
        micros.to_i64().map(Self)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let dollars = abs / MICROS_PER_DOLLAR.unsigned_abs();
        let micros = abs % MICROS_PER_DOLLAR.unsigned_abs();
        if micros == 0 {
            write!(f, "{sign}${dollars}")
        } else {
            let frac = format!("{micros:06}");
            write!(f, "{sign}${dollars}.{}", frac.trim_end_matches('0'))
        }
    }
}

/// Error parsing a decimal dollar string into [`Usd`].
#[derive(Debug, thiserror::Error)]
#[error("invalid USD amount: {0}")]
pub struct UsdParseError(String);

impl FromStr for Usd {
    type Err = UsdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('$');
        let decimal = Decimal::from_str(trimmed).map_err(|_| UsdParseError(s.to_owned()))?;
        Self::from_decimal_truncated(decimal).ok_or_else(|| UsdParseError(s.to_owned()))
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, v| Self(acc.0.saturating_add(v.0)))
    }
}
