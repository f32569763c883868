//! Interpretation of challenge amount strings.
//!
//! The 402 header's amount field is not self-describing: some sellers
//! send whole-token decimals (`"1.5"`), some send smallest units
//! (`"1000000"`). The interpretation rule is fixed for wire
//! compatibility:
//!
//! 1. A string containing `.` is a decimal in whole tokens, scaled by
//!    `10^decimals`.
//! 2. An integer whose scaled value stays below [`WHOLE_TOKEN_PIVOT`] is
//!    a count of whole tokens and is scaled the same way.
//! 3. Anything else is already in the token's smallest unit.
//!
//! The pivot makes the heuristic lossy for edge values; senders should
//! prefer a canonical smallest-unit integer.

use alloy_primitives::U256;
use std::str::FromStr;

use veridex::proto::parser::parse_amount;

/// Scaled amounts below this are taken as whole-token counts.
pub const WHOLE_TOKEN_PIVOT: u64 = 1_000_000_000;

/// Error interpreting an amount string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("uninterpretable amount {0:?}")]
pub struct AmountError(pub String);

/// Interprets a challenge amount string as a smallest-unit value.
///
/// # Errors
///
/// Returns [`AmountError`] when the string is not a non-negative decimal
/// number or carries more fractional digits than the token has decimals.
pub fn interpret_amount(raw: &str, decimals: u8) -> Result<U256, AmountError> {
    if raw.contains('.') {
        let units = parse_amount(raw, decimals).ok_or_else(|| AmountError(raw.to_owned()))?;
        return Ok(U256::from(units));
    }
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError(raw.to_owned()));
    }
    let value = U256::from_str(raw).map_err(|_| AmountError(raw.to_owned()))?;
    let scale = U256::from(10u64).pow(U256::from(decimals));
    match value.checked_mul(scale) {
        Some(scaled) if scaled < U256::from(WHOLE_TOKEN_PIVOT) => Ok(scaled),
        _ => Ok(value),
    }
}
