//! Parsing and normalization of 402 payment challenges.
//!
//! [`parse_challenge`] turns a raw `PAYMENT-REQUIRED` header into a
//! normalized [`PaymentRequest`], or `None` on any decoding failure — the
//! engine is responsible for turning that `None` into a structured
//! protocol error. The pure helpers [`parse_amount`] and [`format_amount`]
//! convert between human decimal strings and smallest-unit integers.

use http::HeaderMap;

use crate::networks::{self, ChainRef};
use crate::proto::{self, PaymentRequiredWire, PaymentScheme};
use crate::timestamp::UnixTimestamp;

/// A normalized, policy-checkable payment request from a 402 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// The payment scheme.
    pub scheme: PaymentScheme,
    /// The raw network string from the challenge.
    pub network: String,
    /// Internal chain id resolved from `network`.
    pub chain_id: ChainRef,
    /// Token contract address or symbol, verbatim from the challenge.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Raw amount string; canonically the token's smallest unit.
    pub amount: String,
    /// Facilitator endpoint, when named.
    pub facilitator: Option<String>,
    /// Authorization deadline, when the challenge carries one.
    pub deadline: Option<UnixTimestamp>,
    /// Challenge scheme version.
    pub scheme_version: u8,
}

/// Parses a 402 response's headers into a [`PaymentRequest`].
///
/// Header lookup is case-insensitive. Returns `None` when the header is
/// absent or fails to decode; decoding failure is deliberately not an
/// error here.
#[must_use]
pub fn parse_challenge(headers: &HeaderMap) -> Option<PaymentRequest> {
    let value = headers.get(proto::PAYMENT_REQUIRED)?.to_str().ok()?;
    let parsed = parse_challenge_value(value);
    if parsed.is_none() {
        tracing::debug!("payment challenge header present but undecodable");
    }
    parsed
}

/// Parses the raw value of a `PAYMENT-REQUIRED` header.
///
/// Selects the first requirement in the array — the protocol's intended
/// preference order — and resolves its network to an internal chain id.
#[must_use]
pub fn parse_challenge_value(value: &str) -> Option<PaymentRequest> {
    let wire: PaymentRequiredWire = proto::decode_header(value)?;
    let req = wire.payment_requirements.into_iter().next()?;
    let chain_id = networks::resolve_network(&req.network)?;
    let deadline = req
        .extra
        .as_ref()
        .and_then(|extra| extra.get("deadline"))
        .and_then(deadline_from_json);
    Some(PaymentRequest {
        scheme: req.scheme,
        network: req.network,
        chain_id,
        asset: req.asset,
        pay_to: req.pay_to,
        amount: req.max_amount_required,
        facilitator: req.facilitator,
        deadline,
        scheme_version: 1,
    })
}

/// Extracts the server-supplied error string from a rejection challenge.
#[must_use]
pub fn parse_challenge_error(value: &str) -> Option<String> {
    let wire: PaymentRequiredWire = proto::decode_header(value)?;
    wire.error
}

fn deadline_from_json(value: &serde_json::Value) -> Option<UnixTimestamp> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(UnixTimestamp::from_secs),
        serde_json::Value::String(s) => s.parse::<u64>().ok().map(UnixTimestamp::from_secs),
        _ => None,
    }
}

/// Parses a decimal token-amount string into smallest units.
///
/// `"1.5"` with 6 decimals is `1_500_000`. Returns `None` for empty
/// input, non-digit characters, more fractional digits than the token
/// carries, or overflow.
#[must_use]
pub fn parse_amount(s: &str, decimals: u8) -> Option<u128> {
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    if frac_part.len() > usize::from(decimals) {
        return None;
    }
    let scale = 10u128.checked_pow(u32::from(decimals))?;
    let int_value = if int_part.is_empty() {
        0
    } else {
        int_part.parse::<u128>().ok()?
    };
    let frac_value = if frac_part.is_empty() {
        0
    } else {
        let digits = frac_part.parse::<u128>().ok()?;
        let pad = 10u128.checked_pow(u32::try_from(usize::from(decimals) - frac_part.len()).ok()?)?;
        digits.checked_mul(pad)?
    };
    int_value.checked_mul(scale)?.checked_add(frac_value)
}

/// Formats a smallest-unit integer as a canonical decimal string.
///
/// The canonical form has no trailing fractional zeros and no decimal
/// point for whole amounts, so `format_amount(parse_amount(s, d)?, d)`
/// round-trips for canonical `s`.
#[must_use]
pub fn format_amount(units: u128, decimals: u8) -> String {
    let scale = 10u128.pow(u32::from(decimals));
    let int_part = units / scale;
    let frac_part = units % scale;
    if frac_part == 0 {
        return int_part.to_string();
    }
    let frac = format!("{frac_part:0width$}", width = usize::from(decimals));
    format!("{int_part}.{}", frac.trim_end_matches('0'))
}
