//! Wire-protocol types for the 402 payment exchange.
//!
//! The exchange is carried entirely in HTTP headers, each holding base64
//! of a JSON document:
//!
//! - [`PAYMENT_REQUIRED`] - server challenge listing acceptable payments
//! - [`PAYMENT_SIGNATURE`] - client proof: a signed authorization envelope
//! - [`PAYMENT_RESPONSE`] - server settlement result after the retry
//!
//! # Key Types
//!
//! - [`PaymentRequirementsWire`] / [`PaymentRequiredWire`] - challenge shapes
//! - [`PaymentPayload`] - the `x402Version: 1` proof envelope
//! - [`SettlementWire`] - settlement result
//! - [`parser`] - challenge parsing and amount helpers
//!
//! All types serialize to JSON using camelCase field names.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::encoding::Base64Bytes;

pub mod parser;

/// Header carrying the server's payment challenge on a 402 response.
pub const PAYMENT_REQUIRED: &str = "payment-required";

/// Header carrying the client's signed payment proof on the retry.
pub const PAYMENT_SIGNATURE: &str = "payment-signature";

/// Header carrying the server's settlement result after a paid retry.
pub const PAYMENT_RESPONSE: &str = "payment-response";

/// Header signalling a UCP handoff; handled by a collaborator, not here.
pub const UCP_INITIATION_URL: &str = "x-ucp-initiation-url";

/// A protocol version marker that serializes as the integer `N`.
///
/// Deserialization rejects any other value, so an envelope built for a
/// future protocol revision fails loudly instead of being half-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version<const N: u8>;

/// Version marker for the current payment-proof envelope.
pub type X402Version1 = Version<1>;

/// Convenience constant for constructing proof envelopes.
pub const V1: X402Version1 = Version;

impl<const N: u8> Serialize for Version<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(N)
    }
}

impl<'de, const N: u8> Deserialize<'de> for Version<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        if value == N {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected protocol version {N}, got {value}"
            )))
        }
    }
}

/// The payment scheme requested by a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentScheme {
    /// The authorization must match the requested amount exactly.
    Exact,
    /// The authorization covers any amount up to the requested maximum.
    Upto,
}

impl fmt::Display for PaymentScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Upto => write!(f, "upto"),
        }
    }
}

/// One acceptable payment, as carried in a `PAYMENT-REQUIRED` challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsWire {
    /// The payment scheme (e.g. `"exact"`).
    pub scheme: PaymentScheme,
    /// Network name or numeric chain id (e.g. `"base-mainnet"`, `"8453"`).
    pub network: String,
    /// Amount as a raw string; canonically the token's smallest unit.
    pub max_amount_required: String,
    /// Token contract address or symbol (e.g. `"USDC"`).
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Facilitator endpoint, when the seller names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<String>,
    /// Human-readable description of what is being bought.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Scheme-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// The decoded body of a `PAYMENT-REQUIRED` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredWire {
    /// Acceptable payments, in the seller's preference order.
    #[serde(default)]
    pub payment_requirements: Vec<PaymentRequirementsWire>,
    /// Error detail, present when a prior proof was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A signed proof: the scheme-specific signature and authorization pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload<TAuth> {
    /// Hex-encoded signature (`0x…`).
    pub signature: String,
    /// The structured authorization that was signed.
    pub authorization: TAuth,
}

/// The proof envelope carried in the `PAYMENT-SIGNATURE` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TAuth = serde_json::Value> {
    /// Protocol version (always 1).
    pub x402_version: X402Version1,
    /// The payment scheme the proof satisfies.
    pub scheme: PaymentScheme,
    /// The network name echoed from the challenge.
    pub network: String,
    /// The signed proof.
    pub payload: SignedPayload<TAuth>,
}

/// The decoded body of a `PAYMENT-RESPONSE` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementWire {
    /// Whether the facilitator settled the payment.
    pub success: bool,
    /// On-chain transaction hash, when settlement reached a chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// Network the settlement happened on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Settled amount, echoed from the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Facilitator that performed the settlement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<String>,
    /// Error detail when `success` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Encodes a wire value into a base64 header string.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized to JSON.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64Bytes::encode(&json).to_string())
}

/// Decodes a base64 header string into a wire value.
///
/// Returns `None` on any base64 or JSON failure; callers translate that
/// into a structured protocol error at their own boundary.
#[must_use]
pub fn decode_header<T: DeserializeOwned>(value: &str) -> Option<T> {
    let bytes = Base64Bytes::from(value.as_bytes()).decode().ok()?;
    serde_json::from_slice(&bytes).ok()
}
