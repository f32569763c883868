//! Address derivation and chain-id resolution for EVM sessions.

use alloy_primitives::{Address, B256, U256, keccak256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use veridex::networks::{self, ChainRef};

/// A token amount in the token's smallest unit.
///
/// # Serialization
///
/// Serializes as a decimal string (`"1000000"`), never hex, to match the
/// wire format expected by token contracts and facilitators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// Returns the inner 256-bit value.
    #[must_use]
    pub const fn inner(&self) -> U256 {
        self.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = <U256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str(s).map(Self)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Derives the Ethereum address for an uncompressed secp256k1 public key.
///
/// Accepts the 65-byte SEC1 form (leading `0x04`) or the raw 64-byte
/// x‖y form. Returns `None` for any other length.
#[must_use]
pub fn derive_address(public_key: &[u8]) -> Option<Address> {
    let raw = match public_key.len() {
        65 if public_key[0] == 0x04 => &public_key[1..],
        64 => public_key,
        _ => return None,
    };
    let digest = keccak256(raw);
    Some(Address::from_slice(&digest[12..]))
}

/// Computes the stable, chain-agnostic session identifier for a public key.
///
/// This is the keccak-256 digest of the public-key bytes exactly as
/// stored, so the same key always yields the same session id regardless
/// of which chain it later signs for.
#[must_use]
pub fn session_key_hash(public_key: &[u8]) -> B256 {
    keccak256(public_key)
}

/// Maps an internal chain id to its EIP-155 chain id.
///
/// Unknown ids pass through unchanged.
#[must_use]
pub fn evm_chain_id(internal_id: ChainRef) -> u64 {
    networks::evm_chain_id(internal_id)
}
