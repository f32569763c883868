//! Session, policy, and master-credential types.
//!
//! The serialized [`Session`] layout is a compatibility contract: field
//! names (`keyHash`, `encryptedPrivateKey`, `config`, `metadata`,
//! `masterKeyHash`) match the stored documents of existing deployments
//! and must not be renamed.

use alloy_primitives::{B256, Bytes};
use serde::{Deserialize, Serialize};

use veridex::networks::ChainRef;
use veridex::timestamp::UnixTimestamp;
use veridex::usd::Usd;

/// The long-lived identity on whose behalf sessions are created.
///
/// The credential itself (e.g. a passkey) lives with the holder; the core
/// only ever sees its id — which keys the encryption of session scalars —
/// and its public point, kept for provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterCredential {
    /// Opaque credential identifier.
    pub credential_id: String,
    /// Stable hash identifying this credential.
    pub key_hash: B256,
    /// Public-key x coordinate.
    pub public_key_x: B256,
    /// Public-key y coordinate.
    pub public_key_y: B256,
}

/// The spending policy carried by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Rolling 24-hour spending cap.
    #[serde(rename = "dailyLimitUSD")]
    pub daily_cap: Usd,
    /// Per-transaction spending cap.
    #[serde(rename = "perTransactionLimitUSD")]
    pub per_tx_cap: Usd,
    /// The session is unusable at and after this instant.
    #[serde(rename = "expiryTimestamp")]
    pub expires_at: UnixTimestamp,
    /// Chains the session may sign for. Never empty.
    #[serde(rename = "allowedChains")]
    pub allowed_chain_ids: Vec<ChainRef>,
}

impl SessionPolicy {
    /// Returns whether the session may sign for `chain_id`.
    #[must_use]
    pub fn allows_chain(&self, chain_id: ChainRef) -> bool {
        self.allowed_chain_ids.contains(&chain_id)
    }
}

/// Running spending totals and bookkeeping for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    /// When the session was created.
    pub created_at: UnixTimestamp,
    /// When the session last recorded a spend.
    pub last_used_at: UnixTimestamp,
    /// Lifetime total, monotonically non-decreasing.
    #[serde(rename = "totalSpentUSD")]
    pub total_spent: Usd,
    /// Spending inside the current daily window.
    #[serde(rename = "dailySpentUSD")]
    pub daily_spent: Usd,
    /// When the daily window next resets.
    pub daily_reset_at: UnixTimestamp,
    /// Number of recorded transactions.
    pub transaction_count: u64,
}

impl LedgerState {
    /// Returns a fresh ledger for a session created at `now`.
    #[must_use]
    pub fn new(now: UnixTimestamp) -> Self {
        Self {
            created_at: now,
            last_used_at: now,
            total_spent: Usd::ZERO,
            daily_spent: Usd::ZERO,
            daily_reset_at: now + veridex::timestamp::DAY_SECS,
            transaction_count: 0,
        }
    }
}

/// A delegated signing session.
///
/// `key_hash` is the primary identity; sessions are always referenced by
/// it, never by object reference, so revocation can flow through the id
/// graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable identifier: the hash of the session public key.
    pub key_hash: B256,
    /// Encrypted private scalar. Hex (`0x…`) or base64; a 66-character
    /// `0x…` value is a legacy unencrypted scalar.
    pub encrypted_private_key: String,
    /// Uncompressed secp256k1 public key.
    pub public_key: Bytes,
    /// The spending policy.
    #[serde(rename = "config")]
    pub policy: SessionPolicy,
    /// Running totals.
    #[serde(rename = "metadata")]
    pub ledger: LedgerState,
    /// Back-reference to the master credential.
    pub master_key_hash: B256,
}

impl Session {
    /// Returns whether the session has expired at `now`.
    ///
    /// Expiry is inclusive: a session is invalid at exactly
    /// `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        now >= self.policy.expires_at
    }

    /// Returns the USD remaining in the current daily window.
    ///
    /// Purely informational; limit decisions go through the ledger so the
    /// window is advanced first.
    #[must_use]
    pub fn remaining_today(&self) -> Usd {
        self.policy.daily_cap.saturating_sub(self.ledger.daily_spent)
    }

    /// Derives the session's EVM address from its public key.
    #[must_use]
    pub fn address(&self) -> Option<alloy_primitives::Address> {
        veridex_evm::chain::derive_address(&self.public_key)
    }
}
