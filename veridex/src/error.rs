//! Error taxonomy and stable user-visible error codes.
//!
//! Five kinds of failure flow through the core:
//!
//! - [`PolicyError`] - a spend was refused by session policy (never retried)
//! - [`ProtocolError`] - the 402 exchange itself was malformed or rejected
//! - [`CredentialError`] - symmetric-crypto or signature-material failure
//! - [`TransientError`] - network/oracle failures the *caller* may retry
//! - [`InternalError`] - storage corruption or a broken invariant
//!
//! Expected errors are values, not panics: every fallible operation in the
//! core returns a `Result` with one of these types, and each maps to a
//! stable numeric [`PaymentErrorCode`] for user-visible surfaces.

use std::time::Duration;

use crate::usd::Usd;

/// Stable machine-readable error codes.
///
/// These values are part of the public contract and must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PaymentErrorCode {
    /// The session has passed its expiry timestamp.
    SessionExpired = 1001,
    /// The session was explicitly revoked.
    SessionRevoked = 1002,
    /// The session is malformed, quarantined, or otherwise unusable.
    SessionInvalid = 1003,
    /// A per-transaction or daily spending limit would be exceeded.
    LimitExceeded = 2001,
    /// The payment was rejected or failed at the counterparty.
    PaymentFailed = 4001,
    /// The payment exchange timed out.
    PaymentTimeout = 4002,
    /// A network-level failure occurred.
    NetworkError = 5001,
    /// The 402 challenge could not be parsed.
    X402ParseError = 6001,
    /// The payment token has expired.
    TokenExpired = 7001,
    /// The payment token is malformed or unknown.
    TokenInvalid = 7002,
    /// The payment token (or its session) was revoked.
    TokenRevoked = 7003,
}

impl PaymentErrorCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Returns whether a caller may retry the failed operation.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::PaymentTimeout | Self::PaymentFailed
        )
    }

    /// Returns a human-readable remediation hint.
    #[must_use]
    pub const fn remediation(&self) -> &'static str {
        match self {
            Self::SessionExpired => "Create a new session; expired sessions cannot be renewed.",
            Self::SessionRevoked => "The session was revoked. Create a new session.",
            Self::SessionInvalid => {
                "The session is unusable. Inspect the audit log and create a new session."
            }
            Self::LimitExceeded => {
                "Reduce the amount or wait for the daily window to reset, \
                 or create a session with higher limits."
            }
            Self::PaymentFailed => "The counterparty rejected the payment. Retry with backoff.",
            Self::PaymentTimeout => "The exchange timed out. Retry with backoff.",
            Self::NetworkError => "A network failure occurred. Retry with backoff.",
            Self::X402ParseError => {
                "The server sent an unparseable 402 challenge. Contact the resource operator."
            }
            Self::TokenExpired => "Mint a fresh token from a valid session.",
            Self::TokenInvalid => "The token is malformed or unknown. Mint a fresh token.",
            Self::TokenRevoked => "The token or its session was revoked. Create a new session.",
        }
    }
}

/// A spend was refused by session policy.
///
/// Policy errors are final for the attempted amount: the core never
/// retries them, and surfaces the refusal verbatim to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    /// The amount exceeds the per-transaction cap.
    #[error("per-transaction limit exceeded: {reason}")]
    PerTxExceeded {
        /// Refusal reason as produced by the ledger.
        reason: String,
        /// USD remaining in the daily window.
        remaining: Usd,
    },
    /// The amount would push the rolling daily total past the cap.
    #[error("daily limit exceeded: {reason}")]
    DailyExceeded {
        /// Refusal reason as produced by the ledger.
        reason: String,
        /// USD remaining in the daily window.
        remaining: Usd,
    },
    /// The session has expired.
    #[error("session expired: {reason}")]
    Expired {
        /// Refusal reason as produced by the ledger.
        reason: String,
    },
    /// The challenge targets a chain the session may not sign for.
    #[error("chain {chain_id} is not allowed by session policy")]
    ChainNotAllowed {
        /// The internal chain id the challenge named.
        chain_id: u64,
    },
}

impl PolicyError {
    /// Returns the stable error code for this refusal.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        match self {
            Self::PerTxExceeded { .. } | Self::DailyExceeded { .. } => {
                PaymentErrorCode::LimitExceeded
            }
            Self::Expired { .. } => PaymentErrorCode::SessionExpired,
            Self::ChainNotAllowed { .. } => PaymentErrorCode::SessionInvalid,
        }
    }
}

/// The 402 exchange was malformed or the server rejected the payment.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// The `PAYMENT-REQUIRED` challenge could not be decoded.
    #[error("malformed 402 challenge")]
    MalformedChallenge,
    /// The settlement header could not be decoded.
    #[error("malformed settlement response: {0}")]
    MalformedSettlement(String),
    /// The server answered the retried request with another 402.
    #[error("payment rejected by server: {server_reason}")]
    PaymentRejected {
        /// The error string from the second challenge, if any.
        server_reason: String,
    },
}

impl ProtocolError {
    /// Returns the stable error code for this protocol failure.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        match self {
            Self::MalformedChallenge | Self::MalformedSettlement(_) => {
                PaymentErrorCode::X402ParseError
            }
            Self::PaymentRejected { .. } => PaymentErrorCode::PaymentFailed,
        }
    }
}

/// Symmetric-crypto or signature-material failure.
///
/// Messages never carry key material.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// AES-GCM authentication failed: the ciphertext was altered.
    #[error("ciphertext failed authentication")]
    Tampered,
    /// The stored ciphertext is structurally invalid.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    /// The encryption key could not be derived.
    #[error("key derivation failed: {0}")]
    Derivation(String),
    /// The decrypted scalar is not a valid signing key.
    #[error("invalid signing key material")]
    InvalidKeyMaterial,
}

impl CredentialError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        PaymentErrorCode::SessionInvalid
    }
}

/// A failure the surrounding caller is permitted to retry.
///
/// The core itself never retries a 402 negotiation; [`retry_schedule`]
/// carries the backoff the caller should apply.
///
/// [`retry_schedule`]: TransientError::retry_schedule
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransientError {
    /// The HTTP request failed at the transport level.
    #[error("network error: {0}")]
    Network(String),
    /// The operation exceeded its timeout.
    #[error("payment exchange timed out")]
    Timeout,
    /// The price oracle failed to produce a quote.
    #[error("price oracle failure: {0}")]
    Oracle(String),
}

impl TransientError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        match self {
            Self::Network(_) | Self::Oracle(_) => PaymentErrorCode::NetworkError,
            Self::Timeout => PaymentErrorCode::PaymentTimeout,
        }
    }

    /// Returns the fixed backoff schedule a caller should use.
    #[must_use]
    pub const fn retry_schedule() -> [Duration; 3] {
        [
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
        ]
    }
}

/// Storage corruption or an invariant violation caught after the fact.
///
/// These are fatal for the affected session: it is quarantined and the
/// failure is surfaced without any silent recovery.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InternalError {
    /// The backing store failed unexpectedly.
    #[error("storage failure: {0}")]
    Storage(String),
    /// Stored ledger state violates a core invariant.
    #[error("ledger corruption detected: {0}")]
    LedgerCorruption(String),
}

impl InternalError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        PaymentErrorCode::SessionInvalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(PaymentErrorCode::SessionExpired.code(), 1001);
        assert_eq!(PaymentErrorCode::SessionRevoked.code(), 1002);
        assert_eq!(PaymentErrorCode::SessionInvalid.code(), 1003);
        assert_eq!(PaymentErrorCode::LimitExceeded.code(), 2001);
        assert_eq!(PaymentErrorCode::PaymentFailed.code(), 4001);
        assert_eq!(PaymentErrorCode::PaymentTimeout.code(), 4002);
        assert_eq!(PaymentErrorCode::NetworkError.code(), 5001);
        assert_eq!(PaymentErrorCode::X402ParseError.code(), 6001);
        assert_eq!(PaymentErrorCode::TokenExpired.code(), 7001);
        assert_eq!(PaymentErrorCode::TokenInvalid.code(), 7002);
        assert_eq!(PaymentErrorCode::TokenRevoked.code(), 7003);
    }

    #[test]
    fn test_retryability() {
        assert!(PaymentErrorCode::NetworkError.retryable());
        assert!(PaymentErrorCode::PaymentTimeout.retryable());
        assert!(!PaymentErrorCode::LimitExceeded.retryable());
        assert!(!PaymentErrorCode::SessionExpired.retryable());
        assert!(!PaymentErrorCode::X402ParseError.retryable());
    }

    #[test]
    fn test_policy_error_codes() {
        let deny = PolicyError::DailyExceeded {
            reason: "daily limit".into(),
            remaining: Usd::ZERO,
        };
        assert_eq!(deny.error_code(), PaymentErrorCode::LimitExceeded);
        let expired = PolicyError::Expired {
            reason: "expired".into(),
        };
        assert_eq!(expired.error_code(), PaymentErrorCode::SessionExpired);
    }

    #[test]
    fn test_retry_schedule() {
        let schedule = TransientError::retry_schedule();
        assert_eq!(schedule[0], Duration::from_secs(2));
        assert_eq!(schedule[1], Duration::from_secs(4));
        assert_eq!(schedule[2], Duration::from_secs(8));
    }

    #[test]
    fn test_remediation_is_nonempty() {
        assert!(!PaymentErrorCode::LimitExceeded.remediation().is_empty());
    }
}
