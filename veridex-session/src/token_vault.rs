//! Short-lived payment tokens minted from sessions.
//!
//! A payment token delegates a narrow, time-boxed capability to a third
//! party without exposing the session: it carries a snapshot of the
//! session's limits and an expiry never later than the session's own.
//! Tokens confer no signing authority by themselves; they are validated
//! against the live session on every use, so revoking the session kills
//! every outstanding token at once.

use alloy_primitives::B256;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use veridex::clock::Clock;
use veridex::encoding::Base64UrlBytes;
use veridex::error::PaymentErrorCode;
use veridex::timestamp::UnixTimestamp;
use veridex::usd::Usd;

use crate::session::Session;
use crate::store::SessionStore;

/// Exact `type` discriminator required in every token document.
pub const TOKEN_TYPE: &str = "VERIDEX_SESSION_TOKEN";

/// Default token lifetime when the caller does not pass one.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 15 * 60;

/// Snapshot of a session's limits at mint time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsSnapshot {
    /// The session's daily cap when the token was minted.
    #[serde(rename = "dailyLimitUSD")]
    pub daily_cap: Usd,
    /// The session's per-transaction cap when the token was minted.
    #[serde(rename = "perTransactionLimitUSD")]
    pub per_tx_cap: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenDocument {
    key_hash: B256,
    #[serde(rename = "type")]
    token_type: String,
    limits: LimitsSnapshot,
    expires_at: UnixTimestamp,
    nonce: String,
}

/// A minted payment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentToken {
    /// The opaque token string handed to third parties.
    pub token: String,
    /// The session this token was minted from.
    pub session_key_hash: B256,
    /// Limits snapshot at mint time.
    pub limits: LimitsSnapshot,
    /// When the token expires.
    pub expires_at: UnixTimestamp,
}

/// Why a token failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    /// Structurally valid but not minted by this vault (stale or foreign).
    #[error("not found")]
    NotFound,
    /// The token string could not be decoded.
    #[error("malformed")]
    Malformed,
    /// The token itself has expired.
    #[error("expired")]
    Expired,
    /// The underlying session has expired.
    #[error("underlying session expired")]
    SessionExpired,
    /// The underlying session was revoked.
    #[error("underlying session revoked")]
    SessionRevoked,
}

impl TokenRejection {
    /// Returns the stable error code for this rejection.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        match self {
            Self::NotFound | Self::Malformed => PaymentErrorCode::TokenInvalid,
            Self::Expired => PaymentErrorCode::TokenExpired,
            Self::SessionExpired | Self::SessionRevoked => PaymentErrorCode::TokenRevoked,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    session_key_hash: B256,
    expires_at: UnixTimestamp,
}

/// Mints and validates short-lived payment tokens.
pub struct TokenVault {
    index: DashMap<String, IndexEntry>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    default_ttl_secs: u64,
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault")
            .field("outstanding", &self.index.len())
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenVault {
    /// Creates a vault over the given store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index: DashMap::new(),
            store,
            clock,
            default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }

    /// Overrides the default token lifetime.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl_secs: u64) -> Self {
        self.default_ttl_secs = ttl_secs;
        self
    }

    /// Mints a token for `session`.
    ///
    /// The token's expiry is the earlier of `now + ttl` and the session's
    /// own expiry, so no token ever outlives its session.
    #[must_use]
    pub fn mint(&self, session: &Session, ttl_secs: Option<u64>) -> PaymentToken {
        let now = self.clock.now();
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let expires_at = (now + ttl).min(session.policy.expires_at);
        let nonce: [u8; 16] = rand::rng().random();
        let limits = LimitsSnapshot {
            daily_cap: session.policy.daily_cap,
            per_tx_cap: session.policy.per_tx_cap,
        };
        let document = TokenDocument {
            key_hash: session.key_hash,
            token_type: TOKEN_TYPE.to_owned(),
            limits,
            expires_at,
            nonce: hex::encode(nonce),
        };
        let json = serde_json::to_vec(&document).expect("token document serializes");
        let token = Base64UrlBytes::encode(&json).to_string();
        self.index.insert(
            token.clone(),
            IndexEntry {
                session_key_hash: session.key_hash,
                expires_at,
            },
        );
        PaymentToken {
            token,
            session_key_hash: session.key_hash,
            limits,
            expires_at,
        }
    }

    /// Validates a token string and returns its live session.
    ///
    /// Expired entries are evicted as a side effect, so repeated
    /// validation of a dead token stays cheap.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenRejection`] naming exactly why the token is
    /// unusable.
    pub async fn validate(&self, token: &str) -> Result<Session, TokenRejection> {
        let entry = match self.index.get(token) {
            Some(entry) => *entry,
            None => {
                // Distinguish a stale-but-real token from garbage.
                return match decode_document(token) {
                    Some(_) => Err(TokenRejection::NotFound),
                    None => Err(TokenRejection::Malformed),
                };
            }
        };
        let now = self.clock.now();
        if entry.expires_at <= now {
            self.index.remove(token);
            return Err(TokenRejection::Expired);
        }
        let session = self
            .store
            .get(&entry.session_key_hash)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| {
                self.index.remove(token);
                TokenRejection::SessionRevoked
            })?;
        if session.is_expired(now) {
            self.index.remove(token);
            return Err(TokenRejection::SessionExpired);
        }
        Ok(session)
    }

    /// Atomically replaces a valid token with a freshly minted one.
    ///
    /// Returns `None` when the old token does not validate; the old token
    /// is removed either way once consumed.
    pub async fn refresh(&self, old_token: &str, session: &Session) -> Option<PaymentToken> {
        match self.validate(old_token).await {
            Ok(live) if live.key_hash == session.key_hash => {
                self.index.remove(old_token);
                Some(self.mint(session, None))
            }
            _ => None,
        }
    }

    /// Revokes a single token. Idempotent; returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.index.remove(token).is_some()
    }

    /// Revokes every outstanding token for a session.
    ///
    /// Called by the session manager as part of session revocation.
    /// Returns the number of tokens removed.
    pub fn revoke_all_for_session(&self, key_hash: &B256) -> usize {
        let before = self.index.len();
        self.index
            .retain(|_, entry| entry.session_key_hash != *key_hash);
        before - self.index.len()
    }

    /// Evicts every expired index entry. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let before = self.index.len();
        self.index.retain(|_, entry| entry.expires_at > now);
        before - self.index.len()
    }

    /// Returns the number of outstanding tokens.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.index.len()
    }
}

fn decode_document(token: &str) -> Option<TokenDocument> {
    let bytes = Base64UrlBytes::from(token.as_bytes()).decode().ok()?;
    let document: TokenDocument = serde_json::from_slice(&bytes).ok()?;
    if document.token_type == TOKEN_TYPE {
        Some(document)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use veridex::clock::ManualClock;

    use crate::session::{LedgerState, SessionPolicy};
    use crate::store::MemorySessionStore;

    fn sample_session(now: UnixTimestamp, expires_at: u64) -> Session {
        Session {
            key_hash: B256::repeat_byte(0x11),
            encrypted_private_key: "deadbeef".into(),
            public_key: Bytes::from(vec![0x04; 65]),
            policy: SessionPolicy {
                daily_cap: Usd::from_dollars(100),
                per_tx_cap: Usd::from_dollars(25),
                expires_at: UnixTimestamp::from_secs(expires_at),
                allowed_chain_ids: vec![30],
            },
            ledger: LedgerState::new(now),
            master_key_hash: B256::repeat_byte(0x22),
        }
    }

    async fn vault_with_session() -> (TokenVault, Arc<ManualClock>, Session) {
        let clock = Arc::new(ManualClock::new(UnixTimestamp::from_secs(1000)));
        let store = Arc::new(MemorySessionStore::new());
        let session = sample_session(UnixTimestamp::from_secs(1000), 1000 + 3600);
        store.put(&session).await.unwrap();
        let vault = TokenVault::new(store, Arc::clone(&clock) as Arc<dyn Clock>);
        (vault, clock, session)
    }

    #[tokio::test]
    async fn test_mint_and_validate() {
        let (vault, _, session) = vault_with_session().await;
        let token = vault.mint(&session, Some(60));
        assert_eq!(token.expires_at.as_secs(), 1060);
        assert_eq!(token.limits.daily_cap, Usd::from_dollars(100));
        assert_eq!(token.limits.per_tx_cap, Usd::from_dollars(25));

        let live = vault.validate(&token.token).await.unwrap();
        assert_eq!(live.key_hash, session.key_hash);
    }

    #[tokio::test]
    async fn test_token_expiry_capped_by_session() {
        let (vault, _, session) = vault_with_session().await;
        // Session expires at 4600; a week-long ttl is clamped to it.
        let token = vault.mint(&session, Some(7 * 24 * 3600));
        assert_eq!(token.expires_at, session.policy.expires_at);
    }

    #[tokio::test]
    async fn test_token_document_shape() {
        let (vault, _, session) = vault_with_session().await;
        let token = vault.mint(&session, Some(60));
        let bytes = Base64UrlBytes::from(token.token.as_bytes())
            .decode()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], TOKEN_TYPE);
        assert!(json.get("keyHash").is_some());
        assert!(json["limits"].get("dailyLimitUSD").is_some());
        assert!(json["limits"].get("perTransactionLimitUSD").is_some());
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("nonce").is_some());
    }

    #[tokio::test]
    async fn test_validate_rejects_garbage() {
        let (vault, _, _) = vault_with_session().await;
        assert_eq!(
            vault.validate("!!!not-a-token").await.unwrap_err(),
            TokenRejection::Malformed
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_wrong_type() {
        let (vault, _, _) = vault_with_session().await;
        let json = serde_json::json!({
            "keyHash": B256::repeat_byte(0x11),
            "type": "SOME_OTHER_TOKEN",
            "limits": {"dailyLimitUSD": 0, "perTransactionLimitUSD": 0},
            "expiresAt": "2000",
            "nonce": "00",
        });
        let token = Base64UrlBytes::encode(serde_json::to_vec(&json).unwrap()).to_string();
        assert_eq!(
            vault.validate(&token).await.unwrap_err(),
            TokenRejection::Malformed
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_unindexed_but_wellformed() {
        let (vault, _, session) = vault_with_session().await;
        let token = vault.mint(&session, Some(60));
        assert!(vault.revoke(&token.token));
        // Structurally fine, but no longer in the index.
        assert_eq!(
            vault.validate(&token.token).await.unwrap_err(),
            TokenRejection::NotFound
        );
    }

    #[tokio::test]
    async fn test_validate_expired_token_evicts() {
        let (vault, clock, session) = vault_with_session().await;
        let token = vault.mint(&session, Some(60));
        clock.advance(61);
        assert_eq!(
            vault.validate(&token.token).await.unwrap_err(),
            TokenRejection::Expired
        );
        assert_eq!(vault.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_validate_session_expired() {
        let clock = Arc::new(ManualClock::new(UnixTimestamp::from_secs(1000)));
        let store = Arc::new(MemorySessionStore::new());
        let session = sample_session(UnixTimestamp::from_secs(1000), 1000 + 3600);
        store.put(&session).await.unwrap();
        let vault = TokenVault::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let token = vault.mint(&session, Some(3600));

        // The session's expiry is shortened after mint; the token now
        // outlives it and must report the underlying session as expired.
        let mut shortened = session.clone();
        shortened.policy.expires_at = UnixTimestamp::from_secs(1030);
        store.put(&shortened).await.unwrap();
        clock.set(UnixTimestamp::from_secs(1031));

        let err = vault.validate(&token.token).await.unwrap_err();
        assert_eq!(err, TokenRejection::SessionExpired);
        assert_eq!(vault.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_validate_revoked_session() {
        let clock = Arc::new(ManualClock::new(UnixTimestamp::from_secs(1000)));
        let store = Arc::new(MemorySessionStore::new());
        let session = sample_session(UnixTimestamp::from_secs(1000), 1000 + 3600);
        store.put(&session).await.unwrap();
        let vault = TokenVault::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            clock as Arc<dyn Clock>,
        );

        let token = vault.mint(&session, Some(60));
        store.delete(&session.key_hash).await.unwrap();
        assert_eq!(
            vault.validate(&token.token).await.unwrap_err(),
            TokenRejection::SessionRevoked
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_token() {
        let (vault, _, session) = vault_with_session().await;
        let old = vault.mint(&session, Some(60));
        let new = vault.refresh(&old.token, &session).await.unwrap();
        assert_ne!(new.token, old.token);
        // Old token is consumed.
        assert_eq!(
            vault.validate(&old.token).await.unwrap_err(),
            TokenRejection::NotFound
        );
        assert!(vault.validate(&new.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_invalid_token_returns_none() {
        let (vault, _, session) = vault_with_session().await;
        assert!(vault.refresh("garbage", &session).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (vault, _, session) = vault_with_session().await;
        let token = vault.mint(&session, Some(60));
        assert!(vault.revoke(&token.token));
        assert!(!vault.revoke(&token.token));
    }

    #[tokio::test]
    async fn test_revoke_all_for_session() {
        let (vault, _, session) = vault_with_session().await;
        let a = vault.mint(&session, Some(60));
        let b = vault.mint(&session, Some(60));
        assert!(vault.validate(&a.token).await.is_ok());
        assert!(vault.validate(&b.token).await.is_ok());

        let removed = vault.revoke_all_for_session(&session.key_hash);
        assert_eq!(removed, 2);
        assert!(vault.validate(&a.token).await.is_err());
        assert!(vault.validate(&b.token).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (vault, clock, session) = vault_with_session().await;
        vault.mint(&session, Some(60));
        vault.mint(&session, Some(120));
        clock.advance(61);
        assert_eq!(vault.cleanup(), 1);
        assert_eq!(vault.cleanup(), 0);
        assert_eq!(vault.outstanding(), 1);
    }
}
