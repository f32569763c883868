//! Session creation, loading, revocation, and spending.
//!
//! The manager composes the credential vault, the store, the ledger, and
//! the token vault. It is the only place session state is mutated:
//! `check_limits` and `record_spending` serialize through a per-session
//! mutex, and `record_spending` re-verifies the cap invariant under that
//! lock before committing — a concurrent race can therefore delay a
//! spend, never overdraw one.

use alloy_primitives::B256;
use dashmap::DashMap;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use alloy_signer_local::PrivateKeySigner;

use veridex::clock::Clock;
use veridex::error::{CredentialError, PaymentErrorCode, PolicyError};
use veridex::timestamp::{DAY_SECS, UnixTimestamp};
use veridex::usd::Usd;

use veridex_evm::chain::session_key_hash;
use veridex_evm::signer::SessionScalar;

use crate::credential::CredentialVault;
use crate::ledger::{self, Decision, DenyReason};
use crate::session::{LedgerState, MasterCredential, Session, SessionPolicy};
use crate::store::{SessionStore, StoreError};
use crate::token_vault::TokenVault;

/// Errors from session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The proposed policy violates a session invariant.
    #[error("invalid policy: {field}")]
    InvalidPolicy {
        /// The offending policy field, by its persisted name.
        field: &'static str,
    },
    /// No session exists under the given key hash.
    #[error("unknown session {key_hash}")]
    NotFound {
        /// The key hash that was looked up.
        key_hash: B256,
    },
    /// A spend was refused by policy.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Key material could not be decrypted or used.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The backing store failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Stored ledger state violates the cap invariant; the session has
    /// been quarantined and remains in storage for audit.
    #[error("ledger corruption in session {key_hash}")]
    LedgerCorruption {
        /// The quarantined session.
        key_hash: B256,
    },
}

impl SessionError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn error_code(&self) -> PaymentErrorCode {
        match self {
            Self::InvalidPolicy { .. } | Self::LedgerCorruption { .. } => {
                PaymentErrorCode::SessionInvalid
            }
            Self::NotFound { .. } => PaymentErrorCode::SessionRevoked,
            Self::Policy(policy) => policy.error_code(),
            Self::Credential(credential) => credential.error_code(),
            Self::Storage(_) => PaymentErrorCode::NetworkError,
        }
    }
}

/// Creates, loads, revokes, and spends against sessions.
pub struct SessionManager {
    vault: CredentialVault,
    store: Arc<dyn SessionStore>,
    tokens: Arc<TokenVault>,
    clock: Arc<dyn Clock>,
    locks: DashMap<B256, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager over the given collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, tokens: Arc<TokenVault>, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault: CredentialVault::new(),
            store,
            tokens,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Returns the token vault shared with this manager.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenVault> {
        &self.tokens
    }

    /// Returns the manager's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Creates a session for `master` under `policy`.
    ///
    /// The policy is validated first; nothing is persisted on a policy
    /// failure. A fresh secp256k1 keypair is generated, the scalar is
    /// encrypted under the credential-derived key, and the session is
    /// written to the store. No network I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPolicy`] naming the offending
    /// field, or [`SessionError::Storage`] when persistence fails.
    pub async fn create(
        &self,
        master: &MasterCredential,
        policy: SessionPolicy,
    ) -> Result<Session, SessionError> {
        let now = self.clock.now();
        validate_policy(&policy, now)?;

        let signer = PrivateKeySigner::random();
        let public_key = signer
            .credential()
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let key_hash = session_key_hash(&public_key);

        let key = self.vault.derive_key(&master.credential_id);
        let scalar = Zeroizing::new(signer.to_bytes().0);
        let ciphertext = self.vault.encrypt(scalar.as_ref(), &key)?;
        drop(scalar);
        drop(signer);

        let session = Session {
            key_hash,
            encrypted_private_key: format!("0x{}", hex::encode(ciphertext)),
            public_key: public_key.into(),
            policy,
            ledger: LedgerState::new(now),
            master_key_hash: master.key_hash,
        };
        self.store.put(&session).await?;
        Ok(session)
    }

    /// Loads a session without any validity check.
    ///
    /// Callers ask about validity explicitly via [`Self::is_valid`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the store fails.
    pub async fn load(&self, key_hash: &B256) -> Result<Option<Session>, SessionError> {
        Ok(self.store.get(key_hash).await?)
    }

    /// Returns whether a session is usable right now.
    ///
    /// A session is valid when it is present in the store, not
    /// quarantined, and not yet expired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the store fails.
    pub async fn is_valid(&self, session: &Session) -> Result<bool, SessionError> {
        if session.is_expired(self.clock.now()) {
            return Ok(false);
        }
        if self.store.get(&session.key_hash).await?.is_none() {
            return Ok(false);
        }
        Ok(!self.store.is_quarantined(&session.key_hash).await?)
    }

    /// Checks whether `amount` may be spent from a session.
    ///
    /// Loads fresh state under the session's lock and advances the daily
    /// window before deciding, so the decision is never made against a
    /// stale window. The window advance is not persisted here; the next
    /// [`Self::record_spending`] re-derives it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions and
    /// [`SessionError::LedgerCorruption`] when stored state already
    /// violates the cap invariant (the session is quarantined).
    pub async fn check_limits(
        &self,
        key_hash: &B256,
        amount: Usd,
    ) -> Result<Decision, SessionError> {
        let lock = self.session_lock(key_hash);
        let _guard = lock.lock().await;
        let mut session = self.load_checked(key_hash).await?;
        Ok(ledger::check(
            &session.policy,
            &mut session.ledger,
            amount,
            self.clock.now(),
        ))
    }

    /// Records a spend of `amount` against a session and persists it.
    ///
    /// The ledger pre-condition is re-verified under the session's lock;
    /// a refusal leaves the stored state untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Policy`] when the spend would violate the
    /// policy, plus the same failures as [`Self::check_limits`].
    pub async fn record_spending(
        &self,
        key_hash: &B256,
        amount: Usd,
    ) -> Result<Session, SessionError> {
        let lock = self.session_lock(key_hash);
        let _guard = lock.lock().await;
        let mut session = self.load_checked(key_hash).await?;
        let now = self.clock.now();
        ledger::record(&session.policy, &mut session.ledger, amount, now)
            .map_err(|refusal| policy_error(refusal.reason, refusal.remaining))?;
        self.store.put(&session).await?;
        Ok(session)
    }

    /// Revokes a session and every payment token minted from it.
    ///
    /// Idempotent: revoking an absent session is not an error. Returns
    /// the number of tokens invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the store fails.
    pub async fn revoke(&self, key_hash: &B256) -> Result<usize, SessionError> {
        self.store.delete(key_hash).await?;
        let revoked = self.tokens.revoke_all_for_session(key_hash);
        self.locks.remove(key_hash);
        Ok(revoked)
    }

    /// Lists the valid sessions belonging to a master credential.
    ///
    /// Expired and quarantined sessions are filtered out; they remain in
    /// storage for audit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the store fails.
    pub async fn sessions_for_master(
        &self,
        master_key_hash: &B256,
    ) -> Result<Vec<Session>, SessionError> {
        let now = self.clock.now();
        let mut valid = Vec::new();
        for session in self.store.list_by_master(master_key_hash).await? {
            if session.is_expired(now) {
                continue;
            }
            if self.store.is_quarantined(&session.key_hash).await? {
                continue;
            }
            valid.push(session);
        }
        Ok(valid)
    }

    /// Decrypts a session's signing scalar for one signature.
    ///
    /// The scalar comes back wrapped in a [`SessionScalar`], which
    /// zeroizes itself on drop; it must be handed straight to the signer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Credential`] when decryption fails or the
    /// plaintext is not a valid 32-byte scalar.
    pub fn signing_key(
        &self,
        session: &Session,
        credential_id: &str,
    ) -> Result<SessionScalar, SessionError> {
        let key = self.vault.derive_key(credential_id);
        let plaintext = self
            .vault
            .decrypt_encoded(&session.encrypted_private_key, &key)?;
        SessionScalar::from_bytes(plaintext)
            .map_err(|_| SessionError::Credential(CredentialError::InvalidKeyMaterial))
    }

    /// Zeroizes every cached encryption key.
    pub fn shutdown(&self) {
        self.vault.shutdown();
    }

    fn session_lock(&self, key_hash: &B256) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .locks
                .entry(*key_hash)
                .or_insert_with(|| Arc::new(Mutex::new(())))
        )
    }

    async fn load_checked(&self, key_hash: &B256) -> Result<Session, SessionError> {
        let session = self
            .store
            .get(key_hash)
            .await?
            .ok_or(SessionError::NotFound {
                key_hash: *key_hash,
            })?;
        if self.store.is_quarantined(key_hash).await? {
            return Err(SessionError::LedgerCorruption {
                key_hash: *key_hash,
            });
        }
        if ledger_is_corrupt(&session) {
            tracing::error!(key_hash = %key_hash, "stored ledger violates cap invariant, quarantining session");
            self.store.set_quarantined(key_hash).await?;
            return Err(SessionError::LedgerCorruption {
                key_hash: *key_hash,
            });
        }
        Ok(session)
    }
}

fn ledger_is_corrupt(session: &Session) -> bool {
    let ledger = &session.ledger;
    ledger.daily_spent.is_negative()
        || ledger.total_spent.is_negative()
        || ledger.daily_spent > session.policy.daily_cap
}

fn validate_policy(policy: &SessionPolicy, now: UnixTimestamp) -> Result<(), SessionError> {
    if policy.daily_cap.is_negative() {
        return Err(SessionError::InvalidPolicy {
            field: "dailyLimitUSD",
        });
    }
    if !policy.per_tx_cap.is_positive() || policy.per_tx_cap > policy.daily_cap {
        return Err(SessionError::InvalidPolicy {
            field: "perTransactionLimitUSD",
        });
    }
    if policy.expires_at <= now || policy.expires_at > now + DAY_SECS {
        return Err(SessionError::InvalidPolicy {
            field: "expiryTimestamp",
        });
    }
    if policy.allowed_chain_ids.is_empty() {
        return Err(SessionError::InvalidPolicy {
            field: "allowedChains",
        });
    }
    Ok(())
}

fn policy_error(reason: DenyReason, remaining: Usd) -> SessionError {
    let error = match reason {
        DenyReason::Expired => PolicyError::Expired {
            reason: reason.to_string(),
        },
        DenyReason::PerTransactionLimit => PolicyError::PerTxExceeded {
            reason: reason.to_string(),
            remaining,
        },
        DenyReason::DailyLimit => PolicyError::DailyExceeded {
            reason: reason.to_string(),
            remaining,
        },
    };
    SessionError::Policy(error)
}
