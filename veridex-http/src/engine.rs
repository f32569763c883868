//! The 402 negotiation state machine.
//!
//! [`X402Engine::handle_fetch`] drives one request through the full
//! exchange: issue, detect 402, parse, policy-check, sign, record, retry
//! with proof, interpret settlement. The flow is a single linear sequence
//! of await points; cancellation unwinds it cooperatively, and a request
//! cancelled before the `Recorded` step leaves the ledger untouched.
//!
//! Spending is recorded *before* the retry. This is deliberate and
//! conservative: it prevents a double-spend when the retry races another
//! agent thread, at the cost of a stranded increment when the retry is
//! lost — that trade-off is part of the contract, and the audit record
//! marks such payments `failed`.

use alloy_primitives::B256;
use http::{HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use veridex::error::{PolicyError, ProtocolError, TransientError};
use veridex::oracle::PriceOracle;
use veridex::proto::{self, SettlementWire, parser};
use veridex::proto::parser::PaymentRequest;
use veridex::usd::Usd;

use veridex_evm::amount::interpret_amount;
use veridex_evm::signer::{AuthorizationSigner, SessionScalar, SignedAuthorization, SignerError};
use veridex_evm::tokens;

use veridex_session::alerts::AlertBus;
use veridex_session::audit::{AuditLog, NewPaymentRecord, PaymentProtocol, PaymentStatus};
use veridex_session::ledger::{Decision, DenyReason};
use veridex_session::manager::{SessionError, SessionManager};

use crate::client::{HttpClient, HttpRequest, HttpResponse};
use crate::price;

/// Default time budget for each HTTP exchange.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the 402 negotiation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A spend was refused by session policy. Never retried internally.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The 402 exchange was malformed or the server rejected the proof.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Session state could not be loaded, decrypted, or updated.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Authorization signing failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// A retryable transport or oracle failure. The caller retries with
    /// backoff; the engine never does.
    #[error(transparent)]
    Transient(#[from] TransientError),
    /// The caller cancelled the exchange.
    #[error("payment exchange cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub const fn error_code(&self) -> veridex::error::PaymentErrorCode {
        match self {
            Self::Policy(policy) => policy.error_code(),
            Self::Protocol(protocol) => protocol.error_code(),
            Self::Session(session) => session.error_code(),
            Self::Signer(_) => veridex::error::PaymentErrorCode::SessionInvalid,
            Self::Transient(transient) => transient.error_code(),
            Self::Cancelled => veridex::error::PaymentErrorCode::PaymentTimeout,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Time budget for each HTTP exchange (initial request and retry
    /// each get the full budget).
    pub payment_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }
}

/// The 402 negotiation engine.
///
/// Composes the HTTP capability, the session manager, the authorization
/// signer, the price oracle, the alert bus, and the audit log. All
/// collaborators are shared by `Arc`, so one engine can serve many
/// concurrent exchanges; per-session ordering is enforced inside the
/// session manager.
pub struct X402Engine {
    http: Arc<dyn HttpClient>,
    sessions: Arc<SessionManager>,
    signer: AuthorizationSigner,
    oracle: Arc<dyn PriceOracle>,
    alerts: Arc<AlertBus>,
    audit: Arc<AuditLog>,
    config: EngineConfig,
}

impl std::fmt::Debug for X402Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl X402Engine {
    /// Creates an engine with default signer and timeout settings.
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpClient>,
        sessions: Arc<SessionManager>,
        oracle: Arc<dyn PriceOracle>,
        alerts: Arc<AlertBus>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            http,
            sessions,
            signer: AuthorizationSigner::default(),
            oracle,
            alerts,
            audit,
            config: EngineConfig::default(),
        }
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the authorization signer.
    #[must_use]
    pub const fn with_signer(mut self, signer: AuthorizationSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Performs a request, transparently paying a 402 challenge.
    ///
    /// Non-402 responses pass through unchanged. On a 402, the engine
    /// parses the challenge, applies the session's policy, signs an
    /// authorization, records the spend, and retries exactly once with
    /// the `PAYMENT-SIGNATURE` header merged in (caller headers win on
    /// conflict except for that one). A second 402 is surfaced as
    /// [`ProtocolError::PaymentRejected`]; a settlement header reporting
    /// failure is logged but the response is still returned — settlement
    /// failure does not contradict the HTTP success of the retried call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for policy refusals, protocol failures,
    /// signing failures, transport failures, and cancellation.
    pub async fn handle_fetch(
        &self,
        request: HttpRequest,
        session_key_hash: B256,
        credential_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EngineError> {
        let retry_template = request.clone();
        let response = self.send_guarded(request, cancel).await?;

        if response.status != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }
        if response.headers.contains_key(proto::UCP_INITIATION_URL) {
            // UCP handoff is a collaborator's concern; surface untouched.
            tracing::debug!("402 carries a UCP initiation URL, skipping x402 negotiation");
            return Ok(response);
        }

        let challenge = parser::parse_challenge(&response.headers)
            .ok_or(EngineError::Protocol(ProtocolError::MalformedChallenge))?;
        tracing::debug!(
            network = %challenge.network,
            amount = %challenge.amount,
            "parsed 402 challenge"
        );

        let (signed, units, amount_usd) = self
            .authorize(&challenge, session_key_hash, credential_id)
            .await?;

        let mut retry = retry_template;
        retry.headers.insert(
            HeaderName::from_static(proto::PAYMENT_SIGNATURE),
            HeaderValue::from_str(&signed.payload_b64)
                .map_err(|_| EngineError::Signer(SignerError::Encoding("header value".into())))?,
        );

        let retry_response = match self.send_guarded(retry, cancel).await {
            Ok(response) => response,
            Err(error) => {
                // The ledger is already incremented; the record keeps the
                // stranded spend visible for manual reconciliation.
                self.append_audit(
                    &challenge,
                    session_key_hash,
                    &units,
                    amount_usd,
                    PaymentStatus::Failed,
                    None,
                    PaymentProtocol::X402,
                )
                .await;
                return Err(error);
            }
        };

        if retry_response.status == StatusCode::PAYMENT_REQUIRED {
            let server_reason = retry_response
                .headers
                .get(proto::PAYMENT_REQUIRED)
                .and_then(|value| value.to_str().ok())
                .and_then(parser::parse_challenge_error)
                .unwrap_or_else(|| "payment rejected".to_owned());
            self.append_audit(
                &challenge,
                session_key_hash,
                &units,
                amount_usd,
                PaymentStatus::Failed,
                None,
                PaymentProtocol::X402,
            )
            .await;
            return Err(EngineError::Protocol(ProtocolError::PaymentRejected {
                server_reason,
            }));
        }

        let settlement = retry_response
            .headers
            .get(proto::PAYMENT_RESPONSE)
            .and_then(|value| value.to_str().ok())
            .map(proto::decode_header::<SettlementWire>);
        let (status, tx_hash) = match settlement {
            None => (PaymentStatus::Pending, None),
            Some(None) => {
                tracing::warn!("settlement header present but undecodable");
                (PaymentStatus::Pending, None)
            }
            Some(Some(settlement)) if settlement.success => {
                (PaymentStatus::Confirmed, settlement.transaction_hash)
            }
            Some(Some(settlement)) => {
                tracing::warn!(
                    error = settlement.error.as_deref().unwrap_or("unspecified"),
                    "server reported settlement failure"
                );
                (PaymentStatus::Failed, settlement.transaction_hash)
            }
        };
        self.append_audit(
            &challenge,
            session_key_hash,
            &units,
            amount_usd,
            status,
            tx_hash,
            PaymentProtocol::X402,
        )
        .await;

        Ok(retry_response)
    }

    /// Authorizes an agent-initiated payment without a 402 exchange.
    ///
    /// Runs the same policy pipeline as the 402 flow — validate, convert
    /// to USD, check limits, sign, record — and returns the signed
    /// authorization for an external broadcaster. An audit record is
    /// appended with `protocol = direct` and `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for policy refusals and signing failures.
    pub async fn authorize_payment(
        &self,
        request: &PaymentRequest,
        session_key_hash: B256,
        credential_id: &str,
    ) -> Result<SignedAuthorization, EngineError> {
        let (signed, units, amount_usd) = self
            .authorize(request, session_key_hash, credential_id)
            .await?;
        self.append_audit(
            request,
            session_key_hash,
            &units,
            amount_usd,
            PaymentStatus::Pending,
            None,
            PaymentProtocol::Direct,
        )
        .await;
        Ok(signed)
    }

    /// The shared policy-check → sign → record pipeline.
    async fn authorize(
        &self,
        challenge: &PaymentRequest,
        session_key_hash: B256,
        credential_id: &str,
    ) -> Result<(SignedAuthorization, String, Usd), EngineError> {
        let session = self
            .sessions
            .load(&session_key_hash)
            .await
            .map_err(flatten_session_error)?
            .ok_or(EngineError::Session(SessionError::NotFound {
                key_hash: session_key_hash,
            }))?;
        if !session.policy.allows_chain(challenge.chain_id) {
            return Err(EngineError::Policy(PolicyError::ChainNotAllowed {
                chain_id: challenge.chain_id,
            }));
        }

        let token = self.signer.resolve_token(challenge);
        let decimals = tokens::token_decimals(token);
        let units = interpret_amount(&challenge.amount, decimals).map_err(SignerError::Amount)?;
        let amount_usd = price::amount_usd(
            &challenge.asset,
            token,
            challenge.chain_id,
            units,
            decimals,
            &*self.oracle,
        )
        .await?;

        let decision = self
            .sessions
            .check_limits(&session_key_hash, amount_usd)
            .await
            .map_err(flatten_session_error)?;
        if let Decision::Deny { reason, remaining } = decision {
            return Err(EngineError::Policy(deny_to_policy(reason, remaining)));
        }

        let scalar: SessionScalar = self
            .sessions
            .signing_key(&session, credential_id)
            .map_err(flatten_session_error)?;
        let now = self.sessions.clock().now();
        let signed = self.signer.sign(challenge, scalar, now)?;

        // The ledger increment precedes the retry.
        let updated = self
            .sessions
            .record_spending(&session_key_hash, amount_usd)
            .await
            .map_err(flatten_session_error)?;
        self.alerts.on_spending(
            session_key_hash,
            updated.ledger.daily_spent,
            updated.policy.daily_cap,
        );

        Ok((signed, units.to_string(), amount_usd))
    }

    async fn send_guarded(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EngineError> {
        tokio::select! {
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            result = tokio::time::timeout(self.config.payment_timeout, self.http.send(request)) => {
                match result {
                    Err(_) => Err(EngineError::Transient(TransientError::Timeout)),
                    Ok(inner) => inner.map_err(EngineError::Transient),
                }
            }
        }
    }

    async fn append_audit(
        &self,
        challenge: &PaymentRequest,
        session_key_hash: B256,
        units: &str,
        amount_usd: Usd,
        status: PaymentStatus,
        tx_hash: Option<String>,
        protocol: PaymentProtocol,
    ) {
        let record = NewPaymentRecord {
            session_key_hash,
            recipient: challenge.pay_to.clone(),
            amount: units.to_owned(),
            amount_usd,
            token: challenge.asset.clone(),
            chain_id: challenge.chain_id,
            status,
            tx_hash,
            protocol,
        };
        let now = self.sessions.clock().now();
        if let Err(error) = self.audit.log(record, now).await {
            tracing::warn!(error = %error, "audit append failed; payment path continues");
        }
    }
}

fn flatten_session_error(error: SessionError) -> EngineError {
    match error {
        SessionError::Policy(policy) => EngineError::Policy(policy),
        other => EngineError::Session(other),
    }
}

fn deny_to_policy(reason: DenyReason, remaining: Usd) -> PolicyError {
    match reason {
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use veridex::clock::{Clock, SystemClock};
    use veridex::encoding::Base64Bytes;
    use veridex::networks;
    use veridex::oracle::FixedPriceOracle;
    use veridex::timestamp::UnixTimestamp;

    use veridex_session::audit::AuditFilter;
    use veridex_session::session::{MasterCredential, SessionPolicy};
    use veridex_session::store::{MemorySessionStore, SessionStore};
    use veridex_session::token_vault::TokenVault;

    use crate::client::ReqwestClient;

    const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const RECIPIENT: &str = "0x0000000000000000000000000000000000000001";

    struct TestStack {
        engine: X402Engine,
        sessions: Arc<SessionManager>,
        session_key_hash: B256,
        audit: Arc<AuditLog>,
    }

    async fn stack(per_tx: Usd, daily: Usd) -> TestStack {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let tokens = Arc::new(TokenVault::new(Arc::clone(&store), Arc::clone(&clock)));
        let sessions = Arc::new(SessionManager::new(store, tokens, Arc::clone(&clock)));
        let master = MasterCredential {
            credential_id: "credential-a".into(),
            key_hash: B256::repeat_byte(0xaa),
            public_key_x: B256::ZERO,
            public_key_y: B256::ZERO,
        };
        let session = sessions
            .create(
                &master,
                SessionPolicy {
                    daily_cap: daily,
                    per_tx_cap: per_tx,
                    expires_at: UnixTimestamp::now() + 3600,
                    allowed_chain_ids: vec![networks::BASE_MAINNET],
                },
            )
            .await
            .unwrap();
        let audit = Arc::new(AuditLog::temporary().unwrap());
        let alerts = Arc::new(AlertBus::new(Arc::clone(&sessions.clock())));
        let engine = X402Engine::new(
            Arc::new(ReqwestClient::new()),
            Arc::clone(&sessions),
            Arc::new(FixedPriceOracle::new()),
            alerts,
            Arc::clone(&audit),
        );
        TestStack {
            engine,
            sessions,
            session_key_hash: session.key_hash,
            audit,
        }
    }

    fn challenge_value(amount: &str) -> String {
        let json = serde_json::json!({
            "paymentRequirements": [{
                "scheme": "exact",
                "network": "base-mainnet",
                "maxAmountRequired": amount,
                "asset": USDC,
                "payTo": RECIPIENT,
            }]
        });
        Base64Bytes::encode(serde_json::to_vec(&json).unwrap()).to_string()
    }

    fn settlement_value(success: bool, tx_hash: Option<&str>) -> String {
        let json = serde_json::json!({
            "success": success,
            "transactionHash": tx_hash,
            "network": "base-mainnet",
            "amount": "1000000",
            "error": if success { serde_json::Value::Null } else { "insufficient funds".into() },
        });
        Base64Bytes::encode(serde_json::to_vec(&json).unwrap()).to_string()
    }

    fn request_for(server: &MockServer) -> HttpRequest {
        let url: Url = format!("{}/resource", server.uri()).parse().unwrap();
        HttpRequest::get(url)
    }

    async fn daily_spent(stack: &TestStack) -> Usd {
        stack
            .sessions
            .load(&stack.session_key_hash)
            .await
            .unwrap()
            .unwrap()
            .ledger
            .daily_spent
    }

    #[tokio::test]
    async fn test_non_402_passes_through() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let response = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"hello");
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(daily_spent(&stack).await, Usd::ZERO);
    }

    #[tokio::test]
    async fn test_malformed_challenge_fails() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(402).insert_header("payment-required", "%%%"))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::MalformedChallenge)
        ));
    }

    #[tokio::test]
    async fn test_missing_challenge_header_fails() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::MalformedChallenge)
        ));
    }

    #[tokio::test]
    async fn test_happy_path_pays_and_records() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        // First request gets the challenge; the paid retry gets 200.
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(402)
                    .insert_header("payment-required", challenge_value("1000000").as_str()),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "payment-response",
                        settlement_value(true, Some("0xabc")).as_str(),
                    )
                    .set_body_string("paid content"),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let response = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"paid content");

        // The retry carried the payment proof.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].headers.contains_key("payment-signature"));
        assert!(requests[1].headers.contains_key("payment-signature"));

        // $1.00 hit the ledger.
        assert_eq!(daily_spent(&stack).await, Usd::from_dollars(1));

        // One confirmed x402 audit record.
        let records = stack.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Confirmed);
        assert_eq!(records[0].protocol, PaymentProtocol::X402);
        assert_eq!(records[0].tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(records[0].amount, "1000000");
        assert_eq!(records[0].amount_usd, Usd::from_dollars(1));
    }

    #[tokio::test]
    async fn test_policy_deny_means_no_sign_no_retry_no_ledger() {
        let stack = stack(Usd::from_micros(500_000), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(402)
                    .insert_header("payment-required", challenge_value("1000000").as_str()),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Policy(PolicyError::PerTxExceeded { .. })
        ));

        // No retry went out, nothing was recorded, nothing was audited.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(daily_spent(&stack).await, Usd::ZERO);
        assert!(stack.audit.query(&AuditFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_402_is_payment_rejected() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(402)
                    .insert_header("payment-required", challenge_value("1000000").as_str()),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::PaymentRejected { .. })
        ));

        // Recording happens before the retry leaves.
        assert_eq!(daily_spent(&stack).await, Usd::from_dollars(1));
        let records = stack.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_settlement_failure_still_returns_response() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(402)
                    .insert_header("payment-required", challenge_value("1000000").as_str()),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("payment-response", settlement_value(false, None).as_str()),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let response = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap();
        // The HTTP call succeeded even though settlement did not.
        assert_eq!(response.status, StatusCode::OK);

        let records = stack.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_before_recorded_has_no_ledger_effect() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(daily_spent(&stack).await, Usd::ZERO);
    }

    #[tokio::test]
    async fn test_chain_not_allowed_is_refused() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let server = MockServer::start().await;
        let json = serde_json::json!({
            "paymentRequirements": [{
                "scheme": "exact",
                "network": "ethereum-mainnet",
                "maxAmountRequired": "1000000",
                "asset": "USDC",
                "payTo": RECIPIENT,
            }]
        });
        let value = Base64Bytes::encode(serde_json::to_vec(&json).unwrap()).to_string();
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(402).insert_header("payment-required", value.as_str()))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = stack
            .engine
            .handle_fetch(
                request_for(&server),
                stack.session_key_hash,
                "credential-a",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Policy(PolicyError::ChainNotAllowed { .. })
        ));
        assert_eq!(daily_spent(&stack).await, Usd::ZERO);
    }

    #[tokio::test]
    async fn test_direct_authorization_signs_and_records() {
        let stack = stack(Usd::from_dollars(25), Usd::from_dollars(100)).await;
        let request = PaymentRequest {
            scheme: veridex::proto::PaymentScheme::Exact,
            network: "base".into(),
            chain_id: networks::BASE_MAINNET,
            asset: USDC.into(),
            pay_to: RECIPIENT.into(),
            amount: "1000000".into(),
            facilitator: None,
            deadline: None,
            scheme_version: 1,
        };

        let signed = stack
            .engine
            .authorize_payment(&request, stack.session_key_hash, "credential-a")
            .await
            .unwrap();

        let session = stack
            .sessions
            .load(&stack.session_key_hash)
            .await
            .unwrap()
            .unwrap();
        let address = session.address().unwrap();
        assert!(veridex_evm::signer::verify(
            &signed.signature,
            &signed.authorization,
            address,
            8453,
            veridex_evm::tokens::USDC_BASE,
        ));
        assert_eq!(daily_spent(&stack).await, Usd::from_dollars(1));

        let records = stack.audit.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol, PaymentProtocol::Direct);
        assert_eq!(records[0].status, PaymentStatus::Pending);

        // A second authorization gets a fresh nonce.
        let again = stack
            .engine
            .authorize_payment(&request, stack.session_key_hash, "credential-a")
            .await
            .unwrap();
        assert_ne!(again.nonce(), signed.nonce());
    }
}
