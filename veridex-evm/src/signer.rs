//! ERC-3009 `TransferWithAuthorization` signing and verification.
//!
//! [`AuthorizationSigner::sign`] turns a parsed 402 challenge and a
//! session's signing scalar into a replay-safe EIP-712 signature plus the
//! base64 proof envelope carried on the retry request. [`verify`]
//! recomputes the identical typed data out-of-band and recovers the
//! signer, so a proof can be checked without any chain access.

use alloy_primitives::{Address, B256, Bytes, Signature, U256, hex};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use veridex::proto::parser::PaymentRequest;
use veridex::proto::{self, PaymentPayload, SignedPayload, V1};
use veridex::timestamp::UnixTimestamp;

use crate::amount::{AmountError, interpret_amount};
use crate::chain::{TokenAmount, evm_chain_id};
use crate::tokens;

/// Seconds an authorization stays valid when the challenge names no
/// deadline.
pub const DEFAULT_AUTHORIZATION_TTL_SECS: u64 = 300;

sol!(
    /// EIP-712 struct for ERC-3009 `transferWithAuthorization`.
    ///
    /// Field order and types must match the on-chain definition exactly;
    /// the same struct is rebuilt during verification to recompute the
    /// signing hash.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

/// The structured ERC-3009 authorization that was signed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// The address authorizing the transfer (the session address).
    pub from: Address,
    /// The recipient address.
    pub to: Address,
    /// The amount in the token's smallest unit.
    pub value: TokenAmount,
    /// The authorization is not valid before this timestamp.
    pub valid_after: UnixTimestamp,
    /// The authorization expires at this timestamp.
    pub valid_before: UnixTimestamp,
    /// A unique 32-byte nonce preventing replay.
    pub nonce: B256,
}

impl Authorization {
    fn as_sol_struct(&self) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: self.from,
            to: self.to,
            value: self.value.inner(),
            validAfter: U256::from(self.valid_after.as_secs()),
            validBefore: U256::from(self.valid_before.as_secs()),
            nonce: self.nonce,
        }
    }
}

/// A signed authorization plus its wire-ready proof envelope.
#[derive(Debug, Clone)]
pub struct SignedAuthorization {
    /// The 65-byte EIP-712 signature.
    pub signature: Bytes,
    /// The authorization that was signed.
    pub authorization: Authorization,
    /// Base64 of the proof envelope, the `PAYMENT-SIGNATURE` header value.
    pub payload_b64: String,
}

impl SignedAuthorization {
    /// Returns the replay-protection nonce.
    #[must_use]
    pub const fn nonce(&self) -> B256 {
        self.authorization.nonce
    }

    /// Returns the authorization deadline.
    #[must_use]
    pub const fn deadline(&self) -> UnixTimestamp {
        self.authorization.valid_before
    }
}

/// Errors from authorization signing.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The challenge amount string could not be interpreted.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// The recipient address is not a valid EVM address.
    #[error("invalid recipient address {0:?}")]
    InvalidRecipient(String),
    /// The decrypted scalar is not a valid secp256k1 signing key.
    #[error("invalid signing key material")]
    InvalidKeyMaterial,
    /// The underlying ECDSA signing operation failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The proof envelope could not be serialized.
    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

/// A session signing scalar, zeroized when dropped.
///
/// The scalar exists in plaintext only inside this wrapper and only for
/// the duration of one [`AuthorizationSigner::sign`] call.
pub struct SessionScalar(Zeroizing<[u8; 32]>);

impl SessionScalar {
    /// Wraps raw scalar bytes, consuming and zeroizing the source buffer.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::InvalidKeyMaterial`] when the input is not
    /// exactly 32 bytes.
    pub fn from_bytes(bytes: Zeroizing<Vec<u8>>) -> Result<Self, SignerError> {
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKeyMaterial);
        }
        let mut scalar = Zeroizing::new([0u8; 32]);
        scalar.copy_from_slice(&bytes);
        Ok(Self(scalar))
    }
}

impl std::fmt::Debug for SessionScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionScalar(..)")
    }
}

/// Configuration for the authorization signer.
#[derive(Debug, Clone, Copy)]
pub struct SignerConfig {
    /// Asset substituted when a challenge names an unresolvable symbol.
    pub default_asset: Address,
    /// Validity window applied when the challenge has no deadline.
    pub authorization_ttl_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            default_asset: tokens::USDC_BASE,
            authorization_ttl_secs: DEFAULT_AUTHORIZATION_TTL_SECS,
        }
    }
}

/// Signs ERC-3009 transfer authorizations for payment challenges.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationSigner {
    config: SignerConfig,
}

impl AuthorizationSigner {
    /// Creates a signer with the given configuration.
    #[must_use]
    pub const fn new(config: SignerConfig) -> Self {
        Self { config }
    }

    /// Returns the signer configuration.
    #[must_use]
    pub const fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Resolves the token contract a challenge is paying with.
    #[must_use]
    pub fn resolve_token(&self, request: &PaymentRequest) -> Address {
        let (address, _) =
            tokens::resolve_asset(&request.asset, request.chain_id, self.config.default_asset);
        address
    }

    /// Signs an ERC-3009 `TransferWithAuthorization` for a challenge.
    ///
    /// The scalar is consumed: it is materialized into a signer for
    /// exactly one signature and zeroized before this function returns,
    /// on success and on every failure path.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] when the challenge amount or recipient is
    /// invalid, the scalar is not a valid key, or signing itself fails.
    pub fn sign(
        &self,
        request: &PaymentRequest,
        scalar: SessionScalar,
        now: UnixTimestamp,
    ) -> Result<SignedAuthorization, SignerError> {
        let token = self.resolve_token(request);
        let decimals = tokens::token_decimals(token);
        let value = interpret_amount(&request.amount, decimals)?;
        let to = request
            .pay_to
            .parse::<Address>()
            .map_err(|_| SignerError::InvalidRecipient(request.pay_to.clone()))?;

        let (name, version) = tokens::eip712_domain_params(token);
        let domain = eip712_domain! {
            name: name,
            version: version,
            chain_id: evm_chain_id(request.chain_id),
            verifying_contract: token,
        };

        let valid_before = request
            .deadline
            .unwrap_or(now + self.config.authorization_ttl_secs);
        let nonce: [u8; 32] = rand::rng().random();

        let mut key = B256::from_slice(scalar.0.as_ref());
        let signer = PrivateKeySigner::from_bytes(&key);
        key.0.zeroize();
        drop(scalar);
        let signer = signer.map_err(|_| SignerError::InvalidKeyMaterial)?;

        let authorization = Authorization {
            from: signer.address(),
            to,
            value: TokenAmount(value),
            valid_after: UnixTimestamp::from_secs(0),
            valid_before,
            nonce: B256::from(nonce),
        };

        let eip712_hash = authorization.as_sol_struct().eip712_signing_hash(&domain);
        let signature = signer
            .sign_hash_sync(&eip712_hash)
            .map_err(|e| SignerError::Signing(format!("{e:?}")))?;

        let envelope = PaymentPayload {
            x402_version: V1,
            scheme: request.scheme,
            network: request.network.clone(),
            payload: SignedPayload {
                signature: format!("0x{}", hex::encode(signature.as_bytes())),
                authorization,
            },
        };
        let payload_b64 =
            proto::encode_header(&envelope).map_err(|e| SignerError::Encoding(e.to_string()))?;

        Ok(SignedAuthorization {
            signature: signature.as_bytes().into(),
            authorization,
            payload_b64,
        })
    }
}

/// Verifies an ERC-3009 authorization signature out-of-band.
///
/// Recomputes the typed-data hash with the identical domain and struct
/// definition and recovers the signer. Returns `false` on any decoding
/// failure — this function never panics and never errors.
#[must_use]
pub fn verify(
    signature: &[u8],
    authorization: &Authorization,
    expected_signer: Address,
    evm_chain_id: u64,
    token_address: Address,
) -> bool {
    let Ok(signature) = Signature::from_raw(signature) else {
        return false;
    };
    let (name, version) = tokens::eip712_domain_params(token_address);
    let domain = eip712_domain! {
        name: name,
        version: version,
        chain_id: evm_chain_id,
        verifying_contract: token_address,
    };
    let eip712_hash = authorization.as_sol_struct().eip712_signing_hash(&domain);
    signature
        .recover_address_from_prehash(&eip712_hash)
        .is_ok_and(|recovered| recovered == expected_signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veridex::networks;
    use veridex::proto::PaymentScheme;

    fn test_request() -> PaymentRequest {
        PaymentRequest {
            scheme: PaymentScheme::Exact,
            network: "base".into(),
            chain_id: networks::BASE_MAINNET,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
            pay_to: "0x0000000000000000000000000000000000000001".into(),
            amount: "1000000".into(),
            facilitator: None,
            deadline: None,
            scheme_version: 1,
        }
    }

    fn fresh_scalar() -> (SessionScalar, Address) {
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let scalar =
            SessionScalar::from_bytes(Zeroizing::new(signer.to_bytes().to_vec())).unwrap();
        (scalar, address)
    }

    #[test]
    fn test_sign_produces_verifiable_signature() {
        let signer = AuthorizationSigner::default();
        let (scalar, address) = fresh_scalar();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&test_request(), scalar, now).unwrap();

        assert_eq!(signed.authorization.from, address);
        assert_eq!(
            signed.authorization.value,
            TokenAmount(U256::from(1_000_000u64))
        );
        assert!(verify(
            &signed.signature,
            &signed.authorization,
            address,
            8453,
            tokens::USDC_BASE,
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let signer = AuthorizationSigner::default();
        let (scalar, _) = fresh_scalar();
        let (_, other_address) = fresh_scalar();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&test_request(), scalar, now).unwrap();

        assert!(!verify(
            &signed.signature,
            &signed.authorization,
            other_address,
            8453,
            tokens::USDC_BASE,
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_authorization() {
        let signer = AuthorizationSigner::default();
        let (scalar, address) = fresh_scalar();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&test_request(), scalar, now).unwrap();

        let mut tampered = signed.authorization;
        tampered.value = TokenAmount(U256::from(2_000_000u64));
        assert!(!verify(
            &signed.signature,
            &tampered,
            address,
            8453,
            tokens::USDC_BASE,
        ));
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let (_, address) = fresh_scalar();
        let authorization = Authorization {
            from: address,
            to: Address::ZERO,
            value: TokenAmount(U256::from(1u64)),
            valid_after: UnixTimestamp::from_secs(0),
            valid_before: UnixTimestamp::from_secs(1),
            nonce: B256::ZERO,
        };
        assert!(!verify(b"short", &authorization, address, 8453, tokens::USDC_BASE));
    }

    #[test]
    fn test_nonces_are_unique_across_signs() {
        let signer = AuthorizationSigner::default();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..32 {
            let (scalar, _) = fresh_scalar();
            let signed = signer.sign(&test_request(), scalar, now).unwrap();
            assert!(nonces.insert(signed.nonce()), "nonce collision");
        }
    }

    #[test]
    fn test_deadline_defaults_to_ttl() {
        let signer = AuthorizationSigner::default();
        let (scalar, _) = fresh_scalar();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&test_request(), scalar, now).unwrap();
        assert_eq!(
            signed.deadline(),
            UnixTimestamp::from_secs(1_700_000_000 + DEFAULT_AUTHORIZATION_TTL_SECS)
        );
        assert_eq!(signed.authorization.valid_after.as_secs(), 0);
    }

    #[test]
    fn test_challenge_deadline_is_honored() {
        let signer = AuthorizationSigner::default();
        let (scalar, _) = fresh_scalar();
        let mut request = test_request();
        request.deadline = Some(UnixTimestamp::from_secs(1_700_000_060));
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&request, scalar, now).unwrap();
        assert_eq!(signed.deadline().as_secs(), 1_700_000_060);
    }

    #[test]
    fn test_payload_envelope_shape() {
        let signer = AuthorizationSigner::default();
        let (scalar, _) = fresh_scalar();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let signed = signer.sign(&test_request(), scalar, now).unwrap();

        let decoded: PaymentPayload<Authorization> =
            proto::decode_header(&signed.payload_b64).unwrap();
        assert_eq!(decoded.network, "base");
        assert_eq!(decoded.scheme, PaymentScheme::Exact);
        assert!(decoded.payload.signature.starts_with("0x"));
        assert_eq!(decoded.payload.authorization.nonce, signed.nonce());
    }

    #[test]
    fn test_scalar_rejects_bad_length() {
        let result = SessionScalar::from_bytes(Zeroizing::new(vec![1u8; 16]));
        assert!(matches!(result, Err(SignerError::InvalidKeyMaterial)));
    }

    #[test]
    fn test_sign_rejects_bad_recipient() {
        let signer = AuthorizationSigner::default();
        let (scalar, _) = fresh_scalar();
        let mut request = test_request();
        request.pay_to = "not-an-address".into();
        let now = UnixTimestamp::from_secs(1_700_000_000);
        assert!(matches!(
            signer.sign(&request, scalar, now),
            Err(SignerError::InvalidRecipient(_))
        ));
    }
}
