#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-712 / ERC-3009 authorization signing for the Veridex payment core.
//!
//! A payment is authorized by signing an ERC-3009
//! `TransferWithAuthorization` message with the session's secp256k1 key.
//! The resulting signature can be presented to any ERC-3009 compliant
//! token contract (or a facilitator acting on one) to move funds from the
//! session address without the session paying gas.
//!
//! # Modules
//!
//! - [`amount`] - Interpretation of challenge amount strings
//! - [`chain`] - Address derivation and EVM chain-id resolution
//! - [`signer`] - Typed-data signing and out-of-band verification
//! - [`tokens`] - Built-in token metadata and symbol resolution

pub mod amount;
pub mod chain;
pub mod signer;
pub mod tokens;
