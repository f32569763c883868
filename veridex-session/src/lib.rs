#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Session lifecycle, spend-limit enforcement, and token vault for the
//! Veridex payment core.
//!
//! A session is an ephemeral secp256k1 keypair bounded by a policy
//! (per-transaction cap, rolling daily cap, expiry, allowed chains) and
//! created on behalf of a long-lived master credential. The session's
//! private scalar is encrypted at rest under a key derived from the
//! master credential and is only ever decrypted for the duration of one
//! signature.
//!
//! # Modules
//!
//! - [`alerts`] - Spending-threshold alerts and high-value approvals
//! - [`audit`] - Append-only payment record log
//! - [`credential`] - AES-256-GCM encryption of session scalars
//! - [`ledger`] - Pure spend-limit arithmetic over ledger state
//! - [`manager`] - Session creation, loading, revocation, and spending
//! - [`session`] - Session, policy, and master-credential types
//! - [`store`] - Durable session persistence
//! - [`token_vault`] - Short-lived payment tokens minted from sessions

pub mod alerts;
pub mod audit;
pub mod credential;
pub mod ledger;
pub mod manager;
pub mod session;
pub mod store;
pub mod token_vault;
