#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the Veridex autonomous-payment authorization core.
//!
//! Veridex lets a user delegate bounded signing authority to a short-lived
//! session key, which a software agent then uses to authorize stablecoin
//! transfers on EVM chains — either directly or in response to an HTTP
//! `402 Payment Required` challenge.
//!
//! This crate is the chain-agnostic foundation. It carries no key material
//! and performs no I/O; signing lives in `veridex-evm`, session state in
//! `veridex-session`, and the 402 negotiation engine in `veridex-http`.
//!
//! # Modules
//!
//! - [`clock`] - Wall-clock abstraction for time-driven policy decisions
//! - [`encoding`] - Base64 and base64url codecs for wire and token formats
//! - [`error`] - The error taxonomy and the stable user-visible error codes
//! - [`networks`] - Registry of known networks and chain-id mappings
//! - [`oracle`] - Price oracle capability for token-to-USD conversion
//! - [`proto`] - 402 wire-protocol types and the payment-challenge parser
//! - [`timestamp`] - Unix timestamps for authorization validity windows
//! - [`usd`] - Exact microdollar arithmetic for spend-limit enforcement

pub mod clock;
pub mod encoding;
pub mod error;
pub mod networks;
pub mod oracle;
pub mod proto;
pub mod timestamp;
pub mod usd;
