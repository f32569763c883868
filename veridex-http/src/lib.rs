#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP 402 negotiation engine for the Veridex payment core.
//!
//! When an agent's request comes back `402 Payment Required`, the
//! [`X402Engine`](engine::X402Engine) parses the challenge, applies the
//! session's spending policy, signs an ERC-3009 authorization, and
//! retries the request with payment proof — all as one linear sequence of
//! await points with cooperative cancellation.
//!
//! The engine performs exactly one sign-and-retry per invocation, and it
//! records spending *before* retrying: if the retry races another agent
//! thread or is lost to the network, the ledger errs on the side of
//! having spent.
//!
//! # Modules
//!
//! - [`client`] - The HTTP capability the engine drives
//! - [`engine`] - The 402 negotiation state machine
//! - [`price`] - Token-to-USD conversion with the stablecoin fast path

pub mod client;
pub mod engine;
pub mod price;
