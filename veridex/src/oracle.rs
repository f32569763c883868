//! Price oracle capability.
//!
//! The oracle maps a token to its USD price so spend-limit checks can be
//! made in dollars. Stablecoins never reach the oracle: the engine
//! short-circuits them to a 1:1 conversion (see `veridex-http`). Oracle
//! failures are transient — the caller may retry the whole operation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::TransientError;
use crate::networks::ChainRef;

/// A source of USD prices for whole tokens.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Returns the USD price of one whole token.
    ///
    /// `asset` is the contract address or symbol exactly as it appeared in
    /// the challenge.
    ///
    /// # Errors
    ///
    /// Returns [`TransientError::Oracle`] when no quote is available.
    async fn usd_price(&self, asset: &str, chain_id: ChainRef) -> Result<Decimal, TransientError>;
}

/// An oracle with a fixed in-memory price table, for tests and closed
/// deployments.
#[derive(Debug, Default)]
pub struct FixedPriceOracle {
    prices: HashMap<String, Decimal>,
}

impl FixedPriceOracle {
    /// Creates an empty oracle; every lookup fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a price for an asset (address or symbol, matched verbatim).
    #[must_use]
    pub fn with_price(mut self, asset: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(asset.into(), price);
        self
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn usd_price(&self, asset: &str, _chain_id: ChainRef) -> Result<Decimal, TransientError> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| TransientError::Oracle(format!("no price for asset {asset}")))
    }
}
