//! Token-to-USD conversion.
//!
//! Stablecoins never touch the oracle: a symbol in the stablecoin set or
//! a known stablecoin contract converts 1:1 from smallest units. Every
//! other asset is priced through the [`PriceOracle`] collaborator, and
//! the result is truncated — never rounded — to microdollars before it
//! reaches the ledger.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use veridex::error::{ProtocolError, TransientError};
use veridex::networks::ChainRef;
use veridex::oracle::PriceOracle;
use veridex::usd::Usd;

use veridex_evm::tokens;

use crate::engine::EngineError;

/// Converts a payment amount to USD for the limit check.
///
/// `asset` is the challenge's raw asset string; `token` is the resolved
/// contract. The stablecoin fast path fires when either identifies a
/// USD-pegged token.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedChallenge`] for amounts too large to
/// price and [`TransientError::Oracle`] when a quote is unavailable.
pub async fn amount_usd(
    asset: &str,
    token: Address,
    chain_id: ChainRef,
    units: U256,
    decimals: u8,
    oracle: &dyn PriceOracle,
) -> Result<Usd, EngineError> {
    let units_u128 =
        u128::try_from(units).map_err(|_| EngineError::Protocol(ProtocolError::MalformedChallenge))?;

    if tokens::is_stablecoin_symbol(asset) || tokens::is_stablecoin_address(token) {
        return Usd::from_stablecoin_units(units_u128, decimals)
            .ok_or(EngineError::Protocol(ProtocolError::MalformedChallenge));
    }

    let price = oracle.usd_price(asset, chain_id).await?;
    let units_decimal = Decimal::from_u128(units_u128)
        .ok_or(EngineError::Protocol(ProtocolError::MalformedChallenge))?;
    let scale = Decimal::from_u128(10u128.pow(u32::from(decimals)))
        .ok_or(EngineError::Protocol(ProtocolError::MalformedChallenge))?;
    let dollars = (units_decimal / scale)
        .checked_mul(price)
        .ok_or_else(|| EngineError::Transient(TransientError::Oracle("price overflow".into())))?;
    Usd::from_decimal_truncated(dollars)
        .ok_or_else(|| EngineError::Transient(TransientError::Oracle("price overflow".into())))
}
