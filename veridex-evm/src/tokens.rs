//! Built-in token metadata and symbol resolution.
//!
//! The 402 wire format may name a token by contract address or by symbol.
//! This module carries the deployments the core knows about: their EIP-712
//! domain parameters, decimals, and per-chain addresses. Unknown contracts
//! fall back to the generic `("x402", "1")` domain and 6 decimals, the
//! stablecoin norm.

use alloy_primitives::{Address, address};

use veridex::networks::{self, ChainRef};

/// EIP-712 domain name and version plus decimals for a token deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMetadata {
    /// The token name as returned by the contract's `name()`.
    pub name: &'static str,
    /// The EIP-712 domain version.
    pub version: &'static str,
    /// Token decimals.
    pub decimals: u8,
}

/// Fallback EIP-712 domain name for unknown contracts.
pub const DEFAULT_DOMAIN_NAME: &str = "x402";

/// Fallback EIP-712 domain version for unknown contracts.
pub const DEFAULT_DOMAIN_VERSION: &str = "1";

/// Fallback decimals for unknown contracts (the stablecoin norm).
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// USDC contract address on Base Mainnet. Also the default asset when a
/// challenge names a symbol the core cannot resolve.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC contract address on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// USDC contract address on Ethereum Mainnet.
pub const USDC_ETHEREUM: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// USDC contract address on Polygon Mainnet.
pub const USDC_POLYGON: Address = address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359");

/// USDC contract address on Arbitrum One.
pub const USDC_ARBITRUM: Address = address!("af88d065e77c8cC2239327C5EDb3A432268e5831");

/// USDC contract address on Optimism Mainnet.
pub const USDC_OPTIMISM: Address = address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85");

/// USDC contract address on Avalanche C-Chain.
pub const USDC_AVALANCHE: Address = address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E");

/// USDT contract address on Ethereum Mainnet.
pub const USDT_ETHEREUM: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

const USDC_METADATA: TokenMetadata = TokenMetadata {
    name: "USD Coin",
    version: "2",
    decimals: 6,
};

// Circle's newer FiatTokenV2_2 deployments return "USDC" from name().
const USDC_V2_2_METADATA: TokenMetadata = TokenMetadata {
    name: "USDC",
    version: "2",
    decimals: 6,
};

const USDT_METADATA: TokenMetadata = TokenMetadata {
    name: "Tether USD",
    version: "1",
    decimals: 6,
};

const KNOWN_TOKENS: &[(Address, TokenMetadata)] = &[
    (USDC_BASE, USDC_METADATA),
    (USDC_BASE_SEPOLIA, USDC_V2_2_METADATA),
    (USDC_ETHEREUM, USDC_METADATA),
    (USDC_POLYGON, USDC_METADATA),
    (USDC_ARBITRUM, USDC_METADATA),
    (USDC_OPTIMISM, USDC_METADATA),
    (USDC_AVALANCHE, USDC_METADATA),
    (USDT_ETHEREUM, USDT_METADATA),
];

const SYMBOL_DEPLOYMENTS: &[(&str, ChainRef, Address)] = &[
    ("USDC", networks::BASE_MAINNET, USDC_BASE),
    ("USDC", networks::BASE_SEPOLIA, USDC_BASE_SEPOLIA),
    ("USDC", networks::ETHEREUM_MAINNET, USDC_ETHEREUM),
    ("USDC", networks::POLYGON_MAINNET, USDC_POLYGON),
    ("USDC", networks::ARBITRUM_ONE, USDC_ARBITRUM),
    ("USDC", networks::OPTIMISM_MAINNET, USDC_OPTIMISM),
    ("USDC", networks::AVALANCHE_MAINNET, USDC_AVALANCHE),
    ("USDT", networks::ETHEREUM_MAINNET, USDT_ETHEREUM),
];

const STABLECOIN_SYMBOLS: &[&str] = &["USDC", "USDT", "DAI"];

/// Returns the EIP-712 domain parameters for a token contract.
///
/// Lookup is by lowercased address; unknown contracts get the generic
/// [`DEFAULT_DOMAIN_NAME`] / [`DEFAULT_DOMAIN_VERSION`] domain.
#[must_use]
pub fn eip712_domain_params(contract: Address) -> (&'static str, &'static str) {
    KNOWN_TOKENS
        .iter()
        .find(|(addr, _)| *addr == contract)
        .map_or((DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION), |(_, meta)| {
            (meta.name, meta.version)
        })
}

/// Returns the decimals for a token contract, defaulting to 6.
#[must_use]
pub fn token_decimals(contract: Address) -> u8 {
    KNOWN_TOKENS
        .iter()
        .find(|(addr, _)| *addr == contract)
        .map_or(DEFAULT_TOKEN_DECIMALS, |(_, meta)| meta.decimals)
}

/// Resolves a symbol to its deployment on a chain.
#[must_use]
pub fn symbol_address(symbol: &str, chain_id: ChainRef) -> Option<Address> {
    let upper = symbol.to_ascii_uppercase();
    SYMBOL_DEPLOYMENTS
        .iter()
        .find(|(sym, chain, _)| *sym == upper && *chain == chain_id)
        .map(|(_, _, addr)| *addr)
}

/// Returns whether a symbol names a USD-pegged stablecoin.
#[must_use]
pub fn is_stablecoin_symbol(symbol: &str) -> bool {
    STABLECOIN_SYMBOLS.contains(&symbol.to_ascii_uppercase().as_str())
}

/// Returns whether a contract is a known USD-pegged stablecoin deployment.
#[must_use]
pub fn is_stablecoin_address(contract: Address) -> bool {
    KNOWN_TOKENS.iter().any(|(addr, _)| *addr == contract)
}

/// How an asset string was resolved to a contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetResolution {
    /// The challenge carried a literal contract address.
    Literal,
    /// The symbol matched a known deployment on the chain.
    Symbol,
    /// Nothing matched; the configured default asset was substituted.
    Fallback,
}

/// Resolves a challenge `asset` string to a contract address.
///
/// A 42-character `0x`-prefixed hex string is used verbatim. Anything
/// else is treated as a symbol and looked up per chain; unresolved
/// symbols fall back to `default_asset` with a warning.
#[must_use]
pub fn resolve_asset(
    asset: &str,
    chain_id: ChainRef,
    default_asset: Address,
) -> (Address, AssetResolution) {
    if asset.len() == 42 && asset.starts_with("0x") {
        if let Ok(address) = asset.parse::<Address>() {
            return (address, AssetResolution::Literal);
        }
    }
    if let Some(address) = symbol_address(asset, chain_id) {
        return (address, AssetResolution::Symbol);
    }
    tracing::warn!(
        asset,
        chain_id,
        default = %default_asset,
        "unresolved asset symbol, substituting default"
    );
    (default_asset, AssetResolution::Fallback)
}
