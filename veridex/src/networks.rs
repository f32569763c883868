//! Known network registry and chain-id mappings.
//!
//! Veridex identifies chains by an internal numeric id that is stable
//! across the whole core; the wire protocol speaks human-readable network
//! names (e.g. `"base-mainnet"`) and EVM chains additionally carry their
//! EIP-155 chain id. This module is the single source of truth for the
//! three-way mapping.

/// Internal numeric chain identifier.
pub type ChainRef = u64;

/// A known network definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Canonical network name (e.g. `"base-mainnet"`).
    pub name: &'static str,
    /// Accepted aliases (e.g. `"base"`).
    pub aliases: &'static [&'static str],
    /// Internal chain id used throughout the core.
    pub internal_id: ChainRef,
    /// EIP-155 chain id, for EVM networks.
    pub evm_id: Option<u64>,
}

/// Internal chain id for Ethereum mainnet.
pub const ETHEREUM_MAINNET: ChainRef = 1;

/// Internal chain id for Polygon mainnet.
pub const POLYGON_MAINNET: ChainRef = 2;

/// Internal chain id for Arbitrum One.
pub const ARBITRUM_ONE: ChainRef = 3;

/// Internal chain id for Optimism mainnet.
pub const OPTIMISM_MAINNET: ChainRef = 4;

/// Internal chain id for Avalanche C-Chain.
pub const AVALANCHE_MAINNET: ChainRef = 5;

/// Internal chain id for Base mainnet.
pub const BASE_MAINNET: ChainRef = 30;

/// Internal chain id for Base Sepolia (testnet).
pub const BASE_SEPOLIA: ChainRef = 31;

/// Internal chain id for Solana mainnet.
///
/// Solana challenges are parsed and normalized but never signed; signing
/// is EVM-only.
pub const SOLANA_MAINNET: ChainRef = 101;

/// All networks the core knows by name.
pub const KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "ethereum-mainnet",
        aliases: &["ethereum", "mainnet"],
        internal_id: ETHEREUM_MAINNET,
        evm_id: Some(1),
    },
    NetworkInfo {
        name: "polygon-mainnet",
        aliases: &["polygon"],
        internal_id: POLYGON_MAINNET,
        evm_id: Some(137),
    },
    NetworkInfo {
        name: "arbitrum-one",
        aliases: &["arbitrum"],
        internal_id: ARBITRUM_ONE,
        evm_id: Some(42_161),
    },
    NetworkInfo {
        name: "optimism-mainnet",
        aliases: &["optimism"],
        internal_id: OPTIMISM_MAINNET,
        evm_id: Some(10),
    },
    NetworkInfo {
        name: "avalanche-mainnet",
        aliases: &["avalanche"],
        internal_id: AVALANCHE_MAINNET,
        evm_id: Some(43_114),
    },
    NetworkInfo {
        name: "base-mainnet",
        aliases: &["base"],
        internal_id: BASE_MAINNET,
        evm_id: Some(8453),
    },
    NetworkInfo {
        name: "base-sepolia",
        aliases: &[],
        internal_id: BASE_SEPOLIA,
        evm_id: Some(84_532),
    },
    NetworkInfo {
        name: "solana-mainnet",
        aliases: &["solana"],
        internal_id: SOLANA_MAINNET,
        evm_id: None,
    },
];

/// Looks up a network by canonical name or alias.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.name == name || n.aliases.contains(&name))
}

/// Looks up a network by its internal chain id.
#[must_use]
pub fn by_internal_id(internal_id: ChainRef) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.internal_id == internal_id)
}

/// Looks up a network by its EIP-155 chain id.
#[must_use]
pub fn by_evm_id(evm_id: u64) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.evm_id == Some(evm_id))
}

/// Maps an internal chain id to its EIP-155 chain id.
///
/// Unknown ids pass through unchanged: a challenge naming a chain the core
/// has no entry for is still signable if the caller trusts the id.
#[must_use]
pub fn evm_chain_id(internal_id: ChainRef) -> u64 {
    by_internal_id(internal_id)
        .and_then(|n| n.evm_id)
        .unwrap_or(internal_id)
}

/// Resolves a wire `network` string to an internal chain id.
///
/// Accepts known names and aliases; accepts numeric EVM chain ids (mapped
/// to internal ids where a mapping exists); otherwise falls through to a
/// plain numeric parse.
#[must_use]
pub fn resolve_network(network: &str) -> Option<ChainRef> {
    if let Some(info) = by_name(network) {
        return Some(info.internal_id);
    }
    let numeric = network.parse::<u64>().ok()?;
    Some(
        by_evm_id(numeric)
            .map(|n| n.internal_id)
            .unwrap_or(numeric),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_name_and_alias() {
        assert_eq!(resolve_network("base-mainnet"), Some(BASE_MAINNET));
        assert_eq!(resolve_network("base"), Some(BASE_MAINNET));
        assert_eq!(resolve_network("ethereum-mainnet"), Some(ETHEREUM_MAINNET));
        assert_eq!(resolve_network("solana-mainnet"), Some(SOLANA_MAINNET));
    }

    #[test]
    fn test_resolve_numeric_evm_id_maps_to_internal() {
        assert_eq!(resolve_network("8453"), Some(BASE_MAINNET));
        assert_eq!(resolve_network("137"), Some(POLYGON_MAINNET));
    }

    #[test]
    fn test_resolve_unknown_numeric_passes_through() {
        assert_eq!(resolve_network("999999"), Some(999_999));
    }

    #[test]
    fn test_resolve_unknown_name_fails() {
        assert_eq!(resolve_network("made-up-chain"), None);
    }

    #[test]
    fn test_evm_chain_id_mapping() {
        assert_eq!(evm_chain_id(BASE_MAINNET), 8453);
        assert_eq!(evm_chain_id(ETHEREUM_MAINNET), 1);
        // Unknown internal ids pass through unchanged.
        assert_eq!(evm_chain_id(777), 777);
    }

    #[test]
    fn test_internal_ids_are_unique() {
        for (i, a) in KNOWN_NETWORKS.iter().enumerate() {
            for b in &KNOWN_NETWORKS[i + 1..] {
                assert_ne!(a.internal_id, b.internal_id);
            }
        }
    }
}
