//! Per-network lending market descriptors.
//!
//! A [`MarketRegistry`] is built once at startup and shared read-only by the
//! reader and the signer. Lookups by network id never fall back to a default.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use reqwest::Url;

use crate::error::ChainError;
use crate::gas::GasPricing;

/// A configured reserve (asset market) on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveInfo {
    pub symbol: String,
    pub underlying: Address,
    pub decimals: u8,
}

/// Contract addresses and RPC settings for one network's Aave V3 market.
#[derive(Debug, Clone)]
pub struct Market {
    pub network: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub pool: Address,
    pub data_provider: Address,
    pub oracle: Address,
    pub gas: GasPricing,
    pub reserves: Vec<ReserveInfo>,
}

impl Market {
    /// Find a reserve by symbol, ignoring ASCII case.
    pub fn reserve(&self, symbol: &str) -> Option<&ReserveInfo> {
        self.reserves
            .iter()
            .find(|r| r.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Parsed RPC endpoint.
    pub fn rpc_endpoint(&self) -> Result<Url, ChainError> {
        self.rpc_url.parse::<Url>().map_err(|e| {
            ChainError::Rpc(format!("invalid rpc url for {}: {e}", self.network))
        })
    }
}

/// Immutable network id -> market mapping.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    markets: HashMap<String, Arc<Market>>,
}

impl MarketRegistry {
    pub fn new(markets: impl IntoIterator<Item = Market>) -> Self {
        Self {
            markets: markets
                .into_iter()
                .map(|m| (m.network.clone(), Arc::new(m)))
                .collect(),
        }
    }

    pub fn get(&self, network: &str) -> Result<&Arc<Market>, ChainError> {
        self.markets
            .get(network)
            .ok_or_else(|| ChainError::UnknownNetwork(network.to_string()))
    }

    pub fn contains(&self, network: &str) -> bool {
        self.markets.contains_key(network)
    }

    /// Network ids in sorted order.
    pub fn networks(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.markets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Market>> {
        self.markets.values()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(network: &str) -> Market {
        Market {
            network: network.to_string(),
            chain_id: 84532,
            rpc_url: "http://localhost:8545".to_string(),
            pool: Address::repeat_byte(1),
            data_provider: Address::repeat_byte(2),
            oracle: Address::repeat_byte(3),
            gas: GasPricing::default(),
            reserves: vec![ReserveInfo {
                symbol: "cbETH".to_string(),
                underlying: Address::repeat_byte(4),
                decimals: 18,
            }],
        }
    }

    #[test]
    fn test_reserve_lookup_ignores_case() {
        let m = market("base-sepolia");
        assert!(m.reserve("CBETH").is_some());
        assert!(m.reserve("cbeth").is_some());
        assert!(m.reserve("USDC").is_none());
    }

    #[test]
    fn test_rpc_endpoint_parsing() {
        let mut m = market("base-sepolia");
        assert_eq!(m.rpc_endpoint().unwrap().as_str(), "http://localhost:8545/");

        m.rpc_url = "not a url".to_string();
        assert!(matches!(m.rpc_endpoint(), Err(ChainError::Rpc(_))));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = MarketRegistry::new([market("base-sepolia"), market("arbitrum-sepolia")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.networks(), vec!["arbitrum-sepolia", "base-sepolia"]);
        assert!(registry.get("base-sepolia").is_ok());
        assert!(matches!(
            registry.get("mainnet"),
            Err(ChainError::UnknownNetwork(n)) if n == "mainnet"
        ));
    }
}
