//! Configuration for the lending concierge.
//!
//! One TOML file holds:
//! - Safety policy (minimum health factor, amount bound)
//! - Execution tuning (confirmation timeout, receipt polling, gas limits)
//! - Audit relay settings
//! - Per-network market addresses and supported assets
//!
//! Everything is validated once at startup and then shared read-only.
//! Signing credentials never live here.

mod network;
mod settings;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use concierge_chain::MarketRegistry;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use network::{AssetConfig, GasConfig, GasPricingModel, NetworkConfig};
pub use settings::{AuditConfig, ExecutionConfig, GasLimits, PolicyConfig};

/// Config file used when neither `--config` nor `CONCIERGE_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/concierge.toml";

/// Network used when neither the file nor `NETWORK` names one.
pub const FALLBACK_NETWORK: &str = "base-sepolia";

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConciergeConfig {
    /// Network used when a request does not name one
    #[serde(default)]
    pub default_network: Option<String>,

    pub policy: PolicyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl ConciergeConfig {
    /// Parse from TOML text and expand `${VAR}` placeholders.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse concierge config")?;
        config.expand_env_vars();
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load from `CONCIERGE_CONFIG`, or [`DEFAULT_CONFIG_PATH`].
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("CONCIERGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)
    }

    fn expand_env_vars(&mut self) {
        if let Some(id) = self.default_network.as_mut() {
            *id = network::expand_env(id);
        }
        if let Some(endpoint) = self.audit.endpoint.as_mut() {
            *endpoint = network::expand_env(endpoint);
        }
        for market in self.networks.values_mut() {
            market.expand_env_vars();
        }
    }

    /// Network used for requests that do not name one.
    pub fn default_network(&self) -> String {
        self.default_network
            .clone()
            .or_else(|| std::env::var("NETWORK").ok())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_NETWORK.to_string())
    }

    /// Fail fast on anything a request could trip over later.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.execution.validate()?;
        self.audit.validate()?;

        if self.networks.is_empty() {
            bail!("no networks configured");
        }
        for (id, network) in &self.networks {
            network.resolve(id)?;
        }

        let default_network = self.default_network();
        if !self.networks.contains_key(&default_network) {
            bail!(
                "default network '{}' is not configured (have: {})",
                default_network,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(())
    }

    /// Validate and build the immutable market registry.
    pub fn markets(&self) -> Result<MarketRegistry> {
        self.validate()?;
        let markets = self
            .networks
            .iter()
            .map(|(id, network)| network.resolve(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(MarketRegistry::new(markets))
    }

    /// One-shot summary of the loaded configuration.
    pub fn log_config(&self) {
        info!(
            default_network = %self.default_network(),
            networks = ?self.networks.keys().collect::<Vec<_>>(),
            min_health_factor = self.policy.min_health_factor,
            max_amount = self.policy.max_amount,
            "Concierge configuration loaded"
        );
        info!(
            confirmation_timeout_secs = self.execution.confirmation_timeout_secs,
            receipt_poll_interval_ms = self.execution.receipt_poll_interval_ms,
            audit_enabled = self.audit.endpoint().is_some(),
            audit_timeout_secs = self.audit.timeout_secs,
            "Execution and audit settings"
        );
        for (id, network) in &self.networks {
            info!(
                network = %id,
                chain_id = network.chain_id,
                assets = ?network.assets.keys().collect::<Vec<_>>(),
                gas = ?network.gas.pricing,
                "Market configured"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_network = "base-sepolia"

        [policy]
        min_health_factor = 1.1

        [audit]
        endpoint = "http://127.0.0.1:8080/log"

        [networks.base-sepolia]
        chain_id = 84532
        rpc_url = "https://sepolia.base.org"
        pool = "0x07eA79F68B2B3df564D0A34F8e19D9B1e339814b"
        data_provider = "0x1111111111111111111111111111111111111111"
        oracle = "0x2222222222222222222222222222222222222222"

        [networks.base-sepolia.gas]
        pricing = "Legacy"
        default_gas_price_gwei = 0.05

        [networks.base-sepolia.assets.USDC]
        underlying = "0x3333333333333333333333333333333333333333"
        decimals = 6

        [networks.base-sepolia.assets.WETH]
        underlying = "0x4444444444444444444444444444444444444444"
        decimals = 18
    "#;

    #[test]
    fn test_load_sample() {
        let config = ConciergeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.policy.min_health_factor, 1.1);
        assert_eq!(config.policy.max_amount, 1e9);
        assert_eq!(config.execution.confirmation_timeout_secs, 120);
        assert_eq!(config.audit.timeout_secs, 5);
        assert_eq!(config.default_network(), "base-sepolia");

        let markets = config.markets().unwrap();
        assert_eq!(markets.networks(), vec!["base-sepolia"]);
        let market = markets.get("base-sepolia").unwrap();
        assert_eq!(market.reserves.len(), 2);
        assert_eq!(market.gas.name(), "Legacy");
    }

    #[test]
    fn test_policy_section_is_required() {
        let without_policy = SAMPLE.replace("[policy]\n        min_health_factor = 1.1", "");
        assert!(ConciergeConfig::parse(&without_policy).is_err());
    }

    #[test]
    fn test_missing_default_network_fails_validation() {
        let config = ConciergeConfig::parse(&SAMPLE.replace(
            "default_network = \"base-sepolia\"",
            "default_network = \"arbitrum\"",
        ))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("arbitrum"), "{err}");
    }

    #[test]
    fn test_no_networks_fails_validation() {
        let config = ConciergeConfig::parse(
            r#"
            [policy]
            min_health_factor = 1.2
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_placeholder_expansion() {
        std::env::set_var("CONCIERGE_CFG_TEST_RELAY", "http://relay.test/log");
        let config = ConciergeConfig::parse(&SAMPLE.replace(
            "http://127.0.0.1:8080/log",
            "${CONCIERGE_CFG_TEST_RELAY}",
        ))
        .unwrap();
        assert_eq!(config.audit.endpoint(), Some("http://relay.test/log"));
        std::env::remove_var("CONCIERGE_CFG_TEST_RELAY");
    }
}
