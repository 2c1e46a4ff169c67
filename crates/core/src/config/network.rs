//! Per-network market configuration.

use std::collections::BTreeMap;

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use concierge_chain::{GasPricing, Market, ReserveInfo};
use serde::{Deserialize, Serialize};

/// One network's Aave V3 market.
///
/// Address and URL fields are strings so they can carry `${VAR}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain ID
    pub chain_id: u64,
    /// HTTP RPC endpoint
    pub rpc_url: String,
    /// Pool contract
    pub pool: String,
    /// Protocol data provider contract
    pub data_provider: String,
    /// Price oracle contract
    pub oracle: String,
    /// Gas configuration
    #[serde(default)]
    pub gas: GasConfig,
    /// Supported reserves keyed by symbol
    #[serde(default)]
    pub assets: BTreeMap<String, AssetConfig>,
}

/// A supported reserve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Underlying ERC-20 token
    pub underlying: String,
    /// Token decimals
    pub decimals: u8,
}

/// Gas pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Gas pricing model
    #[serde(default)]
    pub pricing: GasPricingModel,
    /// Maximum gas price willing to pay (in gwei)
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,
    /// Default gas price for legacy transactions (in gwei)
    #[serde(default = "default_gas_price")]
    pub default_gas_price_gwei: f64,
    /// Priority fee for EIP-1559 transactions (in gwei)
    #[serde(default)]
    pub priority_fee_gwei: Option<f64>,
    /// Base fee multiplier for EIP-1559 max fee
    #[serde(default = "default_max_fee_multiplier")]
    pub max_fee_multiplier: f64,
}

fn default_max_gas_price() -> f64 {
    100.0
}

fn default_gas_price() -> f64 {
    1.0
}

fn default_max_fee_multiplier() -> f64 {
    2.0
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            pricing: GasPricingModel::default(),
            max_gas_price_gwei: default_max_gas_price(),
            default_gas_price_gwei: default_gas_price(),
            priority_fee_gwei: None,
            max_fee_multiplier: default_max_fee_multiplier(),
        }
    }
}

/// Gas pricing model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasPricingModel {
    /// Legacy gas pricing (gas price only)
    Legacy,
    /// EIP-1559 (base fee + priority fee)
    #[default]
    Eip1559,
}

impl GasConfig {
    pub fn pricing(&self) -> GasPricing {
        match self.pricing {
            GasPricingModel::Legacy => GasPricing::Legacy {
                default_gas_price_gwei: self.default_gas_price_gwei,
                max_gas_price_gwei: self.max_gas_price_gwei,
            },
            GasPricingModel::Eip1559 => GasPricing::Eip1559 {
                priority_fee_gwei: self.priority_fee_gwei.unwrap_or(0.1),
                max_fee_multiplier: self.max_fee_multiplier,
                max_gas_price_gwei: self.max_gas_price_gwei,
            },
        }
    }
}

impl NetworkConfig {
    /// Expand `${VAR}` placeholders in every string field.
    pub fn expand_env_vars(&mut self) {
        self.rpc_url = expand_env(&self.rpc_url);
        self.pool = expand_env(&self.pool);
        self.data_provider = expand_env(&self.data_provider);
        self.oracle = expand_env(&self.oracle);
        for asset in self.assets.values_mut() {
            asset.underlying = expand_env(&asset.underlying);
        }
    }

    /// Validate and convert into a chain-layer [`Market`].
    pub fn resolve(&self, network: &str) -> Result<Market> {
        ensure_resolved(&self.rpc_url).with_context(|| format!("{network}.rpc_url"))?;

        let gas = &self.gas;
        if !(gas.max_gas_price_gwei.is_finite() && gas.max_gas_price_gwei > 0.0) {
            bail!("{network}.gas.max_gas_price_gwei must be positive");
        }

        if self.assets.is_empty() {
            bail!("{network} has no assets configured");
        }

        let mut reserves = Vec::with_capacity(self.assets.len());
        for (symbol, asset) in &self.assets {
            if asset.decimals > 36 {
                bail!("{network}.assets.{symbol}: {} decimals is out of range", asset.decimals);
            }
            reserves.push(ReserveInfo {
                symbol: symbol.clone(),
                underlying: parse_address(&asset.underlying)
                    .with_context(|| format!("{network}.assets.{symbol}.underlying"))?,
                decimals: asset.decimals,
            });
        }

        let market = Market {
            network: network.to_string(),
            chain_id: self.chain_id,
            rpc_url: self.rpc_url.clone(),
            pool: parse_address(&self.pool).with_context(|| format!("{network}.pool"))?,
            data_provider: parse_address(&self.data_provider)
                .with_context(|| format!("{network}.data_provider"))?,
            oracle: parse_address(&self.oracle).with_context(|| format!("{network}.oracle"))?,
            gas: gas.pricing(),
            reserves,
        };

        market
            .rpc_endpoint()
            .with_context(|| format!("{network}.rpc_url"))?;

        Ok(market)
    }
}

/// Parse a non-zero address.
fn parse_address(value: &str) -> Result<Address> {
    ensure_resolved(value)?;
    let address: Address = value
        .trim()
        .parse()
        .with_context(|| format!("invalid address {value:?}"))?;
    if address.is_zero() {
        bail!("address must not be zero");
    }
    Ok(address)
}

pub(crate) fn ensure_resolved(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("value is empty");
    }
    if value.contains("${") {
        bail!("unresolved environment placeholder in {value:?}");
    }
    Ok(())
}

/// Expand ${VAR_NAME} patterns with environment variable values.
/// Unset variables are left in place so validation can report them.
pub(crate) fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return s.to_string();
    };
    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
