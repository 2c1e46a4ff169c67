//! Gas pricing for executor transactions.
//!
//! A network prices gas either with a single legacy gas price or with
//! EIP-1559 base and priority fees. A fresh quote is fetched per submission;
//! the sender keeps the last good quote as a fallback when fee RPCs fail.

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;

use crate::error::ChainError;

const GWEI: f64 = 1e9;

/// Per-network gas pricing model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GasPricing {
    Legacy {
        default_gas_price_gwei: f64,
        max_gas_price_gwei: f64,
    },
    Eip1559 {
        priority_fee_gwei: f64,
        max_fee_multiplier: f64,
        max_gas_price_gwei: f64,
    },
}

impl Default for GasPricing {
    fn default() -> Self {
        Self::Legacy {
            default_gas_price_gwei: 1.0,
            max_gas_price_gwei: 100.0,
        }
    }
}

/// Concrete fee values for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasQuote {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasQuote {
    /// Highest price per gas this quote can pay, in wei.
    pub fn max_price(&self) -> u128 {
        match self {
            GasQuote::Legacy { gas_price } => *gas_price,
            GasQuote::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    pub fn apply(&self, tx: &mut TransactionRequest) {
        match *self {
            GasQuote::Legacy { gas_price } => tx.set_gas_price(gas_price),
            GasQuote::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                tx.set_max_fee_per_gas(max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
        }
    }
}

impl GasPricing {
    pub fn name(&self) -> &'static str {
        match self {
            GasPricing::Legacy { .. } => "Legacy",
            GasPricing::Eip1559 { .. } => "EIP-1559",
        }
    }

    fn cap(&self) -> u128 {
        match *self {
            GasPricing::Legacy {
                max_gas_price_gwei, ..
            }
            | GasPricing::Eip1559 {
                max_gas_price_gwei, ..
            } => gwei_to_wei(max_gas_price_gwei),
        }
    }

    /// Quote built from configured values only, used when no chain quote exists.
    pub fn fallback_quote(&self) -> GasQuote {
        match *self {
            GasPricing::Legacy {
                default_gas_price_gwei,
                ..
            } => GasQuote::Legacy {
                gas_price: gwei_to_wei(default_gas_price_gwei).min(self.cap()),
            },
            GasPricing::Eip1559 {
                priority_fee_gwei, ..
            } => {
                let priority = gwei_to_wei(priority_fee_gwei);
                GasQuote::Eip1559 {
                    max_fee_per_gas: self.cap(),
                    max_priority_fee_per_gas: priority.min(self.cap()),
                }
            }
        }
    }

    /// Derive a quote from current chain fee data.
    pub fn quote_from(&self, gas_price: Option<u128>, base_fee: Option<u128>, tip: Option<u128>) -> GasQuote {
        match *self {
            GasPricing::Legacy { .. } => match gas_price {
                Some(price) => GasQuote::Legacy {
                    gas_price: price.min(self.cap()),
                },
                None => self.fallback_quote(),
            },
            GasPricing::Eip1559 {
                priority_fee_gwei,
                max_fee_multiplier,
                ..
            } => {
                let Some(base_fee) = base_fee else {
                    return self.fallback_quote();
                };
                let priority = tip
                    .unwrap_or_else(|| gwei_to_wei(priority_fee_gwei))
                    .min(self.cap());
                let max_fee = ((base_fee as f64) * max_fee_multiplier) as u128 + priority;
                GasQuote::Eip1559 {
                    max_fee_per_gas: max_fee.min(self.cap()),
                    max_priority_fee_per_gas: priority,
                }
            }
        }
    }

    /// Fetch a quote from the chain.
    pub async fn fetch_quote<P: Provider>(&self, provider: &P) -> Result<GasQuote, ChainError> {
        match self {
            GasPricing::Legacy { .. } => {
                let price = provider
                    .get_gas_price()
                    .await
                    .map_err(|e| ChainError::rpc("eth_gasPrice", e))?;
                Ok(self.quote_from(Some(price), None, None))
            }
            GasPricing::Eip1559 { .. } => {
                let block = provider
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await
                    .map_err(|e| ChainError::rpc("eth_getBlockByNumber", e))?
                    .ok_or_else(|| ChainError::Rpc("latest block unavailable".to_string()))?;
                let base_fee = block.header.base_fee_per_gas.map(u128::from);
                let tip = provider.get_max_priority_fee_per_gas().await.ok();
                Ok(self.quote_from(None, base_fee, tip))
            }
        }
    }
}

fn gwei_to_wei(gwei: f64) -> u128 {
    if gwei.is_finite() && gwei > 0.0 {
        (gwei * GWEI) as u128
    } else {
        0
    }
}
