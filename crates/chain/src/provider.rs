//! Read-side access to Aave V3 markets.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! Every position read is pinned to a single block so the aggregate account
//! data and the per-reserve balances describe the same chain state.

use alloy::eips::BlockId;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use crate::contracts::{IAaveOracle, IPool, IPoolDataProvider, IERC20};
use crate::error::ChainError;
use crate::lending::{AccountData, LendingPoolReader, PositionData, ReserveData};
use crate::market::{Market, MarketRegistry, ReserveInfo};

/// Position reader over every configured market.
#[derive(Debug, Clone)]
pub struct PoolReader {
    markets: MarketRegistry,
}

impl PoolReader {
    pub fn new(markets: MarketRegistry) -> Self {
        info!(networks = ?markets.networks(), "Pool reader initialized");
        Self { markets }
    }

    pub fn markets(&self) -> &MarketRegistry {
        &self.markets
    }

    /// Current block number on `network`.
    pub async fn block_number(&self, network: &str) -> Result<u64, ChainError> {
        let market = self.markets.get(network)?;
        let provider = ProviderBuilder::new().on_http(market.rpc_endpoint()?);
        provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::rpc("eth_blockNumber", e))
    }

    /// Check that the RPC answers and reports the configured chain id.
    pub async fn health_check(&self, network: &str) -> Result<bool, ChainError> {
        let market = self.markets.get(network)?;
        let provider = ProviderBuilder::new().on_http(market.rpc_endpoint()?);
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::rpc("eth_chainId", e))?;
        debug!(network, chain_id, expected = market.chain_id, "Provider health check");
        Ok(chain_id == market.chain_id)
    }
}

async fn read_account<P: Provider>(
    provider: &P,
    market: &Market,
    holder: Address,
    block: BlockId,
) -> Result<AccountData, ChainError> {
    let pool = IPool::new(market.pool, provider);
    let data = pool
        .getUserAccountData(holder)
        .block(block)
        .call()
        .await
        .map_err(|e| ChainError::rpc("getUserAccountData", e))?;

    Ok(AccountData {
        total_collateral_base: data.totalCollateralBase,
        total_debt_base: data.totalDebtBase,
        available_borrows_base: data.availableBorrowsBase,
        liquidation_threshold_bps: data.currentLiquidationThreshold,
        ltv_bps: data.ltv,
        health_factor: data.healthFactor,
    })
}

async fn read_reserve<P: Provider>(
    provider: &P,
    market: &Market,
    reserve: &ReserveInfo,
    holder: Address,
    block: BlockId,
) -> Result<ReserveData, ChainError> {
    let data_provider = IPoolDataProvider::new(market.data_provider, provider);
    let oracle = IAaveOracle::new(market.oracle, provider);

    let user_call = data_provider
        .getUserReserveData(reserve.underlying, holder)
        .block(block);
    let config_call = data_provider
        .getReserveConfigurationData(reserve.underlying)
        .block(block);
    let price_call = oracle.getAssetPrice(reserve.underlying).block(block);

    let (user, config, price) = tokio::join!(user_call.call(), config_call.call(), price_call.call());
    let context = |call: &str| format!("{call}({})", reserve.symbol);
    let user = user.map_err(|e| ChainError::rpc(&context("getUserReserveData"), e))?;
    let config = config.map_err(|e| ChainError::rpc(&context("getReserveConfigurationData"), e))?;
    let price = price.map_err(|e| ChainError::rpc(&context("getAssetPrice"), e))?;

    if config.decimals > U256::from(u8::MAX) {
        return Err(ChainError::Malformed(format!(
            "{} reports {} decimals",
            reserve.symbol, config.decimals
        )));
    }

    Ok(ReserveData {
        symbol: reserve.symbol.clone(),
        asset: reserve.underlying,
        decimals: config.decimals.to::<u8>(),
        price: price.price,
        supplied: user.currentATokenBalance,
        stable_debt: user.currentStableDebt,
        variable_debt: user.currentVariableDebt,
        liquidation_threshold_bps: config.liquidationThreshold,
        usage_as_collateral: user.usageAsCollateralEnabled,
    })
}

#[async_trait]
impl LendingPoolReader for PoolReader {
    #[instrument(skip(self), fields(holder = %holder))]
    async fn get_position(&self, network: &str, holder: Address) -> Result<PositionData, ChainError> {
        let market = self.markets.get(network)?;
        let provider = ProviderBuilder::new().on_http(market.rpc_endpoint()?);

        let block_number = provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::rpc("eth_blockNumber", e))?;
        let block = BlockId::number(block_number);

        let (account, reserves) = tokio::try_join!(
            read_account(&provider, market, holder, block),
            try_join_all(
                market
                    .reserves
                    .iter()
                    .map(|reserve| read_reserve(&provider, market, reserve, holder, block)),
            ),
        )?;

        debug!(
            block = block_number,
            reserves = reserves.len(),
            collateral_base = %account.total_collateral_base,
            debt_base = %account.total_debt_base,
            "Position read"
        );

        Ok(PositionData {
            holder,
            network: network.to_string(),
            block_number,
            account,
            reserves,
        })
    }

    async fn token_balance(&self, network: &str, token: Address, owner: Address) -> Result<U256, ChainError> {
        let market = self.markets.get(network)?;
        let provider = ProviderBuilder::new().on_http(market.rpc_endpoint()?);
        let erc20 = IERC20::new(token, &provider);
        let balance = erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| ChainError::rpc("balanceOf", e))?;
        Ok(balance.balance)
    }

    async fn allowance(
        &self,
        network: &str,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let market = self.markets.get(network)?;
        let provider = ProviderBuilder::new().on_http(market.rpc_endpoint()?);
        let erc20 = IERC20::new(token, &provider);
        let allowance = erc20
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| ChainError::rpc("allowance", e))?;
        Ok(allowance.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::GasPricing;

    fn market(rpc_url: String, pool: Address, data_provider: Address, oracle: Address, usdc: Address) -> Market {
        Market {
            network: "base-sepolia".to_string(),
            chain_id: 84532,
            rpc_url,
            pool,
            data_provider,
            oracle,
            gas: GasPricing::default(),
            reserves: vec![ReserveInfo {
                symbol: "USDC".to_string(),
                underlying: usdc,
                decimals: 6,
            }],
        }
    }

    #[tokio::test]
    async fn test_unknown_network_is_rejected_before_rpc() {
        let m = market(
            "http://127.0.0.1:8545".to_string(),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            Address::repeat_byte(4),
        );
        let reader = PoolReader::new(MarketRegistry::new([m]));
        let err = reader.get_position("mainnet", Address::ZERO).await.unwrap_err();
        assert!(matches!(err, ChainError::UnknownNetwork(n) if n == "mainnet"));
    }

    #[tokio::test]
    #[ignore] // Requires network and BASE_SEPOLIA_* env vars
    async fn test_read_position() {
        let var = |name: &str| std::env::var(name).unwrap();
        let addr = |name: &str| var(name).parse::<Address>().unwrap();
        let m = market(
            var("BASE_SEPOLIA_RPC_URL"),
            addr("BASE_SEPOLIA_POOL"),
            addr("BASE_SEPOLIA_DATA_PROVIDER"),
            addr("BASE_SEPOLIA_ORACLE"),
            addr("BASE_SEPOLIA_USDC"),
        );
        let reader = PoolReader::new(MarketRegistry::new([m]));
        assert!(reader.health_check("base-sepolia").await.unwrap());

        let position = reader
            .get_position("base-sepolia", Address::repeat_byte(0x42))
            .await
            .unwrap();
        assert_eq!(position.reserves.len(), 1);
        assert!(position.block_number > 0);
    }
}
