//! Position snapshots and the reader that produces them.
//!
//! A [`Position`] is built fresh for every request and never cached: a stale
//! snapshot could hide liquidation risk from the safety checks.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use concierge_chain::{
    ChainError, InterestRateMode, LendingPoolReader, Market, MarketRegistry, PositionData, ReserveData,
};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, instrument, warn};

use crate::errors::ConciergeError;
use crate::u256_math::{self, BPS_DENOMINATOR, NO_DEBT_HEALTH_FACTOR};

/// One reserve of a holder's position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservePosition {
    pub symbol: String,
    pub asset: Address,
    pub decimals: u8,
    /// Oracle price in USD
    pub price_usd: f64,
    /// aToken balance (raw)
    pub supplied: U256,
    /// Stable debt (raw)
    pub stable_debt: U256,
    /// Variable debt (raw)
    pub variable_debt: U256,
    /// Liquidation threshold as a ratio (0.825 = 82.5%)
    pub liquidation_threshold: f64,
    /// Whether the supplied balance counts as collateral
    pub collateral_enabled: bool,
}

impl ReservePosition {
    pub fn supplied_units(&self) -> f64 {
        u256_math::to_units(self.supplied, self.decimals)
    }

    pub fn supplied_usd(&self) -> f64 {
        self.supplied_units() * self.price_usd
    }

    /// Debt for one rate mode (raw).
    pub fn debt(&self, mode: InterestRateMode) -> U256 {
        match mode {
            InterestRateMode::Stable => self.stable_debt,
            InterestRateMode::Variable => self.variable_debt,
        }
    }

    pub fn debt_units(&self, mode: InterestRateMode) -> f64 {
        u256_math::to_units(self.debt(mode), self.decimals)
    }

    pub fn total_debt(&self) -> U256 {
        self.stable_debt.saturating_add(self.variable_debt)
    }

    pub fn debt_usd(&self) -> f64 {
        u256_math::to_units(self.total_debt(), self.decimals) * self.price_usd
    }

    /// Rate mode a repay would use: the requested one, otherwise stable when
    /// there is stable debt, else variable.
    pub fn repay_mode(&self, requested: Option<InterestRateMode>) -> InterestRateMode {
        requested.unwrap_or(if self.stable_debt.is_zero() {
            InterestRateMode::Variable
        } else {
            InterestRateMode::Stable
        })
    }
}

/// Holder snapshot on one network at one block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub holder: Address,
    pub network: String,
    pub block_number: u64,
    pub reserves: SmallVec<[ReservePosition; 4]>,
    pub total_collateral_usd: f64,
    pub total_debt_usd: f64,
    pub available_borrows_usd: f64,
    /// Weighted average liquidation threshold as a ratio
    pub liquidation_threshold: f64,
    /// Weighted average loan-to-value as a ratio
    pub ltv: f64,
    /// [`NO_DEBT_HEALTH_FACTOR`] when there is no debt
    pub health_factor: f64,
}

impl Position {
    /// Validate a raw read against the market it came from.
    pub fn from_data(data: PositionData, market: &Market) -> Result<Self, ChainError> {
        let account = &data.account;
        let max_bps = U256::from(BPS_DENOMINATOR);

        if account.liquidation_threshold_bps > max_bps || account.ltv_bps > max_bps {
            return Err(ChainError::Malformed(format!(
                "account threshold {} / ltv {} above 100%",
                account.liquidation_threshold_bps, account.ltv_bps
            )));
        }
        if !account.total_debt_base.is_zero() && account.health_factor.is_zero() {
            return Err(ChainError::Malformed(
                "positive debt with zero health factor".to_string(),
            ));
        }

        let mut reserves = SmallVec::new();
        for configured in &market.reserves {
            let raw = data
                .reserves
                .iter()
                .find(|r| r.asset == configured.underlying)
                .ok_or_else(|| ChainError::Malformed(format!("reserve {} missing from read", configured.symbol)))?;
            if raw.decimals != configured.decimals {
                return Err(ChainError::Malformed(format!(
                    "{} reports {} decimals, configured {}",
                    configured.symbol, raw.decimals, configured.decimals
                )));
            }
            reserves.push(reserve_position(&configured.symbol, raw)?);
        }

        let total_debt_usd = u256_math::base_to_usd(account.total_debt_base);
        let health_factor = if account.total_debt_base.is_zero() {
            NO_DEBT_HEALTH_FACTOR
        } else {
            u256_math::health_factor_from_wad(account.health_factor)
        };

        Ok(Self {
            holder: data.holder,
            network: data.network,
            block_number: data.block_number,
            reserves,
            total_collateral_usd: u256_math::base_to_usd(account.total_collateral_base),
            total_debt_usd,
            available_borrows_usd: u256_math::base_to_usd(account.available_borrows_base),
            liquidation_threshold: u256_math::bps_to_ratio(account.liquidation_threshold_bps),
            ltv: u256_math::bps_to_ratio(account.ltv_bps),
            health_factor,
        })
    }

    /// Reserve by symbol, ignoring ASCII case.
    pub fn reserve(&self, symbol: &str) -> Option<&ReservePosition> {
        self.reserves.iter().find(|r| r.symbol.eq_ignore_ascii_case(symbol))
    }

    pub(crate) fn reserve_mut(&mut self, symbol: &str) -> Option<&mut ReservePosition> {
        self.reserves.iter_mut().find(|r| r.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn has_debt(&self) -> bool {
        self.total_debt_usd > 0.0
    }
}

fn reserve_position(symbol: &str, raw: &ReserveData) -> Result<ReservePosition, ChainError> {
    if raw.price.is_zero() {
        return Err(ChainError::Malformed(format!("zero oracle price for {symbol}")));
    }
    if raw.liquidation_threshold_bps > U256::from(BPS_DENOMINATOR) {
        return Err(ChainError::Malformed(format!(
            "{symbol} liquidation threshold {} above 100%",
            raw.liquidation_threshold_bps
        )));
    }

    Ok(ReservePosition {
        symbol: symbol.to_string(),
        asset: raw.asset,
        decimals: raw.decimals,
        price_usd: u256_math::base_to_usd(raw.price),
        supplied: raw.supplied,
        stable_debt: raw.stable_debt,
        variable_debt: raw.variable_debt,
        liquidation_threshold: u256_math::bps_to_ratio(raw.liquidation_threshold_bps),
        collateral_enabled: raw.usage_as_collateral,
    })
}

/// Read-only health summary returned by `check_health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub holder: Address,
    pub network: String,
    pub block_number: u64,
    pub health_factor: f64,
    pub min_health_factor: f64,
    pub safe_to_borrow: bool,
    pub total_collateral_usd: f64,
    pub total_debt_usd: f64,
    pub available_borrows_usd: f64,
}

impl HealthReport {
    pub fn new(position: &Position, min_health_factor: f64) -> Self {
        Self {
            holder: position.holder,
            network: position.network.clone(),
            block_number: position.block_number,
            health_factor: position.health_factor,
            min_health_factor,
            safe_to_borrow: position.health_factor >= min_health_factor,
            total_collateral_usd: position.total_collateral_usd,
            total_debt_usd: position.total_debt_usd,
            available_borrows_usd: position.available_borrows_usd,
        }
    }
}

/// Fetches and validates positions through the read capability.
#[derive(Debug, Clone)]
pub struct PositionReader {
    reader: Arc<dyn LendingPoolReader>,
    markets: MarketRegistry,
}

impl PositionReader {
    pub fn new(reader: Arc<dyn LendingPoolReader>, markets: MarketRegistry) -> Self {
        Self { reader, markets }
    }

    /// Fresh snapshot for `holder`. Every call hits the chain.
    #[instrument(skip(self), fields(holder = %holder))]
    pub async fn read(&self, network: &str, holder: Address) -> Result<Position, ConciergeError> {
        let market = self
            .markets
            .get(network)
            .map_err(|_| ConciergeError::UnknownNetwork(network.to_string()))?;

        let data = self
            .reader
            .get_position(network, holder)
            .await
            .map_err(|e| ConciergeError::chain_read(network, e))?;

        let position = Position::from_data(data, market).map_err(|e| {
            warn!(error = %e, "Rejecting malformed position data");
            ConciergeError::chain_read(network, e)
        })?;

        debug!(
            block = position.block_number,
            collateral_usd = position.total_collateral_usd,
            debt_usd = position.total_debt_usd,
            hf = %u256_math::format_health_factor(position.health_factor),
            "Position loaded"
        );
        Ok(position)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::address;
    use concierge_chain::{AccountData, GasPricing, ReserveInfo};

    pub(crate) const USDC: Address = address!("a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1");
    pub(crate) const WETH: Address = address!("a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2");

    pub(crate) fn test_market() -> Market {
        Market {
            network: "base-sepolia".to_string(),
            chain_id: 84532,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            pool: Address::repeat_byte(0x01),
            data_provider: Address::repeat_byte(0x02),
            oracle: Address::repeat_byte(0x03),
            gas: GasPricing::default(),
            reserves: vec![
                ReserveInfo {
                    symbol: "USDC".to_string(),
                    underlying: USDC,
                    decimals: 6,
                },
                ReserveInfo {
                    symbol: "WETH".to_string(),
                    underlying: WETH,
                    decimals: 18,
                },
            ],
        }
    }

    fn base(usd: f64) -> U256 {
        U256::from((usd * 1e8).round() as u128)
    }

    /// Raw read for a holder with `collateral_usd` of USDC supplied (LT 85%)
    /// and `debt_usd` of variable USDC debt.
    pub(crate) fn position_data(holder: Address, collateral_usd: f64, debt_usd: f64) -> PositionData {
        let hf = if debt_usd == 0.0 {
            U256::MAX
        } else {
            U256::from((collateral_usd * 0.85 / debt_usd * 1e18) as u128)
        };
        PositionData {
            holder,
            network: "base-sepolia".to_string(),
            block_number: 1_000,
            account: AccountData {
                total_collateral_base: base(collateral_usd),
                total_debt_base: base(debt_usd),
                available_borrows_base: base((collateral_usd * 0.8 - debt_usd).max(0.0)),
                liquidation_threshold_bps: U256::from(8500u64),
                ltv_bps: U256::from(8000u64),
                health_factor: hf,
            },
            reserves: vec![
                ReserveData {
                    symbol: "USDC".to_string(),
                    asset: USDC,
                    decimals: 6,
                    price: U256::from(100_000_000u64),
                    supplied: U256::from((collateral_usd * 1e6) as u128),
                    stable_debt: U256::ZERO,
                    variable_debt: U256::from((debt_usd * 1e6) as u128),
                    liquidation_threshold_bps: U256::from(8500u64),
                    usage_as_collateral: true,
                },
                ReserveData {
                    symbol: "WETH".to_string(),
                    asset: WETH,
                    decimals: 18,
                    price: U256::from(300_000_000_000u64),
                    supplied: U256::ZERO,
                    stable_debt: U256::ZERO,
                    variable_debt: U256::ZERO,
                    liquidation_threshold_bps: U256::from(8300u64),
                    usage_as_collateral: false,
                },
            ],
        }
    }

    pub(crate) fn position(collateral_usd: f64, debt_usd: f64) -> Position {
        Position::from_data(position_data(Address::repeat_byte(0x42), collateral_usd, debt_usd), &test_market())
            .unwrap()
    }

    #[test]
    fn test_position_from_data() {
        let pos = position(1000.0, 400.0);
        assert_eq!(pos.total_collateral_usd, 1000.0);
        assert_eq!(pos.total_debt_usd, 400.0);
        assert_eq!(pos.liquidation_threshold, 0.85);
        assert!((pos.health_factor - 2.125).abs() < 1e-9);
        assert!(pos.has_debt());

        let usdc = pos.reserve("usdc").unwrap();
        assert_eq!(usdc.supplied_units(), 1000.0);
        assert_eq!(usdc.debt_units(InterestRateMode::Variable), 400.0);
        assert_eq!(usdc.debt_usd(), 400.0);
        assert_eq!(usdc.repay_mode(None), InterestRateMode::Variable);
    }

    #[test]
    fn test_no_debt_health_factor() {
        let pos = position(1000.0, 0.0);
        assert_eq!(pos.health_factor, NO_DEBT_HEALTH_FACTOR);
        assert!(!pos.has_debt());
    }

    #[test]
    fn test_repay_mode_prefers_stable_debt() {
        let mut reserve = position(1000.0, 0.0).reserve("USDC").unwrap().clone();
        reserve.stable_debt = U256::from(5u64);
        assert_eq!(reserve.repay_mode(None), InterestRateMode::Stable);
        assert_eq!(
            reserve.repay_mode(Some(InterestRateMode::Variable)),
            InterestRateMode::Variable
        );
    }

    #[test]
    fn test_malformed_reads_are_rejected() {
        let holder = Address::repeat_byte(0x42);
        let market = test_market();

        let mut data = position_data(holder, 1000.0, 0.0);
        data.reserves[0].price = U256::ZERO;
        assert!(matches!(Position::from_data(data, &market), Err(ChainError::Malformed(_))));

        let mut data = position_data(holder, 1000.0, 0.0);
        data.reserves.pop();
        assert!(matches!(Position::from_data(data, &market), Err(ChainError::Malformed(_))));

        let mut data = position_data(holder, 1000.0, 0.0);
        data.reserves[1].decimals = 8;
        assert!(matches!(Position::from_data(data, &market), Err(ChainError::Malformed(_))));

        let mut data = position_data(holder, 1000.0, 0.0);
        data.account.liquidation_threshold_bps = U256::from(12_000u64);
        assert!(matches!(Position::from_data(data, &market), Err(ChainError::Malformed(_))));

        let mut data = position_data(holder, 1000.0, 400.0);
        data.account.health_factor = U256::ZERO;
        assert!(matches!(Position::from_data(data, &market), Err(ChainError::Malformed(_))));
    }

    #[test]
    fn test_health_report() {
        let report = HealthReport::new(&position(1000.0, 400.0), 1.1);
        assert!(report.safe_to_borrow);
        let report = HealthReport::new(&position(1000.0, 800.0), 1.1);
        assert!(!report.safe_to_borrow);
    }
}
