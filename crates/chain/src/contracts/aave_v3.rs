//! AAVE V3 contract interfaces.
//!
//! Pool entry points used for supply, borrow and repay, and the read-side
//! contracts (protocol data provider, price oracle) used to rebuild a
//! holder's position.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

sol! {
    /// Aave V3 Pool interface (subset for account data and position changes)
    #[sol(rpc)]
    interface IPool {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralBase,
            uint256 totalDebtBase,
            uint256 availableBorrowsBase,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );

        function supply(
            address asset,
            uint256 amount,
            address onBehalfOf,
            uint16 referralCode
        ) external;

        function borrow(
            address asset,
            uint256 amount,
            uint256 interestRateMode,
            uint16 referralCode,
            address onBehalfOf
        ) external;

        function repay(
            address asset,
            uint256 amount,
            uint256 interestRateMode,
            address onBehalfOf
        ) external returns (uint256 repaid);
    }
}

sol! {
    /// Aave V3 protocol data provider (per-reserve reads)
    #[sol(rpc)]
    interface IPoolDataProvider {
        function getUserReserveData(address asset, address user) external view returns (
            uint256 currentATokenBalance,
            uint256 currentStableDebt,
            uint256 currentVariableDebt,
            uint256 principalStableDebt,
            uint256 scaledVariableDebt,
            uint256 stableBorrowRate,
            uint256 liquidityRate,
            uint40 stableRateLastUpdated,
            bool usageAsCollateralEnabled
        );

        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );
    }
}

sol! {
    /// Aave V3 price oracle. Prices are in the base currency (8 decimals, USD).
    #[sol(rpc)]
    interface IAaveOracle {
        function getAssetPrice(address asset) external view returns (uint256 price);
    }
}

/// Referral code passed to pool calls.
pub const REFERRAL_CODE: u16 = 0;

/// Aave debt rate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InterestRateMode {
    Stable = 1,
    Variable = 2,
}

impl InterestRateMode {
    pub fn as_u256(self) -> U256 {
        U256::from(self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Variable => "variable",
        }
    }
}

impl std::fmt::Display for InterestRateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterestRateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "stable" => Ok(Self::Stable),
            "2" | "variable" => Ok(Self::Variable),
            other => Err(format!("unknown rate mode: {other}")),
        }
    }
}

/// Encode `supply(asset, amount, onBehalfOf, 0)`.
pub fn encode_supply(asset: Address, amount: U256, on_behalf_of: Address) -> Bytes {
    let call = IPool::supplyCall {
        asset,
        amount,
        onBehalfOf: on_behalf_of,
        referralCode: REFERRAL_CODE,
    };
    Bytes::from(call.abi_encode())
}

/// Encode `borrow(asset, amount, mode, 0, onBehalfOf)`.
pub fn encode_borrow(
    asset: Address,
    amount: U256,
    mode: InterestRateMode,
    on_behalf_of: Address,
) -> Bytes {
    let call = IPool::borrowCall {
        asset,
        amount,
        interestRateMode: mode.as_u256(),
        referralCode: REFERRAL_CODE,
        onBehalfOf: on_behalf_of,
    };
    Bytes::from(call.abi_encode())
}

/// Encode `repay(asset, amount, mode, onBehalfOf)`.
pub fn encode_repay(
    asset: Address,
    amount: U256,
    mode: InterestRateMode,
    on_behalf_of: Address,
) -> Bytes {
    let call = IPool::repayCall {
        asset,
        amount,
        interestRateMode: mode.as_u256(),
        onBehalfOf: on_behalf_of,
    };
    Bytes::from(call.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const USDC: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");
    const HOLDER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    #[test]
    fn test_pool_selectors() {
        assert_eq!(hex::encode(IPool::supplyCall::SELECTOR), "617ba037");
        assert_eq!(hex::encode(IPool::borrowCall::SELECTOR), "a415bcad");
        assert_eq!(hex::encode(IPool::repayCall::SELECTOR), "573ade81");
        assert_eq!(hex::encode(IPool::getUserAccountDataCall::SELECTOR), "bf92857c");
    }

    #[test]
    fn test_encode_borrow_layout() {
        let data = encode_borrow(USDC, U256::from(500_000_000u64), InterestRateMode::Variable, HOLDER);
        assert_eq!(data.len(), 4 + 32 * 5);
        assert_eq!(&data[..4], IPool::borrowCall::SELECTOR.as_slice());

        let decoded = IPool::borrowCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.asset, USDC);
        assert_eq!(decoded.amount, U256::from(500_000_000u64));
        assert_eq!(decoded.interestRateMode, U256::from(2));
        assert_eq!(decoded.onBehalfOf, HOLDER);
    }

    #[test]
    fn test_encode_repay_carries_rate_mode() {
        let data = encode_repay(USDC, U256::from(1u64), InterestRateMode::Stable, HOLDER);
        let decoded = IPool::repayCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.interestRateMode, U256::from(1));
    }

    #[test]
    fn test_encode_supply_referral_code() {
        let data = encode_supply(USDC, U256::from(10u64), HOLDER);
        let decoded = IPool::supplyCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.referralCode, REFERRAL_CODE);
        assert_eq!(decoded.onBehalfOf, HOLDER);
    }

    #[test]
    fn test_rate_mode_parsing() {
        assert_eq!("variable".parse::<InterestRateMode>(), Ok(InterestRateMode::Variable));
        assert_eq!("1".parse::<InterestRateMode>(), Ok(InterestRateMode::Stable));
        assert!("fixed".parse::<InterestRateMode>().is_err());
        assert_eq!(InterestRateMode::Variable.as_u256(), U256::from(2));
    }
}
