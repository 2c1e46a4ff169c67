//! Contract bindings for the Aave V3 lending market.
//!
//! Typed `sol!` interfaces for the pool, its data provider and price oracle,
//! plus the ERC-20 surface the executor needs for balances and approvals.
//! Calldata encoders live next to the interface they target.

pub mod aave_v3;
pub mod common;

pub use aave_v3::{
    encode_borrow, encode_repay, encode_supply, IAaveOracle, IPool, IPoolDataProvider,
    InterestRateMode, REFERRAL_CODE,
};
pub use common::{encode_approve, IERC20};
