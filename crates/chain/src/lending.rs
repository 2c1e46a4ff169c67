//! Lending market capability traits.
//!
//! The core crate talks to the chain only through these two traits:
//! [`LendingPoolReader`] for position and token reads, and
//! [`TransactionSubmitter`] for signing, broadcasting and confirming calls as
//! the executor identity. Both are implemented over alloy providers in this
//! crate and by in-memory doubles in tests.

use std::fmt::Debug;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChainError;

/// Aggregate account data as reported by `IPool.getUserAccountData`.
///
/// Base values use the oracle base currency (USD, 8 decimals). Thresholds are
/// basis points. `health_factor` is WAD-scaled; `U256::MAX` means no debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccountData {
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub available_borrows_base: U256,
    pub liquidation_threshold_bps: U256,
    pub ltv_bps: U256,
    pub health_factor: U256,
}

/// One reserve as seen by one holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReserveData {
    pub symbol: String,
    pub asset: Address,
    /// Decimals reported by the reserve configuration.
    pub decimals: u8,
    /// Oracle price, 8 decimals.
    pub price: U256,
    pub supplied: U256,
    pub stable_debt: U256,
    pub variable_debt: U256,
    pub liquidation_threshold_bps: U256,
    pub usage_as_collateral: bool,
}

/// Raw position read: account aggregates plus every configured reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionData {
    pub holder: Address,
    pub network: String,
    pub block_number: u64,
    pub account: AccountData,
    pub reserves: Vec<ReserveData>,
}

/// Read capability over a network's lending market.
#[async_trait]
pub trait LendingPoolReader: Send + Sync + Debug {
    /// Fresh position snapshot for `holder` on `network`.
    async fn get_position(&self, network: &str, holder: Address) -> Result<PositionData, ChainError>;

    /// ERC-20 balance of `owner`.
    async fn token_balance(&self, network: &str, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// ERC-20 allowance granted by `owner` to `spender`.
    async fn allowance(
        &self,
        network: &str,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;
}

/// A fully encoded contract call ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCall {
    /// Short name for logs ("approve", "supply", ...).
    pub label: &'static str,
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: u64,
}

/// What a mined receipt says about a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Write capability: sign, broadcast and confirm as the executor identity.
///
/// `submit` returns once the node accepted the transaction. Confirmation is a
/// separate, bounded wait so callers can tell "never broadcast" from
/// "broadcast but unconfirmed".
#[async_trait]
pub trait TransactionSubmitter: Send + Sync + Debug {
    /// Address of the executor identity that signs every call.
    fn executor_address(&self) -> Address;

    /// Sign and broadcast `call` on `network`. Errors mean nothing was broadcast.
    async fn submit(&self, network: &str, call: PreparedCall) -> Result<B256, ChainError>;

    /// Wait up to `timeout` for the receipt of `tx_hash`.
    async fn await_receipt(
        &self,
        network: &str,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ReceiptInfo, ChainError>;

    /// Single receipt lookup without waiting. `None` while still pending.
    async fn receipt(&self, network: &str, tx_hash: B256) -> Result<Option<ReceiptInfo>, ChainError>;
}
