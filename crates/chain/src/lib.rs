//! Concierge chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the Aave V3 Pool, data provider, oracle and ERC-20
//! - Per-network market registry (addresses, RPC, gas pricing, reserves)
//! - Position and token reads pinned to a single block
//! - Transaction signing, submission and bounded confirmation waits
//! - Gas pricing (Legacy + EIP-1559)
//!
//! The core crate depends only on the [`LendingPoolReader`] and
//! [`TransactionSubmitter`] traits, never on providers directly.

pub mod contracts;
mod error;
pub mod gas;
mod lending;
mod market;
mod provider;
mod signer;

pub use contracts::{
    encode_approve, encode_borrow, encode_repay, encode_supply, InterestRateMode, REFERRAL_CODE,
};
pub use error::ChainError;
pub use gas::{GasPricing, GasQuote};
pub use lending::{
    AccountData, LendingPoolReader, PositionData, PreparedCall, ReceiptInfo, ReserveData,
    TransactionSubmitter,
};
pub use market::{Market, MarketRegistry, ReserveInfo};
pub use provider::PoolReader;
pub use signer::{ExecutorSigner, NonceTracker, TransactionSender, DEFAULT_RECEIPT_POLL_INTERVAL};
