//! Chain layer errors.

use alloy::primitives::B256;
use thiserror::Error;

/// Failures from chain reads and transaction submission.
///
/// Write-side variants keep "never broadcast", "broadcast but unconfirmed"
/// and "broadcast and reverted" apart because callers decide whether a
/// resubmission is safe from that distinction alone.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("malformed chain data: {0}")]
    Malformed(String),

    #[error("invalid signer key: {0}")]
    InvalidKey(String),

    /// Transaction never reached the mempool.
    #[error("transaction not broadcast: {reason}")]
    Submission { reason: String },

    /// Transaction was broadcast but no receipt arrived in time.
    #[error("no receipt for {tx_hash} after {timeout_secs}s")]
    ConfirmationTimeout { tx_hash: B256, timeout_secs: u64 },
}

impl ChainError {
    pub fn rpc(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Rpc(format!("{context}: {err}"))
    }
}
