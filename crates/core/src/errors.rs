//! Typed failures surfaced to callers.

use std::fmt;

use concierge_chain::ChainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionKind;

/// Failures that end a request without an [`ActionResult`](crate::ActionResult).
///
/// Policy rejections and execution failures are not errors: they come back
/// as results with outcome `rejected` or `error`.
#[derive(Debug, Error)]
pub enum ConciergeError {
    /// Position query failed or returned data that cannot be trusted.
    #[error("position read failed on {network}: {source}")]
    ChainRead {
        network: String,
        #[source]
        source: ChainError,
    },

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("holder address must not be zero")]
    InvalidHolder,

    /// A request was routed to the entry point of another action.
    #[error("{actual} request sent to {expected} handler")]
    WrongAction { expected: ActionKind, actual: ActionKind },

    /// Policy or execution settings that cannot be enforced.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ConciergeError {
    pub(crate) fn chain_read(network: &str, source: ChainError) -> Self {
        match source {
            ChainError::UnknownNetwork(id) => Self::UnknownNetwork(id),
            source => Self::ChainRead {
                network: network.to_string(),
                source,
            },
        }
    }
}

/// How a write failed. Each kind tells the caller something different about
/// whether resubmitting is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Never broadcast. Safe to retry.
    Submission,
    /// Broadcast, no receipt within the window. May still land; poll the hash.
    ConfirmationTimeout,
    /// Mined with a failed status.
    Reverted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::Reverted => "reverted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_network_is_not_a_read_failure() {
        let err = ConciergeError::chain_read("base", ChainError::UnknownNetwork("base".into()));
        assert!(matches!(err, ConciergeError::UnknownNetwork(n) if n == "base"));

        let err = ConciergeError::chain_read("base", ChainError::Rpc("eth_call: timeout".into()));
        assert!(matches!(err, ConciergeError::ChainRead { .. }));
        assert_eq!(err.to_string(), "position read failed on base: rpc call failed: eth_call: timeout");
    }
}
