//! Requests coming in and results going out.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use concierge_chain::InterestRateMode;
use serde::{Deserialize, Serialize};

use crate::errors::FailureKind;
use crate::safety::Rejection;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Supply,
    Borrow,
    Repay,
    Simulate,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supply => "supply",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
            Self::Simulate => "simulate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool operation. Every request carries one; for `simulate` it is the
/// operation being dry-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Supply,
    Borrow,
    Repay,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supply => "supply",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supply" => Ok(Self::Supply),
            "borrow" => Ok(Self::Borrow),
            "repay" => Ok(Self::Repay),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

impl From<Operation> for ActionKind {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Supply => Self::Supply,
            Operation::Borrow => Self::Borrow,
            Operation::Repay => Self::Repay,
        }
    }
}

/// An immutable action request.
///
/// Built through the per-kind constructors; fields are read through getters.
/// Validation happens in the safety evaluator, not here, so a bad amount
/// still produces a proper rejection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    kind: ActionKind,
    operation: Operation,
    holder: Address,
    asset: String,
    amount: f64,
    network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_mode: Option<InterestRateMode>,
}

impl ActionRequest {
    fn new(
        kind: ActionKind,
        operation: Operation,
        holder: Address,
        asset: impl Into<String>,
        amount: f64,
        network: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            holder,
            asset: asset.into(),
            amount,
            network: network.into(),
            rate_mode: None,
        }
    }

    pub fn supply(holder: Address, asset: impl Into<String>, amount: f64, network: impl Into<String>) -> Self {
        Self::new(ActionKind::Supply, Operation::Supply, holder, asset, amount, network)
    }

    pub fn borrow(holder: Address, asset: impl Into<String>, amount: f64, network: impl Into<String>) -> Self {
        Self::new(ActionKind::Borrow, Operation::Borrow, holder, asset, amount, network)
    }

    pub fn repay(holder: Address, asset: impl Into<String>, amount: f64, network: impl Into<String>) -> Self {
        Self::new(ActionKind::Repay, Operation::Repay, holder, asset, amount, network)
    }

    /// Dry-run of `operation`. Never reaches the transaction executor.
    pub fn simulate(
        operation: Operation,
        holder: Address,
        asset: impl Into<String>,
        amount: f64,
        network: impl Into<String>,
    ) -> Self {
        Self::new(ActionKind::Simulate, operation, holder, asset, amount, network)
    }

    /// Rate mode for borrow and repay. Ignored for supply.
    pub fn with_rate_mode(mut self, mode: InterestRateMode) -> Self {
        self.rate_mode = Some(mode);
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn holder(&self) -> Address {
        self.holder
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn rate_mode(&self) -> Option<InterestRateMode> {
        self.rate_mode
    }

    pub fn is_simulation(&self) -> bool {
        self.kind == ActionKind::Simulate
    }
}

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Executed,
    Rejected,
    Simulated,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Simulated => "simulated",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a write did not end in a successful receipt.
///
/// `tx_hash` is set whenever the main transaction was broadcast, so callers
/// can poll it instead of resubmitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<B256>,
}

impl ExecutionFailure {
    pub fn submission(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Submission,
            reason: reason.into(),
            tx_hash: None,
            approval_tx_hash: None,
        }
    }

    pub fn with_approval(mut self, approval_tx_hash: Option<B256>) -> Self {
        self.approval_tx_hash = approval_tx_hash;
        self
    }

    /// True when something reached the chain and may still land.
    pub fn was_broadcast(&self) -> bool {
        self.tx_hash.is_some()
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Dry-run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationVerdict {
    Safe,
    Risky,
    InsufficientCapacity,
    NoDebt,
}

impl SimulationVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Risky => "risky",
            Self::InsufficientCapacity => "insufficient_capacity",
            Self::NoDebt => "no_debt",
        }
    }
}

impl fmt::Display for SimulationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a simulation found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub operation: Operation,
    pub verdict: SimulationVerdict,
    /// USD value of the simulated amount
    pub value_usd: f64,
    pub available_borrows_usd: f64,
    pub projected_collateral_usd: f64,
    pub projected_debt_usd: f64,
    pub min_health_factor: f64,
}

/// Result of one request. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: ActionKind,
    pub operation: Operation,
    pub outcome: Outcome,
    pub network: String,
    pub holder: Address,
    pub asset: String,
    pub amount: f64,
    /// Token units actually applied; repay is capped at outstanding debt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_factor_before: Option<f64>,
    /// Projected, not re-read after execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_factor_after: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationReport>,
    pub audit_message: String,
}

impl ActionResult {
    /// Empty result for `request` with the given outcome.
    pub(crate) fn for_request(request: &ActionRequest, asset: &str, outcome: Outcome) -> Self {
        Self {
            action: request.kind(),
            operation: request.operation(),
            outcome,
            network: request.network().to_string(),
            holder: request.holder(),
            asset: asset.to_string(),
            amount: request.amount(),
            applied_amount: None,
            tx_hash: None,
            approval_tx_hash: None,
            block_number: None,
            health_factor_before: None,
            health_factor_after: None,
            rejection: None,
            failure: None,
            simulation: None,
            audit_message: String::new(),
        }
    }

    /// Human-readable reason for non-success outcomes.
    pub fn reason(&self) -> Option<String> {
        if let Some(rejection) = &self.rejection {
            return Some(rejection.to_string());
        }
        if let Some(failure) = &self.failure {
            return Some(failure.to_string());
        }
        self.simulation.as_ref().map(|s| format!("simulation {}", s.verdict))
    }
}
