//! Safety evaluator.
//!
//! Two stages: `precheck` runs before any chain read and rejects requests
//! that can never be valid; `evaluate` applies policy against a fresh
//! position. Only an [`Approval`] produced here lets the executor write.

use std::fmt;

use alloy::primitives::Address;
use concierge_chain::Market;
use serde::Serialize;
use tracing::debug;

use crate::action::{ActionRequest, Operation, SimulationReport, SimulationVerdict};
use crate::config::PolicyConfig;
use crate::errors::ConciergeError;
use crate::position::Position;
use crate::projection::{project, Projection};
use crate::u256_math::{self, format_health_factor};

/// Why a request was refused. No chain write follows a rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    InvalidAmount { amount: f64, reason: String },
    InvalidHolder,
    UnsupportedAsset { asset: String, network: String },
    NoDebt { asset: String },
    HealthFactorTooLow { projected: f64, minimum: f64 },
    InsufficientCapacity { requested_usd: f64, available_usd: f64 },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::InvalidHolder => "invalid_holder",
            Self::UnsupportedAsset { .. } => "unsupported_asset",
            Self::NoDebt { .. } => "no_debt",
            Self::HealthFactorTooLow { .. } => "health_factor_too_low",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount { amount, reason } => write!(f, "invalid amount {amount}: {reason}"),
            Self::InvalidHolder => f.write_str("holder address must not be zero"),
            Self::UnsupportedAsset { asset, network } => write!(f, "{asset} is not supported on {network}"),
            Self::NoDebt { asset } => write!(f, "no {asset} debt to repay"),
            Self::HealthFactorTooLow { projected, minimum } => write!(
                f,
                "projected health factor {} below minimum {}",
                format_health_factor(*projected),
                format_health_factor(*minimum)
            ),
            Self::InsufficientCapacity {
                requested_usd,
                available_usd,
            } => write!(
                f,
                "borrow of ${requested_usd:.2} exceeds available ${available_usd:.2}"
            ),
        }
    }
}

/// Proof that a mutating request passed policy. Only the evaluator builds one.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    operation: Operation,
    projection: Projection,
}

impl Approval {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approved(Approval),
    Rejected(Rejection),
    /// Simulations are always let through, flagged so no write follows.
    SimulationOnly {
        projection: Projection,
        report: SimulationReport,
    },
}

/// Applies the configured policy to requests.
#[derive(Debug, Clone)]
pub struct SafetyEvaluator {
    policy: PolicyConfig,
}

impl SafetyEvaluator {
    /// Rejects a policy that could not gate anything (non-finite or below 1.0).
    pub fn new(policy: PolicyConfig) -> Result<Self, ConciergeError> {
        policy
            .validate()
            .map_err(|e| ConciergeError::Config(e.to_string()))?;
        Ok(Self { policy })
    }

    pub fn min_health_factor(&self) -> f64 {
        self.policy.min_health_factor
    }

    /// Checks that need no chain state. Runs for every kind, simulate included.
    pub fn precheck(&self, request: &ActionRequest, market: &Market) -> Result<(), Rejection> {
        if request.holder() == Address::ZERO {
            return Err(Rejection::InvalidHolder);
        }

        let amount = request.amount();
        let invalid = |reason: &str| Rejection::InvalidAmount {
            amount,
            reason: reason.to_string(),
        };
        if !amount.is_finite() {
            return Err(invalid("not a finite number"));
        }
        if amount <= 0.0 {
            return Err(invalid("must be positive"));
        }
        if amount > self.policy.max_amount {
            return Err(invalid(&format!("above the {} token limit", self.policy.max_amount)));
        }

        let reserve = market
            .reserve(request.asset())
            .ok_or_else(|| Rejection::UnsupportedAsset {
                asset: request.asset().to_string(),
                network: market.network.clone(),
            })?;

        if u256_math::parse_units(amount, reserve.decimals).is_none() {
            return Err(invalid(&format!("below {} precision", reserve.symbol)));
        }
        Ok(())
    }

    /// Policy decision against a fresh position.
    pub fn evaluate(&self, request: &ActionRequest, position: &Position) -> Decision {
        let Some(projection) = project(position, request) else {
            return Decision::Rejected(Rejection::UnsupportedAsset {
                asset: request.asset().to_string(),
                network: position.network.clone(),
            });
        };

        let verdict = self.verdict(request, position, &projection);
        debug!(
            operation = %request.operation(),
            hf_before = %format_health_factor(projection.health_factor_before),
            hf_after = %format_health_factor(projection.health_factor_after()),
            verdict = %verdict,
            "Safety evaluation"
        );

        if request.is_simulation() {
            let report = SimulationReport {
                operation: request.operation(),
                verdict,
                value_usd: projection.value_usd,
                available_borrows_usd: position.available_borrows_usd,
                projected_collateral_usd: projection.position.total_collateral_usd,
                projected_debt_usd: projection.position.total_debt_usd,
                min_health_factor: self.policy.min_health_factor,
            };
            return Decision::SimulationOnly { projection, report };
        }

        match verdict {
            SimulationVerdict::Safe => Decision::Approved(Approval {
                operation: request.operation(),
                projection,
            }),
            SimulationVerdict::Risky => Decision::Rejected(Rejection::HealthFactorTooLow {
                projected: projection.health_factor_after(),
                minimum: self.policy.min_health_factor,
            }),
            SimulationVerdict::InsufficientCapacity => Decision::Rejected(Rejection::InsufficientCapacity {
                requested_usd: projection.value_usd,
                available_usd: position.available_borrows_usd,
            }),
            SimulationVerdict::NoDebt => Decision::Rejected(Rejection::NoDebt {
                asset: canonical_symbol(position, request),
            }),
        }
    }

    /// Supply always passes. Repay needs debt in the chosen mode. Borrow must
    /// keep the health factor above the minimum, then fit available borrows.
    fn verdict(&self, request: &ActionRequest, position: &Position, projection: &Projection) -> SimulationVerdict {
        match request.operation() {
            Operation::Supply => SimulationVerdict::Safe,
            Operation::Repay => {
                let has_debt = position.reserve(request.asset()).is_some_and(|r| {
                    !r.debt(r.repay_mode(request.rate_mode())).is_zero()
                });
                if has_debt {
                    SimulationVerdict::Safe
                } else {
                    SimulationVerdict::NoDebt
                }
            }
            Operation::Borrow => {
                // NaN on either side must read as risky.
                if !(projection.health_factor_after() >= self.policy.min_health_factor) {
                    SimulationVerdict::Risky
                } else if projection.value_usd > position.available_borrows_usd {
                    SimulationVerdict::InsufficientCapacity
                } else {
                    SimulationVerdict::Safe
                }
            }
        }
    }
}

fn canonical_symbol(position: &Position, request: &ActionRequest) -> String {
    position
        .reserve(request.asset())
        .map(|r| r.symbol.clone())
        .unwrap_or_else(|| request.asset().to_string())
}
