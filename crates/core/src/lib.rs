//! Lending concierge core logic.
//!
//! This crate provides the request pipeline around an Aave V3 market:
//! - Configuration loading and validation
//! - Position snapshots with health metrics
//! - Pure in-memory projection of supply/borrow/repay
//! - Safety evaluation against the configured policy
//! - Transaction execution through the executor identity
//! - Fire-and-forget audit dispatch to a consensus log
//! - The orchestrator tying them together
//!
//! Chain access goes through `concierge-chain` traits and audit submission
//! through `concierge-api`, so every stage can run against in-memory doubles.

mod action;
mod audit;
pub mod config;
mod errors;
mod executor;
mod orchestrator;
mod position;
mod projection;
mod safety;
pub mod u256_math;

pub use action::{
    ActionKind, ActionRequest, ActionResult, ExecutionFailure, Operation, Outcome, SimulationReport,
    SimulationVerdict,
};
pub use audit::{describe as describe_result, AuditDispatcher, AuditMessage};
pub use config::ConciergeConfig;
pub use errors::{ConciergeError, FailureKind};
pub use executor::{Execution, TransactionExecutor};
pub use orchestrator::{Collaborators, Concierge};
pub use position::{HealthReport, Position, PositionReader, ReservePosition};
pub use projection::{health_factor, project, Projection};
pub use safety::{Approval, Decision, Rejection, SafetyEvaluator};
