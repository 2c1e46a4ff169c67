//! Request orchestration.
//!
//! Per request: precheck, fresh position read, policy decision, execution
//! (when approved and not a simulation), one audit dispatch, one result.
//! No state is kept between requests beyond the read-only configuration.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use concierge_api::AuditSink;
use concierge_chain::{LendingPoolReader, MarketRegistry, ReceiptInfo, TransactionSubmitter};
use tracing::{info, instrument, warn};

use crate::action::{ActionKind, ActionRequest, ActionResult, Outcome};
use crate::audit::{self, AuditDispatcher, AuditMessage};
use crate::config::{ExecutionConfig, PolicyConfig};
use crate::errors::ConciergeError;
use crate::executor::TransactionExecutor;
use crate::position::{HealthReport, PositionReader};
use crate::safety::{Decision, SafetyEvaluator};
use crate::u256_math::format_health_factor;

/// External capabilities the concierge drives.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn LendingPoolReader>,
    pub submitter: Arc<dyn TransactionSubmitter>,
    pub audit: Arc<dyn AuditSink>,
}

/// Lending concierge: the request surface exposed to the CLI/HTTP layer.
#[derive(Debug, Clone)]
pub struct Concierge {
    markets: MarketRegistry,
    positions: PositionReader,
    evaluator: SafetyEvaluator,
    executor: TransactionExecutor,
    audit: AuditDispatcher,
}

impl Concierge {
    pub fn new(
        markets: MarketRegistry,
        policy: PolicyConfig,
        execution: &ExecutionConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConciergeError> {
        let evaluator = SafetyEvaluator::new(policy)?;
        let Collaborators { reader, submitter, audit } = collaborators;
        info!(
            networks = ?markets.networks(),
            executor = %submitter.executor_address(),
            min_health_factor = evaluator.min_health_factor(),
            "Concierge initialized"
        );
        Ok(Self {
            positions: PositionReader::new(reader.clone(), markets.clone()),
            executor: TransactionExecutor::new(reader, submitter, markets.clone(), execution),
            evaluator,
            audit: AuditDispatcher::new(audit),
            markets,
        })
    }

    pub fn markets(&self) -> &MarketRegistry {
        &self.markets
    }

    pub fn audit(&self) -> &AuditDispatcher {
        &self.audit
    }

    /// Current health factor and whether a borrow would be allowed at all.
    /// Read-only; no audit record.
    #[instrument(skip(self), fields(holder = %holder))]
    pub async fn check_health(&self, holder: Address, network: &str) -> Result<HealthReport, ConciergeError> {
        if holder == Address::ZERO {
            return Err(ConciergeError::InvalidHolder);
        }
        let position = self.positions.read(network, holder).await?;
        let report = HealthReport::new(&position, self.evaluator.min_health_factor());
        info!(
            hf = %format_health_factor(report.health_factor),
            safe_to_borrow = report.safe_to_borrow,
            "Health checked"
        );
        Ok(report)
    }

    pub async fn execute_supply(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        Self::expect_kind(&request, ActionKind::Supply)?;
        self.handle(request).await
    }

    pub async fn execute_borrow(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        Self::expect_kind(&request, ActionKind::Borrow)?;
        self.handle(request).await
    }

    pub async fn execute_repay(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        Self::expect_kind(&request, ActionKind::Repay)?;
        self.handle(request).await
    }

    pub async fn simulate(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        Self::expect_kind(&request, ActionKind::Simulate)?;
        self.handle(request).await
    }

    /// Route any request by its kind.
    pub async fn execute(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        self.handle(request).await
    }

    /// Poll a transaction reported by an earlier `confirmation_timeout`.
    pub async fn receipt_status(&self, network: &str, tx_hash: B256) -> Result<Option<ReceiptInfo>, ConciergeError> {
        self.executor.receipt_status(network, tx_hash).await
    }

    /// Give in-flight audit submissions up to `timeout` to finish.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.audit.drain(timeout).await
    }

    fn expect_kind(request: &ActionRequest, expected: ActionKind) -> Result<(), ConciergeError> {
        if request.kind() == expected {
            Ok(())
        } else {
            Err(ConciergeError::WrongAction {
                expected,
                actual: request.kind(),
            })
        }
    }

    #[instrument(
        name = "request",
        skip_all,
        fields(
            action = %request.kind(),
            holder = %request.holder(),
            network = %request.network(),
            asset = %request.asset()
        )
    )]
    async fn handle(&self, request: ActionRequest) -> Result<ActionResult, ConciergeError> {
        let market = self
            .markets
            .get(request.network())
            .map_err(|_| ConciergeError::UnknownNetwork(request.network().to_string()))?;
        let asset = market
            .reserve(request.asset())
            .map(|r| r.symbol.clone())
            .unwrap_or_else(|| request.asset().to_string());

        if let Err(rejection) = self.evaluator.precheck(&request, market) {
            warn!(code = rejection.code(), %rejection, "Request rejected before read");
            let mut result = ActionResult::for_request(&request, &asset, Outcome::Rejected);
            result.rejection = Some(rejection);
            return Ok(self.finish(&request, result));
        }

        let position = match self.positions.read(request.network(), request.holder()).await {
            Ok(position) => position,
            Err(err) => {
                warn!(error = %err, "Position read failed");
                let line = AuditMessage::for_request(&request, &asset)
                    .field("outcome", Outcome::Error)
                    .reason(&err.to_string())
                    .finish();
                self.audit.dispatch(line);
                return Err(err);
            }
        };

        let mut result = match self.evaluator.evaluate(&request, &position) {
            Decision::Rejected(rejection) => {
                warn!(code = rejection.code(), %rejection, "Request rejected by policy");
                let mut result = ActionResult::for_request(&request, &asset, Outcome::Rejected);
                result.rejection = Some(rejection);
                result
            }
            Decision::SimulationOnly { projection, report } => {
                let mut result = ActionResult::for_request(&request, &asset, Outcome::Simulated);
                result.applied_amount = Some(projection.applied_units);
                result.health_factor_after = Some(projection.health_factor_after());
                result.simulation = Some(report);
                result
            }
            Decision::Approved(approval) => {
                let applied = Some(approval.projection().applied_units);
                match self.executor.execute(&request, &approval, &position).await {
                    Ok(execution) => {
                        let mut result = ActionResult::for_request(&request, &asset, Outcome::Executed);
                        result.applied_amount = applied;
                        result.tx_hash = Some(execution.tx_hash);
                        result.approval_tx_hash = execution.approval_tx_hash;
                        result.block_number = execution.block_number;
                        result.health_factor_after = Some(approval.projection().health_factor_after());
                        result
                    }
                    Err(failure) => {
                        warn!(kind = %failure.kind, reason = %failure.reason, "Execution failed");
                        let mut result = ActionResult::for_request(&request, &asset, Outcome::Error);
                        result.applied_amount = applied;
                        result.tx_hash = failure.tx_hash;
                        result.approval_tx_hash = failure.approval_tx_hash;
                        result.failure = Some(failure);
                        result
                    }
                }
            }
        };
        result.health_factor_before = Some(position.health_factor);

        Ok(self.finish(&request, result))
    }

    /// Attach the audit line and dispatch it. Exactly once per result.
    fn finish(&self, request: &ActionRequest, mut result: ActionResult) -> ActionResult {
        result.audit_message = audit::describe(request, &result);
        info!(
            outcome = %result.outcome,
            tx_hash = ?result.tx_hash,
            "Request finished"
        );
        self.audit.dispatch(result.audit_message.clone());
        result
    }
}
