//! Transaction executor.
//!
//! Turns an approved request into pool calls signed by the executor
//! identity: preflight reads, an optional exact-amount `approve`, then the
//! supply/borrow/repay call and a bounded wait for its receipt. Nothing is
//! retried. A failure reports how far the write got.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256, U256};
use concierge_chain::{
    encode_approve, encode_borrow, encode_repay, encode_supply, ChainError, InterestRateMode, LendingPoolReader,
    Market, MarketRegistry, PreparedCall, ReceiptInfo, ReserveInfo, TransactionSubmitter,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::action::{ActionRequest, ExecutionFailure, Operation};
use crate::config::{ExecutionConfig, GasLimits};
use crate::errors::{ConciergeError, FailureKind};
use crate::position::Position;
use crate::safety::Approval;
use crate::u256_math;

/// A confirmed, successful write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub tx_hash: B256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// Raw amount sent to the pool
    pub amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_mode: Option<InterestRateMode>,
}

/// Builds, signs, submits and confirms pool calls.
#[derive(Debug, Clone)]
pub struct TransactionExecutor {
    reader: Arc<dyn LendingPoolReader>,
    submitter: Arc<dyn TransactionSubmitter>,
    markets: MarketRegistry,
    confirmation_timeout: Duration,
    gas_limits: GasLimits,
}

impl TransactionExecutor {
    pub fn new(
        reader: Arc<dyn LendingPoolReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        markets: MarketRegistry,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            reader,
            submitter,
            markets,
            confirmation_timeout: execution.confirmation_timeout(),
            gas_limits: execution.gas_limits,
        }
    }

    pub fn executor_address(&self) -> Address {
        self.submitter.executor_address()
    }

    /// Execute an approved request. One state-changing pool call at most,
    /// preceded by an `approve` when the pool allowance is short.
    #[instrument(skip_all, fields(operation = %approval.operation(), holder = %request.holder(), network = %request.network()))]
    pub async fn execute(
        &self,
        request: &ActionRequest,
        approval: &Approval,
        position: &Position,
    ) -> Result<Execution, ExecutionFailure> {
        if request.is_simulation() || approval.operation() != request.operation() {
            return Err(ExecutionFailure::submission(format!(
                "approval for {} does not cover {} request",
                approval.operation(),
                request.kind()
            )));
        }

        let market = self
            .markets
            .get(request.network())
            .map_err(|e| ExecutionFailure::submission(e.to_string()))?;
        let reserve = market
            .reserve(request.asset())
            .ok_or_else(|| ExecutionFailure::submission(format!("{} not configured", request.asset())))?;
        let requested = u256_math::parse_units(request.amount(), reserve.decimals)
            .ok_or_else(|| ExecutionFailure::submission("amount below token precision"))?;

        let holder = request.holder();
        let (amount, rate_mode, data, gas_limit) = match request.operation() {
            Operation::Supply => (
                requested,
                None,
                encode_supply(reserve.underlying, requested, holder),
                self.gas_limits.supply,
            ),
            Operation::Borrow => {
                let mode = request.rate_mode().unwrap_or(InterestRateMode::Variable);
                (
                    requested,
                    Some(mode),
                    encode_borrow(reserve.underlying, requested, mode, holder),
                    self.gas_limits.borrow,
                )
            }
            Operation::Repay => {
                let held = position
                    .reserve(&reserve.symbol)
                    .ok_or_else(|| ExecutionFailure::submission(format!("{} missing from position", reserve.symbol)))?;
                let mode = held.repay_mode(request.rate_mode());
                let amount = u256_math::min(requested, held.debt(mode));
                if amount.is_zero() {
                    return Err(ExecutionFailure::submission(format!("no {mode} {} debt", reserve.symbol)));
                }
                (
                    amount,
                    Some(mode),
                    encode_repay(reserve.underlying, amount, mode, holder),
                    self.gas_limits.repay,
                )
            }
        };

        let approval_tx_hash = match request.operation() {
            Operation::Supply | Operation::Repay => self.prepare_funds(market, reserve, amount).await?,
            Operation::Borrow => None,
        };

        let call = PreparedCall {
            label: request.operation().as_str(),
            to: market.pool,
            data,
            gas_limit,
        };
        let receipt = self
            .send_and_confirm(request.network(), call)
            .await
            .map_err(|f| f.with_approval(approval_tx_hash))?;

        info!(
            tx_hash = %receipt.tx_hash,
            amount = %amount,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            "Pool call confirmed"
        );

        Ok(Execution {
            tx_hash: receipt.tx_hash,
            approval_tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            amount,
            rate_mode,
        })
    }

    /// Funds check for calls that pull tokens from the executor, plus an
    /// exact-amount `approve` when the pool allowance is short.
    async fn prepare_funds(
        &self,
        market: &Market,
        reserve: &ReserveInfo,
        amount: U256,
    ) -> Result<Option<B256>, ExecutionFailure> {
        let executor = self.submitter.executor_address();
        let network = market.network.as_str();

        let (balance, allowance) = tokio::try_join!(
            self.reader.token_balance(network, reserve.underlying, executor),
            self.reader.allowance(network, reserve.underlying, executor, market.pool),
        )
        .map_err(|e| ExecutionFailure::submission(format!("preflight read failed: {e}")))?;

        if balance < amount {
            warn!(
                asset = %reserve.symbol,
                balance = %balance,
                required = %amount,
                "Executor balance too low"
            );
            return Err(ExecutionFailure::submission(format!(
                "executor holds {} {}, needs {}",
                u256_math::to_units(balance, reserve.decimals),
                reserve.symbol,
                u256_math::to_units(amount, reserve.decimals)
            )));
        }

        if allowance >= amount {
            debug!(allowance = %allowance, "Allowance sufficient");
            return Ok(None);
        }

        let call = PreparedCall {
            label: "approve",
            to: reserve.underlying,
            data: encode_approve(market.pool, amount),
            gas_limit: self.gas_limits.approve,
        };
        let receipt = self.send_and_confirm(network, call).await.map_err(|f| {
            // The pool call was never sent; the approve hash is the only reference.
            ExecutionFailure {
                kind: f.kind,
                reason: format!("approve failed: {}", f.reason),
                tx_hash: None,
                approval_tx_hash: f.tx_hash,
            }
        })?;
        Ok(Some(receipt.tx_hash))
    }

    /// Submit once and wait for the receipt. No retries.
    async fn send_and_confirm(&self, network: &str, call: PreparedCall) -> Result<ReceiptInfo, ExecutionFailure> {
        let label = call.label;
        let start = Instant::now();

        let tx_hash = self.submitter.submit(network, call).await.map_err(|e| {
            warn!(call = label, error = %e, "Submission failed");
            ExecutionFailure::submission(e.to_string())
        })?;
        debug!(call = label, tx_hash = %tx_hash, "Submitted");

        let receipt = self
            .submitter
            .await_receipt(network, tx_hash, self.confirmation_timeout)
            .await
            .map_err(|e| {
                warn!(call = label, tx_hash = %tx_hash, error = %e, "Confirmation failed");
                let reason = match &e {
                    ChainError::ConfirmationTimeout { .. } => {
                        format!("{e}; transaction may still be mined, poll {tx_hash}")
                    }
                    _ => e.to_string(),
                };
                ExecutionFailure {
                    kind: FailureKind::ConfirmationTimeout,
                    reason,
                    tx_hash: Some(tx_hash),
                    approval_tx_hash: None,
                }
            })?;

        if !receipt.success {
            warn!(call = label, tx_hash = %tx_hash, "Transaction reverted");
            return Err(ExecutionFailure {
                kind: FailureKind::Reverted,
                reason: format!("{label} reverted in block {}", receipt.block_number.unwrap_or(0)),
                tx_hash: Some(tx_hash),
                approval_tx_hash: None,
            });
        }

        debug!(call = label, elapsed_ms = start.elapsed().as_millis(), "Confirmed");
        Ok(receipt)
    }

    /// Look up an earlier transaction without resubmitting it. `None` while
    /// still pending.
    pub async fn receipt_status(&self, network: &str, tx_hash: B256) -> Result<Option<ReceiptInfo>, ConciergeError> {
        if !self.markets.contains(network) {
            return Err(ConciergeError::UnknownNetwork(network.to_string()));
        }
        self.submitter
            .receipt(network, tx_hash)
            .await
            .map_err(|e| ConciergeError::chain_read(network, e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::position::tests::{position, test_market, USDC};
    use crate::safety::{Decision, SafetyEvaluator};
    use alloy::primitives::FixedBytes;
    use alloy::sol_types::SolCall;
    use concierge_chain::contracts::{IPool, IERC20};
    use concierge_chain::PositionData;
    use parking_lot::Mutex;

    /// What the fake chain does with each submitted call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Script {
        Confirm,
        Revert,
        Timeout,
        RejectSubmit,
    }

    /// In-memory chain: serves positions and balances, records submissions.
    #[derive(Debug)]
    pub(crate) struct FakeChain {
        pub position: Mutex<Result<PositionData, String>>,
        pub balance: U256,
        pub allowance: U256,
        pub scripts: Mutex<Vec<Script>>,
        pub submitted: Mutex<Vec<PreparedCall>>,
        pub position_reads: Mutex<usize>,
    }

    impl FakeChain {
        pub(crate) fn new(position: PositionData) -> Self {
            Self {
                position: Mutex::new(Ok(position)),
                balance: U256::from(1_000_000_000_000u64),
                allowance: U256::ZERO,
                scripts: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
                position_reads: Mutex::new(0),
            }
        }

        pub(crate) fn with_scripts(self, scripts: &[Script]) -> Self {
            *self.scripts.lock() = scripts.to_vec();
            self
        }

        pub(crate) fn labels(&self) -> Vec<&'static str> {
            self.submitted.lock().iter().map(|c| c.label).collect()
        }
    }

    fn hash_for(index: usize) -> B256 {
        FixedBytes::with_last_byte(index as u8 + 1)
    }

    #[async_trait::async_trait]
    impl LendingPoolReader for FakeChain {
        async fn get_position(&self, _network: &str, _holder: Address) -> Result<PositionData, ChainError> {
            *self.position_reads.lock() += 1;
            self.position.lock().clone().map_err(ChainError::Rpc)
        }

        async fn token_balance(&self, _network: &str, _token: Address, _owner: Address) -> Result<U256, ChainError> {
            Ok(self.balance)
        }

        async fn allowance(
            &self,
            _network: &str,
            _token: Address,
            _owner: Address,
            _spender: Address,
        ) -> Result<U256, ChainError> {
            Ok(self.allowance)
        }
    }

    #[async_trait::async_trait]
    impl TransactionSubmitter for FakeChain {
        fn executor_address(&self) -> Address {
            Address::repeat_byte(0xEE)
        }

        async fn submit(&self, _network: &str, call: PreparedCall) -> Result<B256, ChainError> {
            let mut submitted = self.submitted.lock();
            let index = submitted.len();
            if self.scripts.lock().get(index) == Some(&Script::RejectSubmit) {
                return Err(ChainError::Submission {
                    reason: "nonce too low".to_string(),
                });
            }
            submitted.push(call);
            Ok(hash_for(index))
        }

        async fn await_receipt(&self, _network: &str, tx_hash: B256, timeout: Duration) -> Result<ReceiptInfo, ChainError> {
            let index = tx_hash[31] as usize - 1;
            match self.scripts.lock().get(index).copied().unwrap_or(Script::Confirm) {
                Script::Timeout => Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    timeout_secs: timeout.as_secs(),
                }),
                script => Ok(ReceiptInfo {
                    tx_hash,
                    success: script != Script::Revert,
                    block_number: Some(100 + index as u64),
                    gas_used: 21_000,
                }),
            }
        }

        async fn receipt(&self, _network: &str, tx_hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
            Ok((tx_hash == hash_for(0)).then_some(ReceiptInfo {
                tx_hash,
                success: true,
                block_number: Some(100),
                gas_used: 21_000,
            }))
        }
    }

    fn executor(chain: Arc<FakeChain>) -> TransactionExecutor {
        TransactionExecutor::new(
            chain.clone(),
            chain,
            MarketRegistry::new([test_market()]),
            &ExecutionConfig::default(),
        )
    }

    fn approve(request: &ActionRequest, pos: &Position) -> Approval {
        match SafetyEvaluator::new(PolicyConfig::new(1.1)).unwrap().evaluate(request, pos) {
            Decision::Approved(approval) => approval,
            other => panic!("expected approval, got {other:?}"),
        }
    }

    fn holder() -> Address {
        Address::repeat_byte(0x42)
    }

    fn fake_chain(collateral: f64, debt: f64) -> FakeChain {
        FakeChain::new(crate::position::tests::position_data(holder(), collateral, debt))
    }

    #[tokio::test]
    async fn test_borrow_encodes_variable_on_behalf_of_holder() {
        let chain = Arc::new(fake_chain(1000.0, 0.0));
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::borrow(holder(), "USDC", 500.0, "base-sepolia");

        let exec = executor(chain.clone()).execute(&req, &approve(&req, &pos), &pos).await.unwrap();
        assert_eq!(exec.tx_hash, hash_for(0));
        assert_eq!(exec.approval_tx_hash, None);
        assert_eq!(exec.rate_mode, Some(InterestRateMode::Variable));

        let calls = chain.submitted.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to, test_market().pool);
        assert_eq!(calls[0].gas_limit, 400_000);
        let decoded = IPool::borrowCall::abi_decode(&calls[0].data, true).unwrap();
        assert_eq!(decoded.asset, USDC);
        assert_eq!(decoded.amount, U256::from(500_000_000u64));
        assert_eq!(decoded.interestRateMode, U256::from(2u64));
        assert_eq!(decoded.onBehalfOf, holder());
    }

    #[tokio::test]
    async fn test_supply_approves_exact_amount_first() {
        let chain = Arc::new(fake_chain(1000.0, 0.0));
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::supply(holder(), "USDC", 250.0, "base-sepolia");

        let exec = executor(chain.clone()).execute(&req, &approve(&req, &pos), &pos).await.unwrap();
        assert_eq!(chain.labels(), vec!["approve", "supply"]);
        assert_eq!(exec.approval_tx_hash, Some(hash_for(0)));
        assert_eq!(exec.tx_hash, hash_for(1));

        let calls = chain.submitted.lock().clone();
        let approve_call = IERC20::approveCall::abi_decode(&calls[0].data, true).unwrap();
        assert_eq!(approve_call.spender, test_market().pool);
        assert_eq!(approve_call.amount, U256::from(250_000_000u64));
        assert_eq!(calls[0].to, USDC);
    }

    #[tokio::test]
    async fn test_supply_skips_approve_with_allowance() {
        let mut fake = fake_chain(1000.0, 0.0);
        fake.allowance = U256::MAX;
        let chain = Arc::new(fake);
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::supply(holder(), "USDC", 250.0, "base-sepolia");

        let exec = executor(chain.clone()).execute(&req, &approve(&req, &pos), &pos).await.unwrap();
        assert_eq!(chain.labels(), vec!["supply"]);
        assert_eq!(exec.approval_tx_hash, None);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_never_broadcast() {
        let mut fake = fake_chain(1000.0, 0.0);
        fake.balance = U256::from(1u64);
        let chain = Arc::new(fake);
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::supply(holder(), "USDC", 250.0, "base-sepolia");

        let failure = executor(chain.clone())
            .execute(&req, &approve(&req, &pos), &pos)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Submission);
        assert!(!failure.was_broadcast());
        assert!(chain.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_repay_is_capped_at_debt() {
        let mut fake = fake_chain(1000.0, 400.0);
        fake.allowance = U256::MAX;
        let chain = Arc::new(fake);
        let pos = position(1000.0, 400.0);
        let req = ActionRequest::repay(holder(), "USDC", 1000.0, "base-sepolia");

        let exec = executor(chain.clone()).execute(&req, &approve(&req, &pos), &pos).await.unwrap();
        assert_eq!(exec.amount, U256::from(400_000_000u64));
        assert_eq!(exec.rate_mode, Some(InterestRateMode::Variable));

        let calls = chain.submitted.lock().clone();
        let decoded = IPool::repayCall::abi_decode(&calls[0].data, true).unwrap();
        assert_eq!(decoded.amount, U256::from(400_000_000u64));
        assert_eq!(decoded.interestRateMode, U256::from(2u64));
        assert_eq!(calls[0].gas_limit, 350_000);
    }

    #[tokio::test]
    async fn test_failure_kinds_are_distinguished() {
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::borrow(holder(), "USDC", 100.0, "base-sepolia");
        let approval = approve(&req, &pos);

        let chain = Arc::new(fake_chain(1000.0, 0.0).with_scripts(&[Script::RejectSubmit]));
        let failure = executor(chain).execute(&req, &approval, &pos).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Submission);
        assert_eq!(failure.tx_hash, None);

        let chain = Arc::new(fake_chain(1000.0, 0.0).with_scripts(&[Script::Timeout]));
        let failure = executor(chain).execute(&req, &approval, &pos).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::ConfirmationTimeout);
        assert_eq!(failure.tx_hash, Some(hash_for(0)));

        let chain = Arc::new(fake_chain(1000.0, 0.0).with_scripts(&[Script::Revert]));
        let failure = executor(chain).execute(&req, &approval, &pos).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Reverted);
        assert_eq!(failure.tx_hash, Some(hash_for(0)));
    }

    #[tokio::test]
    async fn test_failed_approve_stops_before_pool_call() {
        let chain = Arc::new(fake_chain(1000.0, 0.0).with_scripts(&[Script::Revert]));
        let pos = position(1000.0, 0.0);
        let req = ActionRequest::supply(holder(), "USDC", 10.0, "base-sepolia");

        let failure = executor(chain.clone())
            .execute(&req, &approve(&req, &pos), &pos)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Reverted);
        assert_eq!(failure.tx_hash, None);
        assert_eq!(failure.approval_tx_hash, Some(hash_for(0)));
        assert_eq!(chain.labels(), vec!["approve"]);
    }

    #[tokio::test]
    async fn test_mismatched_approval_is_refused() {
        let chain = Arc::new(fake_chain(1000.0, 0.0));
        let pos = position(1000.0, 0.0);
        let supply = ActionRequest::supply(holder(), "USDC", 10.0, "base-sepolia");
        let borrow = ActionRequest::borrow(holder(), "USDC", 10.0, "base-sepolia");

        let failure = executor(chain.clone())
            .execute(&borrow, &approve(&supply, &pos), &pos)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Submission);
        assert!(chain.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_status() {
        let exec = executor(Arc::new(fake_chain(1000.0, 0.0)));
        let found = exec.receipt_status("base-sepolia", hash_for(0)).await.unwrap();
        assert!(found.is_some_and(|r| r.success));
        assert_eq!(exec.receipt_status("base-sepolia", hash_for(5)).await.unwrap(), None);
        assert!(matches!(
            exec.receipt_status("mainnet", hash_for(0)).await,
            Err(ConciergeError::UnknownNetwork(_))
        ));
    }
}
