//! Transaction signing and submission for the executor identity.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! One [`TransactionSender`] per network holds the nonce sequence and gas
//! quote cache for that chain. [`ExecutorSigner`] owns the key and routes each
//! call to the right sender. Submission and confirmation are separate steps:
//! a submitted transaction is never resent from here.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::ChainError;
use crate::gas::{GasPricing, GasQuote};
use crate::lending::{PreparedCall, ReceiptInfo, TransactionSubmitter};
use crate::market::{Market, MarketRegistry};

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Local nonce sequence for one executor identity on one chain.
///
/// The first allocation (and the first after [`NonceTracker::invalidate`])
/// reads the pending nonce from chain. The lock is held only while a nonce is
/// handed out, never across a submission.
#[derive(Debug, Default)]
pub struct NonceTracker {
    next: Mutex<Option<u64>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded with a known next nonce.
    pub fn starting_at(nonce: u64) -> Self {
        Self {
            next: Mutex::new(Some(nonce)),
        }
    }

    /// Hand out the next nonce, fetching it with `fetch` when unknown.
    pub async fn allocate<F, Fut>(&self, fetch: F) -> Result<u64, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, ChainError>>,
    {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => fetch().await?,
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Forget the local sequence so the next allocation resyncs from chain.
    pub async fn invalidate(&self) {
        *self.next.lock().await = None;
    }

    /// Next nonce that would be handed out, if known.
    pub async fn peek(&self) -> Option<u64> {
        *self.next.lock().await
    }
}

/// Signs and submits transactions on a single network.
pub struct TransactionSender {
    network: String,
    rpc_url: Url,
    chain_id: u64,
    wallet: EthereumWallet,
    address: Address,
    gas: GasPricing,
    nonces: NonceTracker,
    last_quote: parking_lot::RwLock<Option<GasQuote>>,
    poll_interval: Duration,
}

impl TransactionSender {
    pub fn new(market: &Market, signer: PrivateKeySigner, poll_interval: Duration) -> Result<Self, ChainError> {
        let address = signer.address();
        Ok(Self {
            network: market.network.clone(),
            rpc_url: market.rpc_endpoint()?,
            chain_id: market.chain_id,
            wallet: EthereumWallet::from(signer),
            address,
            gas: market.gas,
            nonces: NonceTracker::new(),
            last_quote: parking_lot::RwLock::new(None),
            poll_interval,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn gas_pricing(&self) -> GasPricing {
        self.gas
    }

    /// Last gas quote fetched from chain, if any.
    pub fn cached_quote(&self) -> Option<GasQuote> {
        *self.last_quote.read()
    }

    async fn gas_quote<P: Provider>(&self, provider: &P) -> GasQuote {
        match self.gas.fetch_quote(provider).await {
            Ok(quote) => {
                *self.last_quote.write() = Some(quote);
                quote
            }
            Err(e) => {
                let fallback = self.cached_quote().unwrap_or_else(|| self.gas.fallback_quote());
                warn!(network = %self.network, error = %e, quote = ?fallback, "Gas quote failed, using fallback");
                fallback
            }
        }
    }

    /// Sign and broadcast `call`. Returns as soon as the node accepts it.
    #[instrument(skip(self, call), fields(network = %self.network, call = call.label))]
    pub async fn submit(&self, call: PreparedCall) -> Result<B256, ChainError> {
        let start = Instant::now();
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());

        let nonce = self
            .nonces
            .allocate(|| async {
                provider
                    .get_transaction_count(self.address)
                    .pending()
                    .await
                    .map_err(|e| ChainError::Submission {
                        reason: format!("nonce lookup failed: {e}"),
                    })
            })
            .await?;

        let quote = self.gas_quote(&provider).await;

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(call.to)
            .with_input(call.data)
            .with_nonce(nonce)
            .with_gas_limit(call.gas_limit)
            .with_chain_id(self.chain_id);
        quote.apply(&mut tx);

        info!(
            to = %call.to,
            nonce,
            gas_limit = call.gas_limit,
            gas_pricing = self.gas.name(),
            max_gas_price_gwei = quote.max_price() / 1_000_000_000,
            "Sending transaction"
        );

        match provider.send_transaction(tx).await {
            Ok(pending) => {
                let tx_hash = *pending.tx_hash();
                info!(
                    tx_hash = %tx_hash,
                    nonce,
                    submit_ms = start.elapsed().as_millis(),
                    "Transaction submitted"
                );
                Ok(tx_hash)
            }
            Err(e) => {
                // Rejected by the node: the nonce may or may not have been consumed.
                warn!(nonce, error = %e, "Transaction rejected, resyncing nonce");
                self.nonces.invalidate().await;
                Err(ChainError::Submission {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Single receipt lookup.
    pub async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let receipt = provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::rpc("eth_getTransactionReceipt", e))?;
        Ok(receipt.as_ref().map(receipt_info))
    }

    /// Poll for the receipt of `tx_hash` until `timeout` elapses.
    ///
    /// RPC errors while polling are logged and polling continues; only the
    /// deadline ends the wait.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn await_receipt(&self, tx_hash: B256, timeout: Duration) -> Result<ReceiptInfo, ChainError> {
        let start = Instant::now();
        let wait = async {
            loop {
                match self.receipt(tx_hash).await {
                    Ok(Some(info)) => return info,
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(info) => {
                info!(
                    tx_hash = %tx_hash,
                    success = info.success,
                    block = info.block_number.unwrap_or(0),
                    gas_used = info.gas_used,
                    confirm_ms = start.elapsed().as_millis(),
                    "Receipt received"
                );
                Ok(info)
            }
            Err(_) => {
                // The transaction may have been dropped; resync from the pending count.
                warn!(tx_hash = %tx_hash, timeout_secs = timeout.as_secs(), "No receipt before timeout, resyncing nonce");
                self.nonces.invalidate().await;
                Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Next nonce this sender would use, if already synced.
    pub async fn pending_nonce(&self) -> Option<u64> {
        self.nonces.peek().await
    }
}

fn receipt_info(receipt: &TransactionReceipt) -> ReceiptInfo {
    ReceiptInfo {
        tx_hash: receipt.transaction_hash,
        success: receipt.status(),
        block_number: receipt.block_number,
        gas_used: u64::try_from(receipt.gas_used).unwrap_or(u64::MAX),
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("gas", &self.gas.name())
            .finish_non_exhaustive()
    }
}

/// The executor identity across every configured network.
#[derive(Debug)]
pub struct ExecutorSigner {
    address: Address,
    senders: HashMap<String, TransactionSender>,
}

impl ExecutorSigner {
    /// Build senders for every market from a hex private key (with or without 0x).
    pub fn new(private_key: &str, markets: &MarketRegistry, poll_interval: Duration) -> Result<Self, ChainError> {
        let key = private_key.trim().trim_start_matches("0x");
        let signer = key
            .parse::<PrivateKeySigner>()
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let address = signer.address();

        let mut senders = HashMap::with_capacity(markets.len());
        for market in markets.iter() {
            let sender = TransactionSender::new(market, signer.clone(), poll_interval)?;
            senders.insert(market.network.clone(), sender);
        }

        info!(
            address = %address,
            networks = ?markets.networks(),
            "Executor signer initialized"
        );

        Ok(Self { address, senders })
    }

    pub fn sender(&self, network: &str) -> Result<&TransactionSender, ChainError> {
        self.senders
            .get(network)
            .ok_or_else(|| ChainError::UnknownNetwork(network.to_string()))
    }
}

#[async_trait]
impl TransactionSubmitter for ExecutorSigner {
    fn executor_address(&self) -> Address {
        self.address
    }

    async fn submit(&self, network: &str, call: PreparedCall) -> Result<B256, ChainError> {
        self.sender(network)?.submit(call).await
    }

    async fn await_receipt(
        &self,
        network: &str,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ReceiptInfo, ChainError> {
        self.sender(network)?.await_receipt(tx_hash, timeout).await
    }

    async fn receipt(&self, network: &str, tx_hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        self.sender(network)?.receipt(tx_hash).await
    }
}
