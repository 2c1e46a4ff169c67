//! Consensus log client for audit records.
//!
//! Posts one free-form message per call to a relay in front of an append-only
//! consensus log (Hedera Consensus Service). Every failure is folded into the
//! returned [`AuditRecord`]; nothing is raised to the caller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default bound on a single audit submission.
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reasons an audit submission did not land.
///
/// These never leave this crate as `Err`; they end up as text inside
/// [`AuditOutcome::Failed`] and in local diagnostics.
#[derive(Debug, Error)]
pub enum AuditDispatchError {
    #[error("audit endpoint did not answer within {0:?}")]
    Timeout(Duration),

    #[error("audit endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("audit transport failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("audit HTTP client could not be built: {0}")]
    Client(#[source] reqwest::Error),
}

/// What happened to a single audit submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Relay answered 2xx. Sequence number is present when the relay reports one.
    Accepted { sequence_number: Option<u64> },
    /// No endpoint configured.
    Skipped,
    /// Network error, timeout or non-2xx answer.
    Failed { reason: String },
}

/// Result of one at-most-once audit submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub message: String,
    pub outcome: AuditOutcome,
    pub submitted_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl AuditRecord {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Accepted { .. })
    }
}

/// Audit capability consumed by the orchestrator.
///
/// Implementations must be infallible from the caller's point of view and
/// must bound their own latency.
#[async_trait]
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Submit `message` once. Never retried.
    async fn submit_message(&self, message: &str) -> AuditRecord;
}

#[derive(Debug, Serialize)]
struct LogRequest<'a> {
    log_message: &'a str,
}

/// HTTP client for the consensus log relay.
#[derive(Debug, Clone)]
pub struct ConsensusLogClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    timeout: Duration,
}

impl ConsensusLogClient {
    /// Create a client for `endpoint`. An empty endpoint disables submission.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AuditDispatchError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AuditDispatchError::Client)?;

        Ok(Self {
            client,
            endpoint: Some(endpoint).filter(|e| !e.trim().is_empty()),
            timeout,
        })
    }

    /// Client that records every message as skipped.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
            timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post(&self, endpoint: &str, message: &str) -> Result<Option<u64>, AuditDispatchError> {
        let response = self
            .client
            .post(endpoint)
            .json(&LogRequest {
                log_message: message,
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditDispatchError::Status {
                status: status.as_u16(),
            });
        }

        // Relays that answer with plain text still count as accepted.
        let body = response.text().await.map_err(|e| self.classify(e))?;
        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(extract_sequence_number))
    }

    fn classify(&self, err: reqwest::Error) -> AuditDispatchError {
        if err.is_timeout() {
            AuditDispatchError::Timeout(self.timeout)
        } else {
            AuditDispatchError::Transport(err)
        }
    }
}

#[async_trait]
impl AuditSink for ConsensusLogClient {
    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn submit_message(&self, message: &str) -> AuditRecord {
        let submitted_at = Utc::now();
        let start = Instant::now();

        let outcome = match self.endpoint.as_deref() {
            None => {
                debug!("No audit endpoint configured, skipping");
                AuditOutcome::Skipped
            }
            Some(endpoint) => match self.post(endpoint, message).await {
                Ok(sequence_number) => {
                    debug!(sequence_number = ?sequence_number, "Audit record accepted");
                    AuditOutcome::Accepted { sequence_number }
                }
                Err(e) => {
                    warn!(error = %e, endpoint, "Audit submission failed");
                    AuditOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        AuditRecord {
            message: message.to_string(),
            outcome,
            submitted_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Pull a sequence number out of a relay response, numeric or string encoded.
fn extract_sequence_number(body: &Value) -> Option<u64> {
    let raw = body
        .get("sequenceNumber")
        .or_else(|| body.get("sequence_number"))?;
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
