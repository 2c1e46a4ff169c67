//! Audit dispatch.
//!
//! Every terminal request path produces one `key=value` audit line, handed
//! to the [`AuditSink`] on its own task. The response path never waits on it;
//! `drain` exists only so a shutting-down process can give in-flight
//! submissions a bounded grace period.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use concierge_api::{AuditOutcome, AuditSink};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::action::{ActionRequest, ActionResult, ActionKind, Outcome};
use crate::u256_math::format_health_factor;

/// Builder for one audit line.
#[derive(Debug, Clone, Default)]
pub struct AuditMessage {
    parts: Vec<String>,
}

impl AuditMessage {
    /// Request fields every line carries, in a fixed order.
    pub fn for_request(request: &ActionRequest, asset: &str) -> Self {
        let mut msg = Self::default().field("action", request.kind());
        if request.kind() == ActionKind::Simulate {
            msg = msg.field("operation", request.operation());
        }
        msg.field("asset", asset)
            .field("amount", request.amount())
            .field("network", request.network())
            .field("holder", request.holder())
    }

    pub fn field(mut self, key: &str, value: impl Display) -> Self {
        self.parts.push(format!("{key}={value}"));
        self
    }

    pub fn field_opt(self, key: &str, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn health_factor(self, key: &str, hf: Option<f64>) -> Self {
        self.field_opt(key, hf.map(format_health_factor))
    }

    /// Free text, quoted so the line stays parseable.
    pub fn reason(self, reason: &str) -> Self {
        self.field("reason", format!("{reason:?}"))
    }

    pub fn finish(self) -> String {
        self.parts.join(" ")
    }
}

/// Audit line describing a finished request.
pub fn describe(request: &ActionRequest, result: &ActionResult) -> String {
    let mut msg = AuditMessage::for_request(request, &result.asset)
        .field("outcome", result.outcome)
        .health_factor("hf_before", result.health_factor_before)
        .health_factor("hf_after", result.health_factor_after)
        .field_opt("tx", result.tx_hash)
        .field_opt("approval_tx", result.approval_tx_hash)
        .field_opt("applied", result.applied_amount);
    if let Some(report) = &result.simulation {
        msg = msg.field("verdict", report.verdict);
    }
    if result.outcome != Outcome::Executed {
        if let Some(reason) = result.reason() {
            msg = msg.reason(&reason);
        }
    }
    msg.finish()
}

/// Fire-and-forget dispatcher over an [`AuditSink`].
#[derive(Debug, Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    in_flight: Arc<AtomicUsize>,
    dispatched: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

/// Decrements the in-flight count even if the submission task panics.
struct InFlight {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            in_flight: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(AtomicU64::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Launch one submission and return immediately. Must be called from
    /// within a tokio runtime.
    pub fn dispatch(&self, message: String) {
        let seq = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight {
            count: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        let sink = self.sink.clone();

        debug!(dispatch = seq, %message, "Dispatching audit record");
        tokio::spawn(async move {
            let _guard = guard;
            let record = sink.submit_message(&message).await;
            match &record.outcome {
                AuditOutcome::Accepted { sequence_number } => {
                    debug!(dispatch = seq, ?sequence_number, elapsed_ms = record.elapsed_ms, "Audit record accepted")
                }
                AuditOutcome::Skipped => debug!(dispatch = seq, "Audit record skipped"),
                AuditOutcome::Failed { reason } => {
                    warn!(dispatch = seq, %reason, elapsed_ms = record.elapsed_ms, "Audit record failed")
                }
            }
        });
    }

    /// Submissions started but not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Total dispatch attempts since construction.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for in-flight submissions. Returns whether all
    /// finished; leftovers are abandoned, not treated as errors.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => true,
            Err(_) => {
                info!(abandoned = self.in_flight(), "Audit drain timed out");
                false
            }
        }
    }
}
