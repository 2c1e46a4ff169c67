//! Concierge API clients for external services.
//!
//! This crate provides HTTP clients for:
//! - Consensus log relay: fire-and-forget audit records for every action

mod audit;

pub use audit::{
    AuditDispatchError, AuditOutcome, AuditRecord, AuditSink, ConsensusLogClient,
    DEFAULT_AUDIT_TIMEOUT,
};
