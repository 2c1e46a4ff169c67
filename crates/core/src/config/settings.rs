//! Policy, execution and audit settings.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Safety policy applied before any mutating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Minimum projected health factor a borrow may leave behind.
    /// Deliberately has no default.
    pub min_health_factor: f64,

    /// Largest amount accepted in a single request (token units)
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
}

fn default_max_amount() -> f64 {
    1e9
}

impl PolicyConfig {
    pub fn new(min_health_factor: f64) -> Self {
        Self {
            min_health_factor,
            max_amount: default_max_amount(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_health_factor.is_finite() || self.min_health_factor < 1.0 {
            bail!(
                "policy.min_health_factor must be finite and >= 1.0, got {}",
                self.min_health_factor
            );
        }
        if !self.max_amount.is_finite() || self.max_amount <= 0.0 {
            bail!("policy.max_amount must be positive, got {}", self.max_amount);
        }
        Ok(())
    }
}

/// Transaction execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// How long to wait for a receipt after broadcast
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval while waiting
    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,

    /// Gas limits per call kind
    #[serde(default)]
    pub gas_limits: GasLimits,
}

fn default_confirmation_timeout() -> u64 {
    120
}
fn default_receipt_poll_interval() -> u64 {
    1000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: default_confirmation_timeout(),
            receipt_poll_interval_ms: default_receipt_poll_interval(),
            gas_limits: GasLimits::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmation_timeout_secs == 0 {
            bail!("execution.confirmation_timeout_secs must be > 0");
        }
        if self.receipt_poll_interval_ms == 0 {
            bail!("execution.receipt_poll_interval_ms must be > 0");
        }
        let limits = &self.gas_limits;
        if [limits.approve, limits.supply, limits.borrow, limits.repay].contains(&0) {
            bail!("execution.gas_limits entries must be > 0");
        }
        Ok(())
    }
}

/// Gas limit per transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasLimits {
    #[serde(default = "default_approve_gas")]
    pub approve: u64,
    #[serde(default = "default_supply_gas")]
    pub supply: u64,
    #[serde(default = "default_borrow_gas")]
    pub borrow: u64,
    #[serde(default = "default_repay_gas")]
    pub repay: u64,
}

fn default_approve_gas() -> u64 {
    100_000
}
fn default_supply_gas() -> u64 {
    300_000
}
fn default_borrow_gas() -> u64 {
    400_000
}
fn default_repay_gas() -> u64 {
    350_000
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            approve: default_approve_gas(),
            supply: default_supply_gas(),
            borrow: default_borrow_gas(),
            repay: default_repay_gas(),
        }
    }
}

/// Consensus log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Relay endpoint; absent or empty disables audit submission
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-message submission timeout
    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,
}

fn default_audit_timeout() -> u64 {
    5
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_audit_timeout(),
        }
    }
}

impl AuditConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured endpoint, ignoring blank values.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.timeout_secs) {
            bail!("audit.timeout_secs must be between 1 and 9, got {}", self.timeout_secs);
        }
        if let Some(endpoint) = self.endpoint() {
            super::network::ensure_resolved(endpoint)?;
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                bail!("audit.endpoint must be an http(s) URL, got {endpoint:?}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_validation() {
        assert!(PolicyConfig::new(1.1).validate().is_ok());
        assert!(PolicyConfig::new(1.0).validate().is_ok());
        assert!(PolicyConfig::new(0.9).validate().is_err());
        assert!(PolicyConfig::new(f64::NAN).validate().is_err());
        assert!(PolicyConfig::new(f64::INFINITY).validate().is_err());

        let mut policy = PolicyConfig::new(1.5);
        policy.max_amount = 0.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_execution_defaults() {
        let exec = ExecutionConfig::default();
        assert_eq!(exec.confirmation_timeout(), Duration::from_secs(120));
        assert_eq!(exec.receipt_poll_interval(), Duration::from_secs(1));
        assert_eq!(exec.gas_limits.borrow, 400_000);
        assert!(exec.validate().is_ok());
    }

    #[test]
    fn test_audit_timeout_bounds() {
        let mut audit = AuditConfig::default();
        assert!(audit.validate().is_ok());
        audit.timeout_secs = 0;
        assert!(audit.validate().is_err());
        audit.timeout_secs = 10;
        assert!(audit.validate().is_err());
    }

    #[test]
    fn test_blank_audit_endpoint_is_disabled() {
        let audit = AuditConfig {
            endpoint: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(audit.endpoint(), None);
        assert!(audit.validate().is_ok());

        let audit = AuditConfig {
            endpoint: Some("relay.local/log".to_string()),
            ..Default::default()
        };
        assert!(audit.validate().is_err());
    }
}
