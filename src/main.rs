//! Aave lending concierge
//!
//! Command-line front end for the concierge pipeline:
//! - Health checks against a fresh position read
//! - Supply, borrow and repay through the executor identity
//! - Dry-run simulations with a safety verdict
//! - Receipt polling for transactions that outlived their confirmation window
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use concierge_api::{AuditSink, ConsensusLogClient};
use concierge_chain::{ExecutorSigner, InterestRateMode, PoolReader};
use concierge_core::{ActionRequest, Collaborators, Concierge, ConciergeConfig, Operation, Outcome};

/// Environment variable names.
mod env {
    pub const PRIVATE_KEY: &str = "EXECUTOR_PRIVATE_KEY";
    pub const CONFIG: &str = "CONCIERGE_CONFIG";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

/// Grace period for in-flight audit submissions before exit.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Parser, Debug)]
#[command(name = "concierge")]
#[command(author, version, about = "Aave lending concierge with consensus-log auditing", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = env::CONFIG)]
    config: Option<String>,

    /// Network id (defaults to the configured default network)
    #[arg(short, long, global = true)]
    network: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report the holder's health factor
    Health {
        #[arg(long)]
        holder: Address,
    },
    /// Supply an asset on behalf of the holder
    Supply(AmountArgs),
    /// Borrow an asset on behalf of the holder
    Borrow(AmountArgs),
    /// Repay the holder's debt
    Repay(AmountArgs),
    /// Dry-run an operation without sending anything
    Simulate {
        /// Operation to simulate (supply, borrow, repay)
        #[arg(long, default_value = "borrow")]
        operation: Operation,

        #[command(flatten)]
        args: AmountArgs,
    },
    /// Look up a previously submitted transaction
    Receipt {
        #[arg(long)]
        tx: B256,
    },
}

#[derive(Args, Debug)]
struct AmountArgs {
    /// Position holder
    #[arg(long)]
    holder: Address,

    /// Asset symbol, e.g. USDC
    #[arg(long)]
    asset: String,

    /// Amount in token units
    #[arg(long, allow_negative_numbers = true)]
    amount: f64,

    /// Interest rate mode for borrow/repay (stable, variable)
    #[arg(long)]
    rate_mode: Option<InterestRateMode>,
}

impl AmountArgs {
    fn with_rate_mode(&self, request: ActionRequest) -> ActionRequest {
        match self.rate_mode {
            Some(mode) => request.with_rate_mode(mode),
            None => request,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConciergeConfig::from_file(path)?,
        None => ConciergeConfig::from_env()?,
    };
    let markets = config.markets().context("Invalid concierge configuration")?;
    config.log_config();

    let network = cli.network.clone().unwrap_or_else(|| config.default_network());

    let private_key = std::env::var(env::PRIVATE_KEY)
        .map_err(|_| anyhow::anyhow!("Missing env var: {}", env::PRIVATE_KEY))?;
    let signer = ExecutorSigner::new(&private_key, &markets, config.execution.receipt_poll_interval())
        .context("Failed to initialize executor signer")?;

    let audit: Arc<dyn AuditSink> = match config.audit.endpoint() {
        Some(endpoint) => Arc::new(
            ConsensusLogClient::new(endpoint, config.audit.timeout()).context("Failed to build audit client")?,
        ),
        None => {
            warn!("No audit endpoint configured; audit records will be skipped");
            Arc::new(ConsensusLogClient::disabled())
        }
    };

    let reader = Arc::new(PoolReader::new(markets.clone()));
    let concierge = Concierge::new(
        markets,
        config.policy.clone(),
        &config.execution,
        Collaborators {
            reader,
            submitter: Arc::new(signer),
            audit,
        },
    )
    .context("Failed to build concierge")?;

    let output = run(&concierge, cli.command, &network).await;

    if !concierge.shutdown(AUDIT_DRAIN_TIMEOUT).await {
        warn!(abandoned = concierge.audit().in_flight(), "Exiting with audit submissions in flight");
    }

    let (json, outcome) = output?;
    println!("{json}");
    if outcome == Some(Outcome::Error) {
        std::process::exit(2);
    }
    Ok(())
}

/// Run one command. Returns the JSON to print and, for actions, the outcome.
async fn run(concierge: &Concierge, command: Command, network: &str) -> Result<(String, Option<Outcome>)> {
    let request = match command {
        Command::Health { holder } => {
            let report = concierge.check_health(holder, network).await?;
            return Ok((serde_json::to_string_pretty(&report)?, None));
        }
        Command::Receipt { tx } => {
            let status = concierge.receipt_status(network, tx).await?;
            let json = match status {
                Some(receipt) => serde_json::to_string_pretty(&receipt)?,
                None => serde_json::json!({ "tx_hash": tx, "status": "pending" }).to_string(),
            };
            return Ok((json, None));
        }
        Command::Supply(args) => ActionRequest::supply(args.holder, &args.asset, args.amount, network),
        Command::Borrow(args) => {
            args.with_rate_mode(ActionRequest::borrow(args.holder, &args.asset, args.amount, network))
        }
        Command::Repay(args) => {
            args.with_rate_mode(ActionRequest::repay(args.holder, &args.asset, args.amount, network))
        }
        Command::Simulate { operation, args } => args.with_rate_mode(ActionRequest::simulate(
            operation,
            args.holder,
            &args.asset,
            args.amount,
            network,
        )),
    };

    info!(action = %request.kind(), asset = request.asset(), amount = request.amount(), "Handling request");
    let result = concierge.execute(request).await?;
    Ok((serde_json::to_string_pretty(&result)?, Some(result.outcome)))
}

/// Install the tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,concierge_core=debug,concierge_chain=debug"));

    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "concierge",
            "--network",
            "base-sepolia",
            "simulate",
            "--operation",
            "repay",
            "--holder",
            "0x4242424242424242424242424242424242424242",
            "--asset",
            "USDC",
            "--amount",
            "25.5",
            "--rate-mode",
            "variable",
        ])
        .unwrap();
        assert_eq!(cli.network.as_deref(), Some("base-sepolia"));
        match cli.command {
            Command::Simulate { operation, args } => {
                assert_eq!(operation, Operation::Repay);
                assert_eq!(args.amount, 25.5);
                assert_eq!(args.rate_mode, Some(InterestRateMode::Variable));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_negative_amount_reaches_the_evaluator() {
        let cli = Cli::try_parse_from([
            "concierge",
            "borrow",
            "--holder",
            "0x4242424242424242424242424242424242424242",
            "--asset",
            "USDC",
            "--amount",
            "-5",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Borrow(AmountArgs { amount, .. }) if amount == -5.0));
    }
}
