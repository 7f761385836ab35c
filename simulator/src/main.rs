//! Passbook Simulator
//!
//! Drives the ledger service with scripted scenarios or a concurrent
//! random workload, then settles and audits the result.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bank;
mod scenario;
mod controller;
mod metrics;

use controller::SimulationController;
use passbook_service::ServiceConfig;
use scenario::Scenario;

/// Passbook Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Passbook ledger scenario and workload simulator")]
struct Args {
    /// Number of simulated banks to create
    #[arg(short, long, default_value = "3")]
    banks: usize,

    /// Number of simulated customers
    #[arg(short, long, default_value = "4")]
    users: usize,

    /// Accounts opened per customer before the workload
    #[arg(long, default_value = "2")]
    accounts_per_user: usize,

    /// Workload operations to run
    #[arg(short, long, default_value = "200")]
    operations: usize,

    /// Concurrent workload tasks
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Scenario to run instead of the workload (built-in name or JSON file)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit JSON logs and print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(
            args.json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!args.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    info!("Starting Passbook Simulator");
    info!("Banks: {}, customers: {}", args.banks, args.users);

    let mut controller = SimulationController::new(config, args.banks, args.users, args.seed);
    controller.initialize().await?;

    if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        controller.open_accounts(args.accounts_per_user).await?;
        controller
            .run_workload(args.operations, args.concurrency)
            .await?;
    }

    let report = controller.finish().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let sim = &report.simulation;
        info!("Simulation complete");
        info!("Operations: {}", sim.total_operations);
        info!("Successful: {}", sim.successful_operations);
        info!("Failed: {} {:?}", sim.failed_operations, sim.failures_by_code);
        info!("Success rate: {:.1}%", sim.success_rate() * 100.0);
        info!(
            "Latency avg/p50/p99: {}/{}/{}us",
            sim.average_latency_us(),
            sim.p50_latency_us(),
            sim.p99_latency_us()
        );
        info!(
            "Settlement: {} instructions, gross {} net {}",
            report.settlement.instructions.len(),
            report.settlement.gross_volume,
            report.settlement.net_volume
        );
        info!(
            "Integrity: {} accounts, {} users, {} violations",
            report.integrity.accounts_checked,
            report.integrity.users_checked,
            report.integrity.violations.len()
        );
    }

    if !report.integrity.is_clean() {
        error!(violations = ?report.integrity.violations, "Ledger failed its integrity audit");
        anyhow::bail!("ledger integrity audit found {} violations", report.integrity.violations.len());
    }

    Ok(())
}
