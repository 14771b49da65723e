use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Instrument;

use deskhand::compute::{HttpComputeClient, WorkstationProvisioner};
use deskhand::config::DeskhandConfig;
use deskhand::identity::SimulatedDirectory;
use deskhand::metrics::MetricsTracker;
use deskhand::notify::Mailer;
use deskhand::runner::{JobRunner, RunLock, RunSummary};
use deskhand::store::{PgEmployeeStore, RecordStore};
use deskhand::telemetry::{create_run_span, init_telemetry};

#[derive(Parser)]
#[command(name = "deskhand")]
#[command(about = "HR workstation lifecycle automation")]
#[command(
    long_about = "Deskhand moves employee records through their provisioning lifecycle: \
                  'deskhand onboard' turns NEW records into ACTIVE ones with a workstation, \
                  account groups and a welcome mail; 'deskhand offboard' deprovisions \
                  INACTIVE records. The HR portal triggers both with no further arguments."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision workstations and accounts for all NEW employees
    Onboard,
    /// Deprovision all INACTIVE employees that still hold access
    Offboard,
    /// Show how many records are waiting for each workflow
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            tokio::runtime::Runtime::new()?.block_on(async { onboard_command().await })
        }
        Commands::Offboard => {
            tokio::runtime::Runtime::new()?.block_on(async { offboard_command().await })
        }
        Commands::Status => {
            tokio::runtime::Runtime::new()?.block_on(async { status_command().await })
        }
    }
}

/// Shared startup: .env, config (missing database credentials abort here,
/// before any record is touched), logging.
fn startup() -> Result<DeskhandConfig> {
    DeskhandConfig::load_env_file();
    let config = DeskhandConfig::load()?;
    init_telemetry(&config.observability)?;
    Ok(config)
}

async fn onboard_command() -> Result<()> {
    let config = startup()?;
    println!("=== Onboarding run started ===");

    let _lock = RunLock::acquire(&config.runner.lock_path)?;
    let store = PgEmployeeStore::connect(&config.database).await?;

    // Per-run collaborators; nothing here survives the invocation.
    let compute = HttpComputeClient::new(&config.compute)?;
    let provisioner = WorkstationProvisioner::new(&compute, &config.compute);
    let directory = SimulatedDirectory;
    let mailer = Mailer::from_config(&config.smtp)?;
    let metrics = MetricsTracker::new(&config.observability.metrics_dir);

    let runner = JobRunner::new(
        &store,
        &provisioner,
        &directory,
        &mailer,
        &config.runner,
        &metrics,
    );
    let summary = runner
        .run_onboarding()
        .instrument(create_run_span("onboarding"))
        .await?;

    print_summary(&summary, "onboard");
    store.shutdown().await;
    Ok(())
}

async fn offboard_command() -> Result<()> {
    let config = startup()?;
    println!("=== Offboarding run started ===");

    let _lock = RunLock::acquire(&config.runner.lock_path)?;
    let store = PgEmployeeStore::connect(&config.database).await?;

    let compute = HttpComputeClient::new(&config.compute)?;
    let provisioner = WorkstationProvisioner::new(&compute, &config.compute);
    let directory = SimulatedDirectory;
    let mailer = Mailer::from_config(&config.smtp)?;
    let metrics = MetricsTracker::new(&config.observability.metrics_dir);

    let runner = JobRunner::new(
        &store,
        &provisioner,
        &directory,
        &mailer,
        &config.runner,
        &metrics,
    );
    let summary = runner
        .run_offboarding()
        .instrument(create_run_span("offboarding"))
        .await?;

    print_summary(&summary, "offboard");
    store.shutdown().await;
    Ok(())
}

async fn status_command() -> Result<()> {
    let config = startup()?;
    let store = PgEmployeeStore::connect(&config.database).await?;

    let counts = store.counts().await?;
    println!("Employee records");
    println!("  awaiting onboarding:  {}", counts.awaiting_onboarding);
    println!("  awaiting offboarding: {}", counts.awaiting_offboarding);
    println!("  active:               {}", counts.active);
    println!("  total:                {}", counts.total);

    store.shutdown().await;
    Ok(())
}

fn print_summary(summary: &RunSummary, verb: &str) {
    if summary.is_empty() {
        println!("No employees to {verb}.");
    } else {
        println!(
            "Processed {} employee(s): {} succeeded, {} failed, {} skipped.",
            summary.outcomes.len(),
            summary.success,
            summary.failure,
            summary.skipped
        );
    }
    println!("=== Run finished ===");
}
