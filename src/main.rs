use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use maalerportal_sync::{
    remove_installation, ConfigEntryStore, EnrollmentFlow, Installation, Settings, StatisticsDb,
};
use tracing_subscriber::EnvFilter;

/// Imports Målerportal water meter readings as long-term statistics.
///
/// Paths, gateway URL and timings come from `MAALERPORTAL_*` environment variables.
#[derive(Debug, Parser)]
#[command(name = "maalerportal-sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and choose which meters to track
    Enroll {
        #[arg(long, env = "MAALERPORTAL_EMAIL")]
        email: String,
        #[arg(long, env = "MAALERPORTAL_PASSWORD", hide_env_values = true)]
        password: String,
        /// Address meter id to enroll, repeatable. Lists the available meters when omitted.
        #[arg(long = "meter")]
        meters: Vec<String>,
    },
    /// Poll enrolled meters until interrupted
    Run,
    /// Delete imported statistics and the stored configuration
    Uninstall,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let entries = ConfigEntryStore::new(&settings.config_path);

    match cli.command {
        Command::Enroll {
            email,
            password,
            meters,
        } => enroll(&settings, &entries, &email, &password, &meters).await,
        Command::Run => run(&settings, &entries).await,
        Command::Uninstall => uninstall(&settings, &entries),
    }
}

async fn enroll(
    settings: &Settings,
    entries: &ConfigEntryStore,
    email: &str,
    password: &str,
    meters: &[String],
) -> anyhow::Result<()> {
    let mut flow = EnrollmentFlow::new(settings.base_url.as_str());
    let options = flow
        .submit_credentials(email, password)
        .await
        .map_err(|e| anyhow!("enrollment failed ({}): {e}", e.code()))?;

    if meters.is_empty() {
        println!("Available meters:");
        for option in options {
            println!("  {}  {}", option.key, option.label);
        }
        println!("Re-run with --meter <id> for each meter to track");
        return Ok(());
    }

    let record = flow
        .select_meters(meters)
        .map_err(|e| anyhow!("enrollment failed ({}): {e}", e.code()))?;
    entries.save(&record)?;
    tracing::info!(
        title = record.title(),
        meters = record.meters.len(),
        path = %entries.path().display(),
        "Saved configuration"
    );
    Ok(())
}

async fn run(settings: &Settings, entries: &ConfigEntryStore) -> anyhow::Result<()> {
    let record = entries
        .load()
        .context("no enrolled meters, run `enroll` first")?;
    let store = Arc::new(StatisticsDb::open(&settings.statistics_path)?);

    let mut installation = Installation::setup(&record, &settings.base_url, store, settings.sync);
    installation.start();
    tracing::info!(
        throttle = ?settings.sync.update_throttle,
        recent_guard = ?settings.sync.recent_guard,
        "Polling Målerportal"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    installation.unload();
    Ok(())
}

fn uninstall(settings: &Settings, entries: &ConfigEntryStore) -> anyhow::Result<()> {
    let record = entries.load()?;
    let store = StatisticsDb::open(&settings.statistics_path)?;
    let cleared = remove_installation(&record, &store)?;
    entries.remove()?;
    println!("Removed {} statistic series", cleared.len());
    Ok(())
}
