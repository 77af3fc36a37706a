use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ra_cockpit_sync::cockpit::CockpitClient;
use ra_cockpit_sync::config::SyncConfig;
use ra_cockpit_sync::ra::RaClient;
use ra_cockpit_sync::sync::{run_sync, FailurePolicy, SyncOptions, SyncReport};

#[derive(Parser, Debug)]
#[command(
    name = "ra-cockpit-sync",
    about = "Sync Resident Advisor promoter events into a Cockpit collection",
    version
)]
struct Cli {
    /// RA promoter whose events are synced
    #[arg(long, env = "RA_PROMOTER_ID")]
    promoter_id: String,

    /// Base URL of the Cockpit API
    #[arg(long, env = "COCKPIT_API_URL")]
    cockpit_url: String,

    /// Cockpit API key
    #[arg(long, env = "COCKPIT_API_KEY", hide_env_values = true)]
    cockpit_api_key: String,

    /// Compute the diff but write nothing to Cockpit
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Fail the run when a list fetch fails instead of continuing with an
    /// empty list
    #[arg(long)]
    strict: bool,

    /// Maximum number of events requested from the promoter list query
    #[arg(long, env = "RA_EVENT_LIMIT", default_value_t = 100)]
    limit: u32,

    /// Maximum in-flight requests per remote service (1 = one at a time)
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig {
        promoter_id: cli.promoter_id,
        cockpit_url: cli.cockpit_url,
        cockpit_api_key: cli.cockpit_api_key,
        dry_run: cli.dry_run,
        strict: cli.strict,
        list_limit: cli.limit,
        concurrency: cli.concurrency,
    };
    config.validate().context("invalid configuration")?;

    let source = RaClient::new(config.list_limit, config.concurrency);
    let store = CockpitClient::new(&config.cockpit_url, &config.cockpit_api_key, config.concurrency);
    let options = SyncOptions {
        promoter_id: config.promoter_id.clone(),
        dry_run: config.dry_run,
        on_fetch_failure: if config.strict {
            FailurePolicy::Abort
        } else {
            FailurePolicy::TreatAsEmpty
        },
    };

    info!("starting ra -> cockpit sync");
    let report = run_sync(&source, &store, &options).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("---");
    println!("comparison result:");
    println!("  events from ra:    {}", report.source_count);
    println!("  events in cockpit: {}", report.dest_count);
    println!("  new events:        {}", report.new_count);
    if report.dry_run {
        println!("dry run: nothing was sent to cockpit.");
        if !report.new_events.is_empty() {
            println!("the following events would be added:");
            for event in &report.new_events {
                println!(
                    "  - {} ({})",
                    event.title,
                    event.date.as_deref().unwrap_or("no date")
                );
            }
        }
    } else {
        println!("  added: {}, failed: {}", report.added, report.failed);
    }
    println!("sync finished.");
}
