use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use mediagate_core::GuardConfig;
use mediagate_simulation::{BlocklistKind, LedgerKind, SimulationOptions, run_scenario};

/// Run the mediagate deferred-download scenario end to end.
#[derive(Parser, Debug)]
#[command(name = "mediagate-simulation", about = "End-to-end mediagate simulation")]
struct Cli {
    /// Path to a TOML guard configuration. Without one, a schedule
    /// compressed to seconds is used.
    #[arg(short, long, env = "MEDIAGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Use a SQLite ledger at this URL instead of the in-memory one.
    #[arg(long)]
    sqlite: Option<String>,

    /// Use a DynamoDB blocklist at this endpoint (e.g. DynamoDB Local).
    /// Requires the `dynamodb` feature.
    #[arg(long)]
    dynamodb_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut options = match &cli.config {
        Some(path) => SimulationOptions::with_config(GuardConfig::load(path)?),
        None => SimulationOptions::quick(),
    };
    if let Some(url) = cli.sqlite {
        options.ledger = LedgerKind::Sqlite(url);
    }
    if let Some(endpoint) = cli.dynamodb_endpoint {
        options.blocklist = dynamodb_blocklist(endpoint)?;
    }

    let report = run_scenario(options).await?;
    info!(
        decision = ?report.decision,
        released = report.released,
        similar = report.similar_sightings,
        pruned = report.pruned,
        "simulation finished"
    );
    info!(metrics = ?report.metrics, "final counters");

    if !report.released {
        return Err("deferred download was not released".into());
    }
    Ok(())
}

#[cfg(feature = "dynamodb")]
fn dynamodb_blocklist(endpoint: String) -> Result<BlocklistKind, Box<dyn std::error::Error>> {
    Ok(BlocklistKind::DynamoDb(
        mediagate_blocklist_dynamodb::DynamoConfig {
            endpoint_url: Some(endpoint),
            ..Default::default()
        },
    ))
}

#[cfg(not(feature = "dynamodb"))]
fn dynamodb_blocklist(_endpoint: String) -> Result<BlocklistKind, Box<dyn std::error::Error>> {
    Err("built without the `dynamodb` feature".into())
}
