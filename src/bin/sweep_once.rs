use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use blogdesk::collection::CollectionClient;
use blogdesk::config;
use blogdesk::sweeper;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Publish every scheduled article that is due, print the report and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Sweep as if it were this instant (RFC 3339) instead of now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let remote = CollectionClient::new(cfg.backend.api_key.clone(), &cfg.backend.base_url)?;

    let now = args.at.unwrap_or_else(Utc::now);
    info!(%now, "starting sweep");
    let report = sweeper::sweep(&remote, &cfg.backend.collections.articles, now).await?;
    info!(
        published = report.articles.len(),
        skipped = report.skipped,
        failed = report.failed,
        malformed = report.malformed,
        "{}",
        report.message()
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed > 0 || report.malformed > 0 {
        std::process::exit(2);
    }
    Ok(())
}
