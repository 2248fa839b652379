use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ratesreader::config::Settings;
use ratesreader::market_data::router::{Feeds, Section};
use ratesreader::telemetry::{init_metrics, init_tracing};
use tracing::info;

/// Fetch currency rates, order-book depth, wallet balances and scraped pages.
#[derive(Debug, Parser)]
#[command(name = "ratesreader", version)]
struct Cli {
    /// Settings file (defaults to ./ratesreader.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Serve prometheus metrics on this port while running
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Quote feed, exchange feed and converter pages
    Rates,
    /// Top of the order book
    Depth,
    /// Wallet balances and recent transfers
    Wallets,
    /// Configured (url, selector) pages
    Pages,
    /// Everything above
    All,
}

impl From<Command> for Section {
    fn from(command: Command) -> Self {
        match command {
            Command::Rates => Section::Rates,
            Command::Depth => Section::Depth,
            Command::Wallets => Section::Wallets,
            Command::Pages => Section::Pages,
            Command::All => Section::All,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    init_tracing(&settings.log_filter);
    if let Some(port) = cli.metrics_port {
        init_metrics(port).context("starting metrics exporter")?;
    }

    let section = Section::from(cli.command);
    let feeds = Feeds::from_settings(&settings, section).context("building feeds")?;
    info!(?section, "collecting");
    let report = feeds.collect().await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
