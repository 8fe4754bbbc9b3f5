//! Analytics worker: folds normalized events into account and position
//! documents.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::info;

use gmx_perp_tracker::analytics;
use gmx_perp_tracker::store::{Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "gmx-analytics")]
#[command(about = "Fold position events into account and position analytics")]
struct Args {
    /// MongoDB connection URI
    #[arg(long)]
    uri: String,

    /// Database name
    #[arg(long)]
    db: String,

    #[arg(long, default_value = "configs")]
    configs: String,

    #[arg(long, default_value = "gmx_events")]
    events: String,

    #[arg(long, default_value = "gmx_accounts")]
    accounts: String,

    #[arg(long, default_value = "gmx_opening_positions")]
    opening: String,

    #[arg(long, default_value = "gmx_closed_positions")]
    closed: String,

    /// Seconds to sleep when no full batch is available
    #[arg(long, default_value = "10")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut store_cfg = StoreConfig::new(&args.uri, &args.db);
    store_cfg.configs = args.configs;
    store_cfg.events = args.events;
    store_cfg.accounts = args.accounts;
    store_cfg.opening = args.opening;
    store_cfg.closed = args.closed;
    let store = Store::connect(&store_cfg).await?;

    tokio::select! {
        result = analytics::run(store, args.interval) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gmx_analytics=info,gmx_perp_tracker=info".into()),
        )
        .init();
}
