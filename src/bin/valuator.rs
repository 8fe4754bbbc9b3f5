//! Valuation worker: re-prices open positions against live oracle tickers
//! and rolls up per-account PNL / ROI.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::info;

use gmx_perp_tracker::store::{Store, StoreConfig};
use gmx_perp_tracker::valuator::{self, TickerClient, DEFAULT_TICKERS_URL};

#[derive(Parser, Debug)]
#[command(name = "gmx-valuator")]
#[command(about = "Recompute unrealized PnL, ROI and profitability per account")]
struct Args {
    /// MongoDB connection URI
    #[arg(long)]
    uri: String,

    /// Database name
    #[arg(long)]
    db: String,

    #[arg(long, default_value = "gmx_accounts")]
    accounts: String,

    #[arg(long, default_value = "gmx_opening_positions")]
    opening: String,

    #[arg(long, default_value = "gmx_closed_positions")]
    closed: String,

    #[arg(long, default_value = "gmx_market")]
    markets: String,

    /// Price ticker endpoint
    #[arg(long, default_value = DEFAULT_TICKERS_URL)]
    tickers: String,

    /// Seconds between valuation ticks
    #[arg(long, default_value = "30")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut store_cfg = StoreConfig::new(&args.uri, &args.db);
    store_cfg.accounts = args.accounts;
    store_cfg.opening = args.opening;
    store_cfg.closed = args.closed;
    store_cfg.markets = args.markets;
    let store = Store::connect(&store_cfg).await?;
    let tickers = TickerClient::new(args.tickers)?;

    tokio::select! {
        result = valuator::run(store, tickers, args.interval) => result,
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
                .unwrap_or_else(|_| "gmx_valuator=info,gmx_perp_tracker=info".into()),
        )
        .init();
}
