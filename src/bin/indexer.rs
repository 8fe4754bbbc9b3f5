//! Log ingestion worker: tails EventLog1 from the emitter contract into the
//! normalized events collection.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use tracing::info;

use gmx_perp_tracker::chain::abi::EmitterAbi;
use gmx_perp_tracker::chain::rpc::EthRpc;
use gmx_perp_tracker::chain::{DEFAULT_EMITTER, DEFAULT_RPC_URL};
use gmx_perp_tracker::indexer::{self, IndexerConfig};
use gmx_perp_tracker::store::{Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "gmx-indexer")]
#[command(about = "Tail EventLog1 position events into the document store")]
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

    #[arg(long, default_value = "gmx_market")]
    markets: String,

    #[arg(long, default_value = "token_info")]
    tokens: String,

    /// JSON-RPC endpoint
    #[arg(long, default_value = DEFAULT_RPC_URL)]
    rpc: String,

    /// Event emitter contract address
    #[arg(long, default_value = DEFAULT_EMITTER)]
    emitter: String,

    /// Path to the emitter's EventLog1 ABI
    #[arg(long, default_value = "abi_emitter.json")]
    abi: PathBuf,

    /// Seconds to wait between checks in real-time mode
    #[arg(long, default_value = "0.5")]
    realtime_wait: f64,

    /// Seconds to wait between chunks when catching up
    #[arg(long, default_value = "0.1")]
    catchup_wait: f64,

    /// Blocks-behind threshold separating catch-up from real-time mode
    #[arg(long, default_value = "100")]
    realtime_threshold: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    // Fatal without a parseable ABI; decoding is data-driven off this file.
    let emitter_abi = EmitterAbi::load(&args.abi)?;

    let mut store_cfg = StoreConfig::new(&args.uri, &args.db);
    store_cfg.configs = args.configs;
    store_cfg.events = args.events;
    store_cfg.markets = args.markets;
    store_cfg.tokens = args.tokens;
    let store = Store::connect(&store_cfg).await?;
    let rpc = EthRpc::new(args.rpc)?;

    info!(emitter = %args.emitter, "starting indexer");
    let cfg = IndexerConfig {
        emitter: args.emitter,
        realtime_wait: args.realtime_wait,
        catchup_wait: args.catchup_wait,
        realtime_threshold: args.realtime_threshold,
    };

    tokio::select! {
        result = indexer::run(store, rpc, emitter_abi, cfg) => result,
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
                .unwrap_or_else(|_| "gmx_indexer=info,gmx_perp_tracker=info".into()),
        )
        .init();
}
