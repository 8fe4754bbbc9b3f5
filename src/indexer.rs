//! Log ingestion worker.
//!
//! Tails the emitter contract from the persisted high-water mark: pick a
//! window sized by how far behind the chain head we are, fetch the logs in
//! fixed sub-chunks, decode and normalize each position event, upsert by
//! transaction hash, then advance the cursor to the window end. Any RPC or
//! store error abandons the tick without advancing the cursor, so every
//! window is replayable.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::chain::abi::EmitterAbi;
use crate::chain::decode::{self, PositionEvent};
use crate::chain::rpc::EthRpc;
use crate::chain::EVENT_SIGNATURE;
use crate::metadata::TokenMetadataCache;
use crate::models::{Market, TokenInfo};
use crate::normalize::normalize_event;
use crate::store::{Store, INGEST_CURSOR};

/// Largest window processed per tick while catching up.
const CATCHUP_WINDOW: u64 = 10_000;
/// Window size once the cursor is near the chain head.
const REALTIME_WINDOW: u64 = 10;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub emitter: String,
    pub realtime_wait: f64,
    pub catchup_wait: f64,
    pub realtime_threshold: u64,
}

enum TickOutcome {
    Idle,
    Processed { end_block: i64, catch_up: bool },
}

pub async fn run(
    store: Store,
    rpc: EthRpc,
    emitter_abi: EmitterAbi,
    cfg: IndexerConfig,
) -> Result<()> {
    let cache = TokenMetadataCache::new(rpc.clone());

    // Seeding the initial cursor is a deployment contract; the indexer never
    // invents a starting block.
    let mut last_ingested = store.cursor(INGEST_CURSOR).await?.ok_or_else(|| {
        anyhow!(
            "missing initial cursor document {:?} in configs collection",
            INGEST_CURSOR
        )
    })?;
    info!(block = last_ingested, "indexer starting from persisted cursor");

    loop {
        match tick(&store, &rpc, &emitter_abi, &cache, &cfg, last_ingested).await {
            Ok(TickOutcome::Idle) => {
                sleep(Duration::from_secs_f64(cfg.realtime_wait)).await;
            }
            Ok(TickOutcome::Processed {
                end_block,
                catch_up,
            }) => {
                last_ingested = end_block;
                let wait = if catch_up {
                    cfg.catchup_wait
                } else {
                    cfg.realtime_wait
                };
                sleep(Duration::from_secs_f64(wait)).await;
            }
            Err(e) => {
                warn!(error = %e, "indexer tick failed, retrying");
                sleep(Duration::from_secs_f64(cfg.realtime_wait)).await;
            }
        }
    }
}

async fn tick(
    store: &Store,
    rpc: &EthRpc,
    emitter_abi: &EmitterAbi,
    cache: &TokenMetadataCache,
    cfg: &IndexerConfig,
    last_ingested: i64,
) -> Result<TickOutcome> {
    let head = rpc.block_number().await? as i64;
    let blocks_behind = head - last_ingested;
    if blocks_behind <= 0 {
        return Ok(TickOutcome::Idle);
    }

    let catch_up = blocks_behind > cfg.realtime_threshold as i64;
    let window = if catch_up {
        CATCHUP_WINDOW.min(blocks_behind as u64)
    } else {
        REALTIME_WINDOW.min(blocks_behind as u64)
    };
    let from_block = (last_ingested + 1) as u64;
    let to_block = from_block + window - 1;
    info!(
        from = from_block,
        to = to_block,
        behind = blocks_behind,
        mode = if catch_up { "catch-up" } else { "real-time" },
        "processing window"
    );

    let logs = rpc
        .get_logs(&cfg.emitter, EVENT_SIGNATURE, from_block, to_block)
        .await?;

    let mut persisted = 0usize;
    for log in &logs {
        let event = match decode::decode_log(emitter_abi, log) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping undecodable log");
                continue;
            }
        };

        let (market, collateral) = resolve_references(store, cache, &event).await?;
        let doc = normalize_event(&event, market.as_ref(), collateral.as_ref());
        store.upsert_event(doc).await?;
        persisted += 1;
    }
    if persisted > 0 {
        info!(count = persisted, "persisted position events");
    }

    store.set_cursor(INGEST_CURSOR, to_block as i64).await?;
    Ok(TickOutcome::Processed {
        end_block: to_block as i64,
        catch_up,
    })
}

/// Resolves the event's market and collateral token. A market that is not
/// seeded degrades the event; store errors propagate and abort the tick.
async fn resolve_references(
    store: &Store,
    cache: &TokenMetadataCache,
    event: &PositionEvent,
) -> Result<(Option<Market>, Option<TokenInfo>)> {
    let market = match event.field_str("market") {
        Some(address) => {
            let market = store.find_market(address).await?;
            if market.is_none() {
                warn!(market = address, tx = %event.transaction_hash, "market not seeded, persisting raw event");
            }
            market
        }
        None => None,
    };

    let collateral = if market.is_some() {
        match event.field_str("collateralToken") {
            Some(address) => Some(cache.lookup(store, address).await?),
            None => None,
        }
    } else {
        None
    };

    Ok((market, collateral))
}
