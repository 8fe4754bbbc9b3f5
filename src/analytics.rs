//! Stateful aggregation of normalized position events.
//!
//! Consumes events in ascending block order, bounded by the ingestion
//! cursor, and folds them into account, opening-position and closed-position
//! documents. The fold itself is pure (`fold_increase` / `fold_decrease`);
//! the worker is an IO shell that loads the touched documents, folds, and
//! writes back only the fields this worker owns.

use anyhow::Result;
use chrono::Utc;
use mongodb::bson::{Bson, Document};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::models::{position_side, Account, ClosedPosition, OpeningPosition, PositionLog};
use crate::store::{Store, ANALYTICS_CURSOR, INGEST_CURSOR};

/// Blocks folded per batch.
const BATCH_BLOCKS: i64 = 1000;

/// Order type emitted for liquidations.
const LIQUIDATION_ORDER_TYPE: i64 = 7;

#[derive(Debug, Clone)]
pub struct IncreaseEvent {
    pub position_key: String,
    pub account: String,
    pub asset: String,
    pub is_long: bool,
    pub size_delta_usd: f64,
    pub collateral_delta: f64,
    pub size_in_usd: f64,
    pub execution_price: f64,
    pub timestamp: i64,
    pub transaction_hash: String,
}

#[derive(Debug, Clone)]
pub struct DecreaseEvent {
    pub position_key: String,
    pub account: String,
    pub asset: String,
    pub is_long: bool,
    /// Absent when the emitter collapses a full close into post-state only.
    pub size_delta_usd: Option<f64>,
    pub size_in_usd: f64,
    pub execution_price: f64,
    pub base_pnl_usd: f64,
    pub order_type: Option<i64>,
    pub timestamp: i64,
    pub transaction_hash: String,
}

impl IncreaseEvent {
    pub fn from_doc(doc: &Document) -> Option<Self> {
        Some(Self {
            position_key: doc.get_str("positionKey").ok()?.to_string(),
            account: doc.get_str("account").ok()?.to_string(),
            asset: doc.get_str("indexTokenName").ok()?.to_string(),
            is_long: doc.get_bool("isLong").ok()?,
            size_delta_usd: num_f64(doc, "sizeDeltaUsd")?,
            collateral_delta: num_f64(doc, "collateralDeltaAmount")?,
            size_in_usd: num_f64(doc, "sizeInUsd")?,
            execution_price: num_f64(doc, "executionPrice")?,
            timestamp: num_i64(doc, "timestamp")?,
            transaction_hash: doc.get_str("transactionHash").ok()?.to_string(),
        })
    }
}

impl DecreaseEvent {
    pub fn from_doc(doc: &Document) -> Option<Self> {
        Some(Self {
            position_key: doc.get_str("positionKey").ok()?.to_string(),
            account: doc.get_str("account").ok()?.to_string(),
            asset: doc.get_str("indexTokenName").ok()?.to_string(),
            is_long: doc.get_bool("isLong").ok()?,
            size_delta_usd: num_f64(doc, "sizeDeltaUsd"),
            size_in_usd: num_f64(doc, "sizeInUsd")?,
            execution_price: num_f64(doc, "executionPrice")?,
            base_pnl_usd: num_f64(doc, "basePnlUsd")?,
            order_type: num_i64(doc, "orderType"),
            timestamp: num_i64(doc, "timestamp")?,
            transaction_hash: doc.get_str("transactionHash").ok()?.to_string(),
        })
    }
}

/// Numeric field as f64; degraded documents hold strings here and yield None.
fn num_f64(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Bson::Double(value) => Some(*value),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Int32(value) => Some(*value as f64),
        _ => None,
    }
}

fn num_i64(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int64(value) => Some(*value),
        Bson::Int32(value) => Some(*value as i64),
        Bson::Double(value) => Some(*value as i64),
        _ => None,
    }
}

/// Leverage shown on an Open log, rounded up to one decimal.
pub fn open_leverage(size_delta_usd: f64, collateral_delta: f64) -> f64 {
    if collateral_delta > 0.0 {
        (size_delta_usd / collateral_delta * 10.0).ceil() / 10.0
    } else {
        0.0
    }
}

/// Integer percentage of the pre-close size removed by this decrease.
pub fn percentage_closed(size_delta_usd: f64, size_after: f64) -> i64 {
    if size_delta_usd <= 0.0 && size_after <= 0.0 {
        100
    } else {
        (size_delta_usd / (size_delta_usd + size_after) * 100.0).round() as i64
    }
}

/// Folds a PositionIncrease into the owner account and opening position.
pub fn fold_increase(
    ev: &IncreaseEvent,
    account: Option<Account>,
    position: Option<OpeningPosition>,
) -> (Account, OpeningPosition) {
    let mut account = account.unwrap_or_else(|| Account::new(&ev.account));
    if !account.position_keys.contains(&ev.position_key) {
        account.position_keys.push(ev.position_key.clone());
    }
    account.collateral_usd += ev.collateral_delta;

    let log = PositionLog {
        timestamp: ev.timestamp,
        action: "Open".to_string(),
        collateral_usd: Some(ev.collateral_delta),
        leverage: Some(open_leverage(ev.size_delta_usd, ev.collateral_delta)),
        realized_pnl: None,
        size_usd: ev.size_delta_usd,
        percentage_closed: None,
        price: ev.execution_price,
        transaction_hash: ev.transaction_hash.clone(),
    };

    let position = match position {
        Some(mut position) => {
            let prior_size = position.size_usd;
            let denominator = prior_size + ev.size_delta_usd;
            if denominator > 0.0 {
                position.entry_price = (position.entry_price * prior_size
                    + ev.execution_price * ev.size_delta_usd)
                    / denominator;
            } else {
                position.entry_price = ev.execution_price;
            }
            // The event's sizeInUsd is the authoritative post-state.
            position.size_usd = ev.size_in_usd;
            position.logs.push(log);
            position
        }
        None => OpeningPosition {
            id: ev.position_key.clone(),
            position_key: ev.position_key.clone(),
            owner_account: ev.account.clone(),
            asset: ev.asset.clone(),
            side: position_side(ev.is_long).to_string(),
            size_usd: ev.size_in_usd,
            entry_price: ev.execution_price,
            unrealized_pnl: 0.0,
            first_opened_at: None,
            logs: vec![log],
        },
    };

    (account, position)
}

/// What happens to the opening position after a decrease.
#[derive(Debug)]
pub enum OpeningOutcome {
    /// Partially closed, or re-opened by a decrease against a missing doc.
    Keep(OpeningPosition),
    /// Fully closed; the opening document is removed and its logs have been
    /// merged into the closed position.
    Delete,
    /// Fully closed with no opening document on record.
    Absent,
}

#[derive(Debug)]
pub struct DecreaseFold {
    pub account: Account,
    pub closed: ClosedPosition,
    pub opening: OpeningOutcome,
}

/// Folds a PositionDecrease into the account, the closed position, and the
/// opening position's fate.
pub fn fold_decrease(
    ev: &DecreaseEvent,
    account: Option<Account>,
    opening: Option<OpeningPosition>,
    closed: Option<ClosedPosition>,
) -> DecreaseFold {
    let (size_delta, size_after) = match ev.size_delta_usd {
        Some(delta) => (delta, ev.size_in_usd),
        // No delta: the event is a full close of the remaining size.
        None => (ev.size_in_usd, 0.0),
    };

    let mut account = account.unwrap_or_else(|| Account::new(&ev.account));
    if !account.position_keys.contains(&ev.position_key) {
        account.position_keys.push(ev.position_key.clone());
    }
    account.realized_pnl += ev.base_pnl_usd;
    account.closed_position_count += 1;
    if ev.base_pnl_usd > 0.0 {
        account.profited_position_count += 1;
    }

    let action = if ev.order_type == Some(LIQUIDATION_ORDER_TYPE) {
        "Liquidate"
    } else {
        "Close"
    };
    let log = PositionLog {
        timestamp: ev.timestamp,
        action: action.to_string(),
        collateral_usd: None,
        leverage: None,
        realized_pnl: Some(ev.base_pnl_usd),
        size_usd: size_delta,
        percentage_closed: Some(percentage_closed(size_delta, size_after)),
        price: ev.execution_price,
        transaction_hash: ev.transaction_hash.clone(),
    };

    let mut closed = match closed {
        Some(mut closed) => {
            closed.realized_pnl += ev.base_pnl_usd;
            closed.logs.push(log);
            closed
        }
        None => ClosedPosition {
            id: ev.position_key.clone(),
            position_key: ev.position_key.clone(),
            owner_account: ev.account.clone(),
            asset: ev.asset.clone(),
            side: position_side(ev.is_long).to_string(),
            realized_pnl: ev.base_pnl_usd,
            last_closed_at: None,
            logs: vec![log],
        },
    };

    let opening = if size_after > 0.0 {
        match opening {
            Some(mut position) => {
                position.size_usd = size_after;
                OpeningOutcome::Keep(position)
            }
            // Decrease against a key with no opening doc: re-open with the
            // remaining size at the event price.
            None => OpeningOutcome::Keep(OpeningPosition {
                id: ev.position_key.clone(),
                position_key: ev.position_key.clone(),
                owner_account: ev.account.clone(),
                asset: ev.asset.clone(),
                side: position_side(ev.is_long).to_string(),
                size_usd: size_after,
                entry_price: ev.execution_price,
                unrealized_pnl: 0.0,
                first_opened_at: None,
                logs: Vec::new(),
            }),
        }
    } else {
        match opening {
            Some(position) => {
                // Migrate the open history into the closed document, newest
                // first.
                let mut merged = position.logs;
                merged.append(&mut closed.logs);
                merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                closed.logs = merged;
                OpeningOutcome::Delete
            }
            None => OpeningOutcome::Absent,
        }
    };

    DecreaseFold {
        account,
        closed,
        opening,
    }
}

pub async fn run(store: Store, interval: u64) -> Result<()> {
    loop {
        match tick(&store).await {
            Ok(true) => {}
            Ok(false) => {
                info!(interval, "nothing to sync, sleeping");
                sleep(Duration::from_secs(interval)).await;
            }
            Err(e) => {
                warn!(error = %e, "analytics tick failed, retrying");
                sleep(Duration::from_secs(interval)).await;
            }
        }
    }
}

/// Folds one batch. Returns false when the next full batch is not yet
/// ingested.
async fn tick(store: &Store) -> Result<bool> {
    let last_ingested = store.cursor(INGEST_CURSOR).await?.unwrap_or(0);
    let last_analyzed = store.cursor(ANALYTICS_CURSOR).await?.unwrap_or(-1);

    let start_block = last_analyzed + 1;
    let end_block = start_block + BATCH_BLOCKS - 1;
    if end_block > last_ingested {
        return Ok(false);
    }

    let started = Utc::now();
    let events = store.events_in_range(start_block, end_block).await?;
    for doc in &events {
        apply_event(store, doc).await?;
    }
    store.set_cursor(ANALYTICS_CURSOR, end_block).await?;

    info!(
        from = start_block,
        to = end_block,
        events = events.len(),
        elapsed_ms = (Utc::now() - started).num_milliseconds(),
        "analytics batch done"
    );
    Ok(true)
}

async fn apply_event(store: &Store, doc: &Document) -> Result<()> {
    match doc.get_str("eventName").ok() {
        Some("PositionIncrease") => {
            let Some(ev) = IncreaseEvent::from_doc(doc) else {
                warn!(
                    tx = doc.get_str("transactionHash").unwrap_or_default(),
                    "skipping increase with missing or degraded fields"
                );
                return Ok(());
            };

            let account = store.find_account(&ev.account).await?;
            let position = store.find_opening(&ev.position_key).await?;
            let account_existed = account.is_some();
            let position_existed = position.is_some();

            let (account, position) = fold_increase(&ev, account, position);
            if account_existed {
                store.save_account_stats(&account).await?;
            } else {
                store.insert_account(&account).await?;
            }
            if position_existed {
                store.save_opening_state(&position).await?;
            } else {
                store.insert_opening(&position).await?;
            }
        }
        Some("PositionDecrease") => {
            if !doc.contains_key("account") {
                return Ok(());
            }
            let Some(ev) = DecreaseEvent::from_doc(doc) else {
                warn!(
                    tx = doc.get_str("transactionHash").unwrap_or_default(),
                    "skipping decrease with missing or degraded fields"
                );
                return Ok(());
            };

            let account = store.find_account(&ev.account).await?;
            let opening = store.find_opening(&ev.position_key).await?;
            let closed = store.find_closed(&ev.position_key).await?;
            let account_existed = account.is_some();
            let opening_existed = opening.is_some();
            let closed_existed = closed.is_some();

            let fold = fold_decrease(&ev, account, opening, closed);
            if account_existed {
                store.save_account_stats(&fold.account).await?;
            } else {
                store.insert_account(&fold.account).await?;
            }
            if closed_existed {
                store.save_closed_state(&fold.closed).await?;
            } else {
                store.insert_closed(&fold.closed).await?;
            }
            match fold.opening {
                OpeningOutcome::Keep(position) => {
                    if opening_existed {
                        store.save_opening_state(&position).await?;
                    } else {
                        store.insert_opening(&position).await?;
                    }
                }
                OpeningOutcome::Delete => {
                    // The merged logs were already written with the closed
                    // position above; only the open doc remains to retire.
                    store.delete_opening(&ev.position_key).await?;
                }
                OpeningOutcome::Absent => {}
            }
        }
        _ => {}
    }
    Ok(())
}
