//! Periodic re-pricing of open positions against live oracle tickers.
//!
//! Each tick: build a price map from the ticker endpoint and the seeded
//! markets, refresh `lastClosedAt` on closed positions, recompute unrealized
//! PnL and `firstOpenedAt` per open position, then roll the per-account
//! aggregates (PNL, ROI, profitableRatio). Everything is an idempotent
//! reprojection, batched into one bulk write per collection.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use mongodb::bson::{doc, Document};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::models::{Account, Market, OpeningPosition};
use crate::store::Store;
use crate::symbols::{strip_synthetic_prefix, synthetic_variants};

pub const DEFAULT_TICKERS_URL: &str = "https://arbitrum-api.gmxinfra.io/prices/tickers";

/// 2025-01-01T00:00:00Z; used when an opening position has no logs yet.
const FIRST_OPENED_FALLBACK: i64 = 1_735_689_600;

#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    #[serde(rename = "tokenSymbol")]
    pub token_symbol: String,
    #[serde(rename = "minPrice")]
    pub min_price: String,
    #[serde(rename = "maxPrice")]
    pub max_price: String,
}

pub struct TickerClient {
    client: Client,
    url: String,
}

impl TickerClient {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    pub async fn fetch(&self) -> Result<Vec<Ticker>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("ticker request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("ticker endpoint returned {}", response.status()));
        }
        response
            .json()
            .await
            .context("failed to parse ticker response")
    }
}

/// Mid prices keyed by plain symbol, rescaled out of the oracle's
/// 10^(30 - decimals) convention. Symbols with no seeded market are dropped.
pub fn build_price_map(tickers: &[Ticker], markets: &[Market]) -> HashMap<String, f64> {
    let mut decimals_by_symbol: HashMap<&str, u32> = HashMap::new();
    for market in markets {
        decimals_by_symbol.insert(strip_synthetic_prefix(&market.name), market.decimals);
    }

    let mut prices = HashMap::new();
    for ticker in tickers {
        let (Ok(min), Ok(max)) = (
            ticker.min_price.parse::<f64>(),
            ticker.max_price.parse::<f64>(),
        ) else {
            continue;
        };
        let Some(&decimals) = decimals_by_symbol.get(ticker.token_symbol.as_str()) else {
            continue;
        };
        let mid = (min + max) / 2.0;
        prices.insert(
            ticker.token_symbol.clone(),
            mid / 10f64.powi(30 - decimals as i32),
        );
    }
    prices
}

pub fn unrealized_pnl(side: &str, size_usd: f64, entry_price: f64, price: f64) -> f64 {
    if side == "Long" {
        size_usd * ((price - entry_price) / entry_price)
    } else {
        size_usd * ((entry_price - price) / entry_price)
    }
}

#[derive(Debug)]
pub struct PositionValuation {
    pub unrealized_pnl: f64,
    pub first_opened_at: i64,
    /// True when the recorded size exceeds the sum of logged sizes; the
    /// owner's ROI is withheld this tick.
    pub suppress_roi: bool,
}

pub fn value_position(position: &OpeningPosition, price: f64) -> PositionValuation {
    let mut logged_size = 0.0;
    let mut first_opened_at = i64::MAX;
    for log in &position.logs {
        logged_size += log.size_usd;
        first_opened_at = first_opened_at.min(log.timestamp);
    }
    if first_opened_at == i64::MAX {
        first_opened_at = FIRST_OPENED_FALLBACK;
    }

    PositionValuation {
        unrealized_pnl: unrealized_pnl(
            &position.side,
            position.size_usd,
            position.entry_price,
            price,
        ),
        first_opened_at,
        suppress_roi: position.size_usd > logged_size,
    }
}

/// Per-account open-position aggregates gathered during a tick.
#[derive(Debug, Default, Clone)]
pub struct OpenTotals {
    pub opening_size_usd: f64,
    pub unrealized_pnl: f64,
    pub opening_position_count: i64,
}

/// The final PNL / ROI / profitableRatio update for one account. Accounts
/// with no open exposure this tick fall back to realized PnL alone.
pub fn finalize_account(account: &Account, has_open: bool, roi_suppressed: bool) -> Document {
    let mut update = Document::new();
    let pnl = if has_open {
        account.realized_pnl + account.unrealized_pnl
    } else {
        update.insert("openingSizeUsd", 0.0);
        update.insert("unrealizedPnl", 0.0);
        update.insert("openingPositionCount", 0i64);
        account.realized_pnl
    };
    update.insert("PNL", pnl);

    if account.closed_position_count > 0 {
        update.insert(
            "profitableRatio",
            account.profited_position_count as f64 / account.closed_position_count as f64,
        );
    }
    if account.collateral_usd > 0.0 && !roi_suppressed {
        update.insert("ROI", pnl / account.collateral_usd * 100.0);
    }
    update
}

pub async fn run(store: Store, tickers: TickerClient, interval: u64) -> Result<()> {
    loop {
        if let Err(e) = tick(&store, &tickers).await {
            warn!(error = %e, "valuation tick failed");
        }
        sleep(Duration::from_secs(interval)).await;
    }
}

async fn tick(store: &Store, tickers: &TickerClient) -> Result<()> {
    let ticks = tickers.fetch().await?;
    let names: Vec<String> = ticks
        .iter()
        .flat_map(|ticker| synthetic_variants(&ticker.token_symbol))
        .collect();
    let markets = store.markets_by_names(&names).await?;
    let prices = build_price_map(&ticks, &markets);

    // lastClosedAt = newest close log per closed position.
    let closed = store.all_closed().await?;
    let closed_updates: Vec<(Document, Document)> = closed
        .iter()
        .map(|position| {
            let last_closed_at = position.logs.iter().map(|log| log.timestamp).max();
            (
                doc! {"_id": &position.id},
                doc! {"lastClosedAt": last_closed_at.unwrap_or(0)},
            )
        })
        .collect();
    store
        .bulk_set(store.closed.namespace(), closed_updates)
        .await?;

    let mut totals: HashMap<String, OpenTotals> = HashMap::new();
    let mut suppressed: HashSet<String> = HashSet::new();

    let opening = store.all_opening().await?;
    let mut opening_updates = Vec::new();
    for position in &opening {
        let entry = totals.entry(position.owner_account.clone()).or_default();
        // No live price for the asset: leave the position as-is this tick.
        let Some(&price) = prices.get(strip_synthetic_prefix(&position.asset)) else {
            continue;
        };

        let valuation = value_position(position, price);
        if valuation.suppress_roi {
            suppressed.insert(position.owner_account.clone());
        }
        opening_updates.push((
            doc! {"_id": &position.id},
            doc! {
                "firstOpenedAt": valuation.first_opened_at,
                "unrealizedPnl": valuation.unrealized_pnl,
            },
        ));

        entry.opening_size_usd += position.size_usd;
        entry.opening_position_count += 1;
        entry.unrealized_pnl += valuation.unrealized_pnl;
    }
    store
        .bulk_set(store.opening.namespace(), opening_updates)
        .await?;

    let aggregate_updates: Vec<(Document, Document)> = totals
        .iter()
        .map(|(owner, open)| {
            (
                doc! {"_id": owner},
                doc! {
                    "openingSizeUsd": open.opening_size_usd,
                    "unrealizedPnl": open.unrealized_pnl,
                    "openingPositionCount": open.opening_position_count,
                },
            )
        })
        .collect();
    store
        .bulk_set(store.accounts.namespace(), aggregate_updates)
        .await?;

    // Final pass reads the accounts back so the roll-up sees the aggregates
    // written above.
    let accounts = store.all_accounts().await?;
    let final_updates: Vec<(Document, Document)> = accounts
        .iter()
        .map(|account| {
            (
                doc! {"_id": &account.id},
                finalize_account(
                    account,
                    totals.contains_key(&account.account),
                    suppressed.contains(&account.account),
                ),
            )
        })
        .collect();
    store
        .bulk_set(store.accounts.namespace(), final_updates)
        .await?;

    info!(
        prices = prices.len(),
        open_positions = opening.len(),
        accounts = accounts.len(),
        "valuation tick complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionLog;

    fn market(name: &str, decimals: u32) -> Market {
        Market {
            id: format!("0x{}", name.to_lowercase()),
            name: name.to_string(),
            decimals,
        }
    }

    fn ticker(symbol: &str, min: &str, max: &str) -> Ticker {
        Ticker {
            token_symbol: symbol.to_string(),
            min_price: min.to_string(),
            max_price: max.to_string(),
        }
    }

    fn open_log(timestamp: i64, size_usd: f64) -> PositionLog {
        PositionLog {
            timestamp,
            action: "Open".to_string(),
            collateral_usd: Some(size_usd),
            leverage: Some(1.0),
            realized_pnl: None,
            size_usd,
            percentage_closed: None,
            price: 100.0,
            transaction_hash: "0xtx".to_string(),
        }
    }

    fn position(side: &str, size_usd: f64, entry: f64, logs: Vec<PositionLog>) -> OpeningPosition {
        OpeningPosition {
            id: "key1".to_string(),
            position_key: "key1".to_string(),
            owner_account: "0xowner".to_string(),
            asset: "BTC".to_string(),
            side: side.to_string(),
            size_usd,
            entry_price: entry,
            unrealized_pnl: 0.0,
            first_opened_at: None,
            logs,
        }
    }

    #[test]
    fn price_map_rescales_and_matches_synthetic_markets() {
        // Oracle price of 1.0 for an 8-decimal token is 10^22.
        let tickers = vec![
            ticker("BTC", "10000000000000000000000", "30000000000000000000000"),
            ticker("DOGE", "1", "1"),
        ];
        let markets = vec![market("kBTC", 8)];
        let prices = build_price_map(&tickers, &markets);

        assert_eq!(prices.len(), 1);
        assert!((prices["BTC"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn short_pnl_gains_when_price_drops() {
        // Short at entry 100, price 80, size 10 -> +2.
        assert!((unrealized_pnl("Short", 10.0, 100.0, 80.0) - 2.0).abs() < 1e-12);
        assert!((unrealized_pnl("Long", 10.0, 100.0, 80.0) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn valuation_tracks_first_open_and_integrity() {
        let pos = position("Long", 3.0, 100.0, vec![open_log(500, 1.0), open_log(300, 2.0)]);
        let valuation = value_position(&pos, 110.0);
        assert_eq!(valuation.first_opened_at, 300);
        assert!(!valuation.suppress_roi);
        assert!((valuation.unrealized_pnl - 0.3).abs() < 1e-12);

        // Recorded size exceeds the logged total: integrity guard trips.
        let stale = position("Long", 5.0, 100.0, vec![open_log(300, 2.0)]);
        assert!(value_position(&stale, 110.0).suppress_roi);
    }

    #[test]
    fn empty_logs_fall_back_to_the_epoch_constant() {
        let pos = position("Short", 1.0, 100.0, Vec::new());
        let valuation = value_position(&pos, 100.0);
        assert_eq!(valuation.first_opened_at, 1_735_689_600);
    }

    #[test]
    fn finalize_with_open_exposure() {
        let mut account = Account::new("0xowner");
        account.realized_pnl = 1.0;
        account.unrealized_pnl = 0.5;
        account.collateral_usd = 10.0;
        account.closed_position_count = 4;
        account.profited_position_count = 3;

        let update = finalize_account(&account, true, false);
        assert!((update.get_f64("PNL").unwrap() - 1.5).abs() < 1e-12);
        assert!((update.get_f64("ROI").unwrap() - 15.0).abs() < 1e-12);
        assert!((update.get_f64("profitableRatio").unwrap() - 0.75).abs() < 1e-12);
        assert!(!update.contains_key("openingSizeUsd"));
    }

    #[test]
    fn finalize_without_open_exposure_zeroes_the_aggregates() {
        let mut account = Account::new("0xowner");
        account.realized_pnl = 2.0;
        account.collateral_usd = 4.0;

        let update = finalize_account(&account, false, false);
        assert_eq!(update.get_f64("openingSizeUsd").unwrap(), 0.0);
        assert_eq!(update.get_i64("openingPositionCount").unwrap(), 0);
        assert!((update.get_f64("PNL").unwrap() - 2.0).abs() < 1e-12);
        assert!((update.get_f64("ROI").unwrap() - 50.0).abs() < 1e-12);
        // No closes yet: ratio undefined, field absent.
        assert!(!update.contains_key("profitableRatio"));
    }

    #[test]
    fn suppressed_accounts_keep_their_roi() {
        let mut account = Account::new("0xowner");
        account.realized_pnl = 1.0;
        account.collateral_usd = 10.0;

        let update = finalize_account(&account, true, true);
        assert!(!update.contains_key("ROI"));
        assert!(update.contains_key("PNL"));
    }

    #[test]
    fn zero_collateral_never_divides() {
        let account = Account::new("0xowner");
        let update = finalize_account(&account, false, false);
        assert!(!update.contains_key("ROI"));
    }
}
