//! Store document schemas.
//!
//! Field names mirror the on-disk collections (camelCase, `_id` keys), so the
//! structs round-trip through BSON without translation layers. Note the
//! `transaction_hash` key inside position logs: the log schema predates the
//! camelCase convention and is kept as-is.

use serde::{Deserialize, Serialize};

/// Market metadata, seeded externally. `name` is the index token display name
/// and may carry a synthetic-variant prefix letter (see `symbols`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub decimals: u32,
}

/// Cached ERC-20 metadata, keyed by checksummed contract address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(rename = "_id")]
    pub id: String,
    pub decimals: u32,
    pub symbol: String,
}

/// One entry of a position's action history. `Open` logs carry
/// `collateralUsd` and `leverage`; `Close`/`Liquidate` logs carry
/// `realizedPnl` and `percentageClosed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLog {
    pub timestamp: i64,
    pub action: String,
    #[serde(rename = "collateralUsd", skip_serializing_if = "Option::is_none")]
    pub collateral_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<f64>,
    #[serde(rename = "realizedPnl", skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    #[serde(rename = "sizeUsd")]
    pub size_usd: f64,
    #[serde(rename = "percentageClosed", skip_serializing_if = "Option::is_none")]
    pub percentage_closed: Option<i64>,
    pub price: f64,
    pub transaction_hash: String,
}

/// Per-account aggregate across all of its positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    pub account: String,
    #[serde(default)]
    pub position_keys: Vec<String>,
    #[serde(default)]
    pub opening_size_usd: f64,
    #[serde(default)]
    pub collateral_usd: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub opening_position_count: i64,
    #[serde(default)]
    pub closed_position_count: i64,
    #[serde(default)]
    pub profited_position_count: i64,
    #[serde(default)]
    pub profitable_ratio: f64,
    #[serde(rename = "PNL", default)]
    pub pnl: f64,
    #[serde(rename = "ROI", default)]
    pub roi: f64,
    #[serde(default)]
    pub traded_assets: Vec<String>,
}

impl Account {
    pub fn new(owner: &str) -> Self {
        Self {
            id: owner.to_string(),
            account: owner.to_string(),
            position_keys: Vec::new(),
            opening_size_usd: 0.0,
            collateral_usd: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            opening_position_count: 0,
            closed_position_count: 0,
            profited_position_count: 0,
            profitable_ratio: 0.0,
            pnl: 0.0,
            roi: 0.0,
            traded_assets: Vec::new(),
        }
    }
}

/// An open position, keyed by its deterministic position key. Deleted once
/// fully closed; its logs migrate into the closed counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningPosition {
    #[serde(rename = "_id")]
    pub id: String,
    pub position_key: String,
    pub owner_account: String,
    pub asset: String,
    pub side: String,
    #[serde(default)]
    pub size_usd: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_opened_at: Option<i64>,
    #[serde(default)]
    pub logs: Vec<PositionLog>,
}

/// Realized history of a position key; survives re-opens and accumulates
/// across repeated close-outs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPosition {
    #[serde(rename = "_id")]
    pub id: String,
    pub position_key: String,
    pub owner_account: String,
    pub asset: String,
    pub side: String,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_closed_at: Option<i64>,
    #[serde(default)]
    pub logs: Vec<PositionLog>,
}

/// High-water-mark cursor persisted in the configs collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub last_updated_at_block_number: i64,
}

pub fn position_side(is_long: bool) -> &'static str {
    if is_long {
        "Long"
    } else {
        "Short"
    }
}
