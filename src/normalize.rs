//! Rescaling of raw on-chain integers into analytics floats.
//!
//! USD-denominated values are emitted at 10^30 fixed point; token amounts at
//! the token's own decimals; prices at 10^(30 - decimals) so that price x
//! amount lands back on the 10^30 USD scale. When the market is unknown the
//! document degrades to stringified integers instead of guessing a scale.

use ethers::types::{I256, U256};
use mongodb::bson::{doc, Bson, Document};

use crate::chain::decode::{FlatValue, PositionEvent};
use crate::models::{Market, TokenInfo};
use crate::numeric::{i256_to_f64, u256_to_f64};

/// Implicit scale of USD-denominated chain values.
pub const DECIMALS_USD: i32 = 30;

/// Decimals assumed when the event carries no collateral token.
const DEFAULT_COLLATERAL_DECIMALS: i32 = 18;

const FIELD_RENAMES: &[(&str, &str)] = &[
    ("indexTokenPrice.max", "indexTokenPriceMax"),
    ("indexTokenPrice.min", "indexTokenPriceMin"),
    ("collateralTokenPrice.max", "collateralTokenPriceMax"),
    ("collateralTokenPrice.min", "collateralTokenPriceMin"),
    ("values.priceImpactDiffUsd", "priceImpactDiffUsd"),
    ("decreasedAtTime", "timestamp"),
    ("increasedAtTime", "timestamp"),
];

const USD_FIELDS: &[&str] = &[
    "sizeInUsd",
    "sizeDeltaUsd",
    "priceImpactUsd",
    "basePnlUsd",
    "uncappedBasePnlUsd",
    "borrowingFactor",
    "priceImpactDiffUsd",
    "longTokenClaimableFundingAmountPerSize",
    "shortTokenClaimableFundingAmountPerSize",
];

const INDEX_AMOUNT_FIELDS: &[&str] = &["sizeInTokens", "sizeDeltaInTokens", "priceImpactAmount"];

const COLLATERAL_AMOUNT_FIELDS: &[&str] = &[
    "collateralAmount",
    "collateralDeltaAmount",
    "fundingFeeAmountPerSize",
];

const INDEX_PRICE_FIELDS: &[&str] = &["executionPrice", "indexTokenPriceMax", "indexTokenPriceMin"];

const COLLATERAL_PRICE_FIELDS: &[&str] = &["collateralTokenPriceMax", "collateralTokenPriceMin"];

/// Builds the normalized event document persisted under `_id` =
/// transaction hash. `market` and `collateral` supply the decimals for the
/// fixed-point table; without a market every integer field is stringified so
/// mixed scales never reach the store.
pub fn normalize_event(
    event: &PositionEvent,
    market: Option<&Market>,
    collateral: Option<&TokenInfo>,
) -> Document {
    let mut doc = doc! {
        "_id": &event.transaction_hash,
        "msgSender": &event.msg_sender,
        "eventName": &event.event_name,
        "transactionHash": &event.transaction_hash,
        "blockNumber": event.block_number as i64,
    };
    if let Some(topic1) = &event.topic1 {
        doc.insert("topic1", topic1);
    }

    let renamed: Vec<(&str, &FlatValue)> = event
        .fields
        .iter()
        .map(|(name, value)| (rename_field(name), value))
        .collect();

    let Some(market) = market else {
        for (name, value) in renamed {
            doc.insert(name, degraded_bson(value));
        }
        return doc;
    };

    let d_idx = market.decimals as i32;
    let d_col = collateral
        .map(|token| token.decimals as i32)
        .unwrap_or(DEFAULT_COLLATERAL_DECIMALS);

    doc.insert("indexTokenName", &market.name);
    doc.insert("indexTokenDecimals", market.decimals as i64);
    if let Some(token) = collateral {
        doc.insert("collateralTokenSymbol", &token.symbol);
        doc.insert("collateralTokenDecimals", token.decimals as i64);
    }

    for (name, value) in renamed {
        let bson = match divisor_exponent(name, d_idx, d_col) {
            Some(exponent) => scaled_bson(value, exponent),
            None => plain_bson(value),
        };
        doc.insert(name, bson);
    }

    doc
}

fn rename_field(name: &str) -> &str {
    FIELD_RENAMES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
        .unwrap_or(name)
}

fn divisor_exponent(field: &str, d_idx: i32, d_col: i32) -> Option<i32> {
    if USD_FIELDS.contains(&field) {
        Some(DECIMALS_USD)
    } else if INDEX_AMOUNT_FIELDS.contains(&field) {
        Some(d_idx)
    } else if COLLATERAL_AMOUNT_FIELDS.contains(&field) {
        Some(d_col)
    } else if INDEX_PRICE_FIELDS.contains(&field) {
        Some(DECIMALS_USD - d_idx)
    } else if COLLATERAL_PRICE_FIELDS.contains(&field) {
        Some(DECIMALS_USD - d_col)
    } else {
        None
    }
}

fn scaled_bson(value: &FlatValue, exponent: i32) -> Bson {
    let divisor = 10f64.powi(exponent);
    match value {
        FlatValue::Uint(v) => Bson::Double(u256_to_f64(*v) / divisor),
        FlatValue::Int(v) => Bson::Double(i256_to_f64(*v) / divisor),
        other => plain_bson(other),
    }
}

/// BSON has no 256-bit integer: unscaled integers persist as i64 when they
/// fit and as decimal strings otherwise.
fn plain_bson(value: &FlatValue) -> Bson {
    match value {
        FlatValue::Address(s) | FlatValue::Bytes(s) | FlatValue::Str(s) => Bson::String(s.clone()),
        FlatValue::Bool(b) => Bson::Boolean(*b),
        FlatValue::Uint(v) => {
            if *v <= U256::from(i64::MAX as u64) {
                Bson::Int64(v.as_u64() as i64)
            } else {
                Bson::String(v.to_string())
            }
        }
        FlatValue::Int(v) => {
            let (min, max) = (I256::from(i64::MIN), I256::from(i64::MAX));
            if *v >= min && *v <= max {
                Bson::Int64(v.as_i64())
            } else {
                Bson::String(v.to_string())
            }
        }
        FlatValue::Array(items) => Bson::Array(items.iter().map(plain_bson).collect()),
    }
}

/// Degraded rendering used when no market is seeded: scalar integers become
/// exact decimal strings.
fn degraded_bson(value: &FlatValue) -> Bson {
    match value {
        FlatValue::Uint(v) => Bson::String(v.to_string()),
        FlatValue::Int(v) => Bson::String(v.to_string()),
        other => plain_bson(other),
    }
}
