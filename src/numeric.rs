//! Lossy conversions from on-chain 256-bit integers to analytics floats.
//!
//! Normalized values are 64-bit floats; typical magnitudes keep at least 14
//! significant digits, which is enough for PnL analytics. Degraded-mode
//! documents keep the exact decimal rendering instead.

use ethers::types::{I256, U256};

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Folds the four little-endian limbs most-significant first.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * TWO_POW_64 + limb as f64)
}

pub fn i256_to_f64(value: I256) -> f64 {
    if value.is_negative() {
        -u256_to_f64(value.unsigned_abs())
    } else {
        u256_to_f64(value.into_raw())
    }
}
