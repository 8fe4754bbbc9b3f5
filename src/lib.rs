//! GMX Perpetuals Trading Tracker
//!
//! On-chain trading-activity indexer for a perpetual-futures protocol on an
//! EVM rollup. Tails the emitter contract's generic EventLog1 stream,
//! decodes and normalizes position-lifecycle events, and maintains derived
//! per-account and per-position analytics in a MongoDB document store.
//!
//! The pipeline runs as independently restartable workers (one binary each)
//! coordinated only through persisted cursors and idempotent upserts.

pub mod analytics;
pub mod assets;
pub mod chain;
pub mod indexer;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod numeric;
pub mod store;
pub mod symbols;
pub mod valuator;
