//! On-chain ERC-20 metadata with a persistent cache.
//!
//! `decimals()` and `symbol()` are fetched once per token and memoized in
//! the token_info collection, keyed by checksummed address. Non-standard
//! tokens resolve to a fallback that is never persisted, so a later fix to
//! the token contract (proxy upgrade) can still populate the cache.

use anyhow::{anyhow, Result};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use tracing::{debug, warn};

use crate::chain::rpc::EthRpc;
use crate::models::TokenInfo;
use crate::store::Store;

/// `decimals()` selector.
const DECIMALS_SELECTOR: &str = "0x313ce567";
/// `symbol()` selector.
const SYMBOL_SELECTOR: &str = "0x95d89b41";

const FALLBACK_DECIMALS: u32 = 18;
const FALLBACK_SYMBOL: &str = "UNKNOWN";

pub struct TokenMetadataCache {
    rpc: EthRpc,
}

impl TokenMetadataCache {
    pub fn new(rpc: EthRpc) -> Self {
        Self { rpc }
    }

    /// Token decimals and symbol, from the persisted cache or the chain.
    /// Concurrent first-time lookups may duplicate the fetch; the upsert
    /// keyed by address keeps the cache consistent either way.
    pub async fn lookup(&self, store: &Store, address: &str) -> Result<TokenInfo> {
        let checksummed = checksum_address(address)?;

        if let Some(token) = store.find_token(&checksummed).await? {
            return Ok(token);
        }

        match self.fetch_onchain(&checksummed).await {
            Ok(token) => {
                store.insert_token(&token).await?;
                debug!(token = %checksummed, symbol = %token.symbol, "cached token metadata");
                Ok(token)
            }
            Err(e) => {
                warn!(token = %checksummed, error = %e, "token metadata fetch failed, using fallback");
                Ok(TokenInfo {
                    id: checksummed,
                    decimals: FALLBACK_DECIMALS,
                    symbol: FALLBACK_SYMBOL.to_string(),
                })
            }
        }
    }

    async fn fetch_onchain(&self, address: &str) -> Result<TokenInfo> {
        let raw = self.rpc.call(address, DECIMALS_SELECTOR).await?;
        let decimals = match abi::decode(&[ParamType::Uint(8)], &raw)?.pop() {
            Some(Token::Uint(value)) if value <= U256::from(255u64) => value.as_u32(),
            _ => return Err(anyhow!("unexpected decimals() return")),
        };

        let raw = self.rpc.call(address, SYMBOL_SELECTOR).await?;
        let symbol = match abi::decode(&[ParamType::String], &raw)?.pop() {
            Some(Token::String(value)) => value,
            _ => return Err(anyhow!("unexpected symbol() return")),
        };

        Ok(TokenInfo {
            id: address.to_string(),
            decimals,
            symbol,
        })
    }
}

pub fn checksum_address(address: &str) -> Result<String> {
    let parsed: Address = address
        .parse()
        .map_err(|_| anyhow!("invalid token address {:?}", address))?;
    Ok(to_checksum(&parsed, None))
}
