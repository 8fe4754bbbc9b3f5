//! MongoDB persistence layer.
//!
//! One `Store` owns every collection handle. Writer responsibility is
//! partitioned per worker, so every method here is either a single-document
//! upsert, a targeted `$set` of one worker's fields, or a homogeneous bulk
//! write; no cross-document transactions.

use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::{UpdateOneModel, WriteModel};
use mongodb::{Client, Collection, Namespace};

use crate::models::{Account, ClosedPosition, CursorDoc, Market, OpeningPosition, TokenInfo};

/// Cursor document id for the ingestion high-water mark.
pub const INGEST_CURSOR: &str = "gmx_last_updated_event";
/// Cursor document id for the analytics fold position.
pub const ANALYTICS_CURSOR: &str = "last_updated_gmx_analytics";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub db: String,
    pub configs: String,
    pub events: String,
    pub markets: String,
    pub tokens: String,
    pub accounts: String,
    pub opening: String,
    pub closed: String,
}

impl StoreConfig {
    /// Connection settings with the default collection layout.
    pub fn new(uri: &str, db: &str) -> Self {
        Self {
            uri: uri.to_string(),
            db: db.to_string(),
            configs: "configs".to_string(),
            events: "gmx_events".to_string(),
            markets: "gmx_market".to_string(),
            tokens: "token_info".to_string(),
            accounts: "gmx_accounts".to_string(),
            opening: "gmx_opening_positions".to_string(),
            closed: "gmx_closed_positions".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Store {
    client: Client,
    pub configs: Collection<CursorDoc>,
    pub events: Collection<Document>,
    pub markets: Collection<Market>,
    pub tokens: Collection<TokenInfo>,
    pub accounts: Collection<Account>,
    pub opening: Collection<OpeningPosition>,
    pub closed: Collection<ClosedPosition>,
}

impl Store {
    pub async fn connect(cfg: &StoreConfig) -> Result<Self> {
        let client = Client::with_uri_str(&cfg.uri)
            .await
            .context("failed to connect to MongoDB")?;
        let db = client.database(&cfg.db);

        Ok(Self {
            configs: db.collection(&cfg.configs),
            events: db.collection(&cfg.events),
            markets: db.collection(&cfg.markets),
            tokens: db.collection(&cfg.tokens),
            accounts: db.collection(&cfg.accounts),
            opening: db.collection(&cfg.opening),
            closed: db.collection(&cfg.closed),
            client,
        })
    }

    // --- cursors ---

    pub async fn cursor(&self, id: &str) -> Result<Option<i64>> {
        let doc = self
            .configs
            .find_one(doc! {"_id": id})
            .await
            .with_context(|| format!("failed to read cursor {}", id))?;
        Ok(doc.map(|cursor| cursor.last_updated_at_block_number))
    }

    pub async fn set_cursor(&self, id: &str, block: i64) -> Result<()> {
        self.configs
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {"last_updated_at_block_number": block}},
            )
            .upsert(true)
            .await
            .with_context(|| format!("failed to advance cursor {}", id))?;
        Ok(())
    }

    // --- normalized events ---

    /// Idempotent replace-by-id: re-ingesting a window rewrites the same
    /// documents.
    pub async fn upsert_event(&self, event: Document) -> Result<()> {
        let id = event
            .get_str("_id")
            .context("event document has no _id")?
            .to_string();
        self.events
            .replace_one(doc! {"_id": &id}, event)
            .upsert(true)
            .await
            .context("failed to upsert event")?;
        Ok(())
    }

    /// Normalized events with `blockNumber` in `[from, to]`, ascending.
    pub async fn events_in_range(&self, from: i64, to: i64) -> Result<Vec<Document>> {
        let cursor = self
            .events
            .find(doc! {"blockNumber": {"$gte": from, "$lte": to}})
            .sort(doc! {"blockNumber": 1})
            .await
            .context("failed to query events")?;
        cursor.try_collect().await.context("failed to drain events")
    }

    // --- reference data ---

    pub async fn find_market(&self, id: &str) -> Result<Option<Market>> {
        self.markets
            .find_one(doc! {"_id": id})
            .await
            .context("failed to read market")
    }

    pub async fn markets_by_names(&self, names: &[String]) -> Result<Vec<Market>> {
        let cursor = self
            .markets
            .find(doc! {"name": {"$in": names}})
            .await
            .context("failed to query markets")?;
        cursor.try_collect().await.context("failed to drain markets")
    }

    pub async fn find_token(&self, id: &str) -> Result<Option<TokenInfo>> {
        self.tokens
            .find_one(doc! {"_id": id})
            .await
            .context("failed to read token info")
    }

    pub async fn insert_token(&self, token: &TokenInfo) -> Result<()> {
        self.tokens
            .replace_one(doc! {"_id": &token.id}, token)
            .upsert(true)
            .await
            .context("failed to persist token info")?;
        Ok(())
    }

    // --- analytics documents ---

    pub async fn find_account(&self, id: &str) -> Result<Option<Account>> {
        self.accounts
            .find_one(doc! {"_id": id})
            .await
            .context("failed to read account")
    }

    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .replace_one(doc! {"_id": &account.id}, account)
            .upsert(true)
            .await
            .context("failed to create account")?;
        Ok(())
    }

    /// Writes only the fields the analytics fold owns, leaving valuation
    /// fields to the valuator.
    pub async fn save_account_stats(&self, account: &Account) -> Result<()> {
        self.accounts
            .update_one(
                doc! {"_id": &account.id},
                doc! {"$set": {
                    "positionKeys": to_bson(&account.position_keys)?,
                    "collateralUsd": account.collateral_usd,
                    "realizedPnl": account.realized_pnl,
                    "closedPositionCount": account.closed_position_count,
                    "profitedPositionCount": account.profited_position_count,
                }},
            )
            .await
            .context("failed to update account")?;
        Ok(())
    }

    pub async fn find_opening(&self, key: &str) -> Result<Option<OpeningPosition>> {
        self.opening
            .find_one(doc! {"_id": key})
            .await
            .context("failed to read opening position")
    }

    pub async fn insert_opening(&self, position: &OpeningPosition) -> Result<()> {
        self.opening
            .replace_one(doc! {"_id": &position.id}, position)
            .upsert(true)
            .await
            .context("failed to create opening position")?;
        Ok(())
    }

    pub async fn save_opening_state(&self, position: &OpeningPosition) -> Result<()> {
        self.opening
            .update_one(
                doc! {"_id": &position.id},
                doc! {"$set": {
                    "logs": to_bson(&position.logs)?,
                    "entryPrice": position.entry_price,
                    "sizeUsd": position.size_usd,
                }},
            )
            .await
            .context("failed to update opening position")?;
        Ok(())
    }

    pub async fn delete_opening(&self, key: &str) -> Result<()> {
        self.opening
            .delete_one(doc! {"_id": key})
            .await
            .context("failed to delete opening position")?;
        Ok(())
    }

    pub async fn find_closed(&self, key: &str) -> Result<Option<ClosedPosition>> {
        self.closed
            .find_one(doc! {"_id": key})
            .await
            .context("failed to read closed position")
    }

    pub async fn insert_closed(&self, position: &ClosedPosition) -> Result<()> {
        self.closed
            .replace_one(doc! {"_id": &position.id}, position)
            .upsert(true)
            .await
            .context("failed to create closed position")?;
        Ok(())
    }

    pub async fn save_closed_state(&self, position: &ClosedPosition) -> Result<()> {
        self.closed
            .update_one(
                doc! {"_id": &position.id},
                doc! {"$set": {
                    "realizedPnl": position.realized_pnl,
                    "logs": to_bson(&position.logs)?,
                }},
            )
            .await
            .context("failed to update closed position")?;
        Ok(())
    }

    // --- full scans for the periodic reprojections ---

    pub async fn all_accounts(&self) -> Result<Vec<Account>> {
        let cursor = self
            .accounts
            .find(doc! {})
            .await
            .context("failed to query accounts")?;
        cursor.try_collect().await.context("failed to drain accounts")
    }

    pub async fn all_opening(&self) -> Result<Vec<OpeningPosition>> {
        let cursor = self
            .opening
            .find(doc! {})
            .await
            .context("failed to query opening positions")?;
        cursor
            .try_collect()
            .await
            .context("failed to drain opening positions")
    }

    pub async fn all_closed(&self) -> Result<Vec<ClosedPosition>> {
        let cursor = self
            .closed
            .find(doc! {})
            .await
            .context("failed to query closed positions")?;
        cursor
            .try_collect()
            .await
            .context("failed to drain closed positions")
    }

    /// One bulk write of `$set` updates against a single collection.
    pub async fn bulk_set(
        &self,
        namespace: Namespace,
        updates: Vec<(Document, Document)>,
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let models: Vec<WriteModel> = updates
            .into_iter()
            .map(|(filter, set)| {
                WriteModel::UpdateOne(
                    UpdateOneModel::builder()
                        .namespace(namespace.clone())
                        .filter(filter)
                        .update(doc! {"$set": set})
                        .build(),
                )
            })
            .collect();
        self.client
            .bulk_write(models)
            .await
            .with_context(|| format!("bulk write to {} failed", namespace))?;
        Ok(())
    }
}
