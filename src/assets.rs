//! Low-frequency derivation of each account's distinct traded assets.
//!
//! Projects positionKey -> asset from the union of open and closed
//! positions, then maps every account's key list through it, deduplicated in
//! first-seen order.

use anyhow::Result;
use mongodb::bson::{doc, Document};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::models::Account;
use crate::store::Store;

pub fn project_traded_assets(
    assets_by_key: &HashMap<String, String>,
    accounts: &[Account],
) -> Vec<(String, Vec<String>)> {
    accounts
        .iter()
        .map(|account| {
            let mut assets: Vec<String> = Vec::new();
            for key in &account.position_keys {
                if let Some(asset) = assets_by_key.get(key) {
                    if !assets.contains(asset) {
                        assets.push(asset.clone());
                    }
                }
            }
            (account.account.clone(), assets)
        })
        .collect()
}

pub async fn run(store: Store, interval: u64) -> Result<()> {
    loop {
        match tick(&store).await {
            Ok(updated) => info!(accounts = updated, "traded assets updated"),
            Err(e) => warn!(error = %e, "traded assets tick failed"),
        }
        sleep(Duration::from_secs(interval)).await;
    }
}

async fn tick(store: &Store) -> Result<usize> {
    let mut assets_by_key: HashMap<String, String> = HashMap::new();
    for position in store.all_opening().await? {
        assets_by_key.insert(position.position_key, position.asset);
    }
    for position in store.all_closed().await? {
        assets_by_key.insert(position.position_key, position.asset);
    }

    let accounts = store.all_accounts().await?;
    let projected = project_traded_assets(&assets_by_key, &accounts);
    let count = projected.len();

    let updates: Vec<(Document, Document)> = projected
        .into_iter()
        .map(|(account, assets)| (doc! {"_id": account}, doc! {"tradedAssets": assets}))
        .collect();
    store
        .bulk_set(store.accounts.namespace(), updates)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(owner: &str, keys: &[&str]) -> Account {
        let mut account = Account::new(owner);
        account.position_keys = keys.iter().map(|key| key.to_string()).collect();
        account
    }

    #[test]
    fn deduplicates_in_first_seen_order() {
        let mut assets_by_key = HashMap::new();
        assets_by_key.insert("k1".to_string(), "BTC".to_string());
        assets_by_key.insert("k2".to_string(), "ETH".to_string());
        assets_by_key.insert("k3".to_string(), "BTC".to_string());

        let accounts = vec![account("0xa", &["k1", "k3", "k2"])];
        let projected = project_traded_assets(&assets_by_key, &accounts);

        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].0, "0xa");
        assert_eq!(projected[0].1, vec!["BTC", "ETH"]);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let assets_by_key = HashMap::new();
        let accounts = vec![account("0xa", &["missing"])];
        let projected = project_traded_assets(&assets_by_key, &accounts);
        assert!(projected[0].1.is_empty());
    }
}
