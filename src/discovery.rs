//! Holder discovery and ranking
//!
//! Each cycle enumerates every token account for the mint, folds accounts
//! of the same owner together, ranks owners by balance and republishes the
//! top N to the wallet store.

use crate::error::MonitorError;
use crate::ledger::LedgerClient;
use crate::store::Store;
use crate::types::{TokenHolder, Wallet};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Rank holders by descending balance and keep the first `n`
///
/// Zero balances are dropped. Accounts sharing an owner are summed at the
/// position of that owner's first account, so equal balances keep their
/// input order and every address appears once. Ranks are dense from 1.
pub fn rank_holders(holders: Vec<TokenHolder>, n: usize, now: DateTime<Utc>) -> Vec<Wallet> {
    let mut merged: Vec<(String, f64, u128)> = Vec::with_capacity(holders.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for holder in holders {
        let raw = holder.raw_quantity.parse::<u128>().unwrap_or_else(|_| {
            log::debug!("Unparseable raw quantity {:?} for {}", holder.raw_quantity, holder.owner);
            0
        });

        match positions.get(&holder.owner) {
            Some(&idx) => {
                let entry = &mut merged[idx];
                entry.1 += holder.balance;
                entry.2 = entry.2.saturating_add(raw);
            }
            None => {
                positions.insert(holder.owner.clone(), merged.len());
                merged.push((holder.owner, holder.balance, raw));
            }
        }
    }

    merged.retain(|(_, balance, _)| *balance > 0.0);

    // sort_by is stable: equal balances keep first-seen order
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    merged.truncate(n);

    merged
        .into_iter()
        .enumerate()
        .map(|(idx, (address, balance, raw))| Wallet {
            address,
            balance,
            raw_quantity: raw.to_string(),
            rank: idx as u32 + 1,
            last_updated: now,
        })
        .collect()
}

pub struct DiscoveryScheduler {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn Store>,
    mint: String,
    target_count: usize,
}

impl DiscoveryScheduler {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn Store>,
        mint: &str,
        target_count: usize,
    ) -> Self {
        Self {
            ledger,
            store,
            mint: mint.to_string(),
            target_count,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Query and rank the current top holders without touching the store
    pub async fn scan(&self) -> Result<Vec<Wallet>, MonitorError> {
        let holders = self.ledger.list_token_holders(&self.mint).await?;
        let account_count = holders.len();
        let ranked = rank_holders(holders, self.target_count, Utc::now());

        log::info!(
            "🔍 Ranked {} holders from {} token accounts (target {})",
            ranked.len(),
            account_count,
            self.target_count
        );
        Ok(ranked)
    }

    /// Run one discovery cycle and persist the ranking
    ///
    /// The ranking is replaced as a whole, so a failed cycle (ledger or
    /// store) leaves the previous ranking untouched.
    pub async fn discover(&self) -> Result<Vec<Wallet>, MonitorError> {
        let ranked = self.scan().await?;

        let cleared = self.store.replace_ranking(&ranked).await?;
        if cleared > 0 {
            log::info!("   └─ {} wallets dropped out of the top {}", cleared, self.target_count);
        }

        log::info!("✅ Discovery cycle stored {} wallets", ranked.len());
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use crate::store::{SqliteStore, StoreError, WalletStore};
    use crate::tests::FakeLedger;
    use rusqlite::Connection;
    use tempfile::tempdir;

    fn holder(owner: &str, balance: f64) -> TokenHolder {
        TokenHolder {
            owner: owner.to_string(),
            balance,
            raw_quantity: format!("{}", (balance * 1_000_000.0) as u128),
        }
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let ranked = rank_holders(
            vec![holder("w", 50.0), holder("x", 50.0), holder("y", 30.0), holder("z", 10.0)],
            3,
            Utc::now(),
        );

        let view: Vec<(&str, u32)> = ranked.iter().map(|w| (w.address.as_str(), w.rank)).collect();
        assert_eq!(view, vec![("w", 1), ("x", 2), ("y", 3)]);
        assert!(ranked.windows(2).all(|pair| pair[0].balance >= pair[1].balance));
    }

    #[test]
    fn test_rank_drops_zero_and_merges_owners() {
        let ranked = rank_holders(
            vec![
                holder("a", 10.0),
                holder("b", 0.0),
                holder("c", 25.0),
                holder("a", 20.0),
            ],
            10,
            Utc::now(),
        );

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].address, "a");
        assert_eq!(ranked[0].balance, 30.0);
        assert_eq!(ranked[0].raw_quantity, "30000000");
        assert_eq!(ranked[1].address, "c");
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_rank_fewer_holders_than_target() {
        let ranked = rank_holders(vec![holder("only", 1.0)], 60, Utc::now());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);
        assert!(rank_holders(Vec::new(), 60, Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_discover_persists_and_clears_stale_ranks() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("discovery.db")).unwrap());
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder("a", 100.0), holder("b", 80.0), holder("c", 50.0)]);

        let scheduler = DiscoveryScheduler::new(ledger.clone(), store.clone(), "mint", 2);
        let ranked = scheduler.discover().await.unwrap();
        assert_eq!(ranked.len(), 2);

        ledger.set_holders(vec![holder("c", 500.0), holder("a", 100.0)]);
        scheduler.discover().await.unwrap();

        let top = store.list_top_wallets(10).await.unwrap();
        let view: Vec<(&str, u32)> = top.iter().map(|w| (w.address.as_str(), w.rank)).collect();
        assert_eq!(view, vec![("c", 1), ("a", 2)]);
    }

    #[tokio::test]
    async fn test_failed_query_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("discovery.db")).unwrap());
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder("a", 100.0)]);

        let scheduler = DiscoveryScheduler::new(ledger.clone(), store.clone(), "mint", 5);
        scheduler.discover().await.unwrap();

        ledger.fail_next_holders(LedgerError::Timeout("getProgramAccounts".into()));
        let result = scheduler.discover().await;
        assert!(matches!(result, Err(MonitorError::Ledger(LedgerError::Timeout(_)))));

        let top = store.list_top_wallets(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].address, "a");
    }

    #[tokio::test]
    async fn test_store_failure_mid_cycle_keeps_previous_ranking() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("discovery.db");
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder("a", 100.0), holder("b", 80.0), holder("c", 50.0)]);

        let scheduler = DiscoveryScheduler::new(ledger.clone(), store.clone(), "mint", 3);
        scheduler.discover().await.unwrap();

        // c and b are rewritten before the write of a fails
        Connection::open(&db_path)
            .unwrap()
            .execute_batch(
                r#"
                CREATE TRIGGER fail_wallet_a BEFORE UPDATE ON wallets
                WHEN NEW.address = 'a'
                BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;
                "#,
            )
            .unwrap();

        ledger.set_holders(vec![holder("c", 300.0), holder("b", 200.0), holder("a", 100.0)]);
        let result = scheduler.discover().await;
        assert!(matches!(result, Err(MonitorError::Store(StoreError::Database(_)))));

        let top = store.list_top_wallets(10).await.unwrap();
        let view: Vec<(&str, u32)> = top.iter().map(|w| (w.address.as_str(), w.rank)).collect();
        assert_eq!(view, vec![("a", 1), ("b", 2), ("c", 3)]);
    }
}
