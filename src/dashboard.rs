//! Read-only dashboard projection over the transaction store

use crate::store::{StoreError, TransactionStore};
use crate::types::{DashboardSnapshot, NetDirection};

/// Totals, per-venue breakdown and the `recent_limit` newest transactions
pub async fn build_dashboard_snapshot(
    store: &dyn TransactionStore,
    recent_limit: usize,
) -> Result<DashboardSnapshot, StoreError> {
    let totals = store.aggregate_stats().await?;
    let per_protocol = store.aggregate_by_protocol().await?;
    let recent = store.query_transactions(recent_limit, None, None).await?;
    let net_direction = NetDirection::from_counts(totals.total_buys, totals.total_sells);

    Ok(DashboardSnapshot {
        totals,
        net_direction,
        per_protocol,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{TradeDirection, Transaction};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn event(id: &str, direction: TradeDirection, ts: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            wallet_address: format!("wallet_{}", id),
            direction,
            amount: 1.0,
            raw_amount: "1000000".to_string(),
            protocol: "Jupiter".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            signature: id.to_string(),
            block_time: ts,
        }
    }

    #[tokio::test]
    async fn test_empty_store_is_neutral() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("dash.db")).unwrap();

        let snapshot = build_dashboard_snapshot(&store, 50).await.unwrap();
        assert_eq!(snapshot.net_direction, NetDirection::Neutral);
        assert!(snapshot.recent.is_empty());
        assert!(snapshot.per_protocol.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_sell_heavy_with_limit() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("dash.db")).unwrap();

        store.upsert_transaction(&event("s1", TradeDirection::Sell, 10)).await.unwrap();
        store.upsert_transaction(&event("s2", TradeDirection::Sell, 20)).await.unwrap();
        store.upsert_transaction(&event("b1", TradeDirection::Buy, 30)).await.unwrap();

        let snapshot = build_dashboard_snapshot(&store, 2).await.unwrap();
        assert_eq!(snapshot.net_direction, NetDirection::SellHeavy);
        assert_eq!(snapshot.totals.total_sells, 2);
        assert_eq!(snapshot.totals.active_wallets, 3);
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.recent[0].id, "b1");
        assert_eq!(snapshot.per_protocol.len(), 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["netDirection"], "sell-heavy");
        assert_eq!(json["totals"]["totalBuys"], 1);
    }
}
