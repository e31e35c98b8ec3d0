//! Write gate in front of a store
//!
//! Every write holds a shared guard for its duration. Closing the gate flips
//! it shut and then takes the exclusive side, so `close_writes()` returns only
//! once in-flight writes have finished and no new write can start.

use super::{Store, StoreError, TransactionStore, WalletStore};
use crate::types::{DashboardTotals, ProtocolStats, Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

pub struct WriteGate {
    open: AtomicBool,
    in_flight: RwLock<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            in_flight: RwLock::new(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Guard for one write; `Closed` once the gate has been shut
    pub async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        let guard = self.in_flight.read().await;
        if !self.is_open() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    /// Shut the gate and wait for in-flight writes to drain
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _drained = self.in_flight.write().await;
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Store wrapper whose writes pass through a [`WriteGate`]; reads go straight through
pub struct GatedStore {
    inner: Arc<dyn Store>,
    gate: WriteGate,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            gate: WriteGate::new(),
        }
    }

    /// Stop accepting writes and wait until none are running
    pub async fn close_writes(&self) {
        self.gate.close().await;
    }

    pub fn accepts_writes(&self) -> bool {
        self.gate.is_open()
    }
}

#[async_trait]
impl WalletStore for GatedStore {
    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let _guard = self.gate.enter().await?;
        self.inner.upsert_wallet(wallet).await
    }

    async fn list_top_wallets(&self, limit: usize) -> Result<Vec<Wallet>, StoreError> {
        self.inner.list_top_wallets(limit).await
    }

    async fn clear_stale_ranks(&self, keep: &[String]) -> Result<usize, StoreError> {
        let _guard = self.gate.enter().await?;
        self.inner.clear_stale_ranks(keep).await
    }

    async fn replace_ranking(&self, ranked: &[Wallet]) -> Result<usize, StoreError> {
        let _guard = self.gate.enter().await?;
        self.inner.replace_ranking(ranked).await
    }
}

#[async_trait]
impl TransactionStore for GatedStore {
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let _guard = self.gate.enter().await?;
        self.inner.upsert_transaction(tx).await
    }

    async fn query_transactions(
        &self,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.query_transactions(limit, start, end).await
    }

    async fn aggregate_stats(&self) -> Result<DashboardTotals, StoreError> {
        self.inner.aggregate_stats().await
    }

    async fn aggregate_by_protocol(&self) -> Result<Vec<ProtocolStats>, StoreError> {
        self.inner.aggregate_by_protocol().await
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn ready(&self) -> Result<(), StoreError> {
        self.inner.ready().await?;
        self.gate.reopen();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.gate.close().await;
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::TradeDirection;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample_tx(id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            wallet_address: "wallet".to_string(),
            direction: TradeDirection::Buy,
            amount: 1.0,
            raw_amount: "1000000".to_string(),
            protocol: "Unknown".to_string(),
            timestamp: Utc::now(),
            signature: id.to_string(),
            block_time: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_writes_but_allows_reads() {
        let dir = tempdir().unwrap();
        let inner = Arc::new(SqliteStore::open(dir.path().join("gate.db")).unwrap());
        let store = GatedStore::new(inner);

        store.upsert_transaction(&sample_tx("a")).await.unwrap();
        store.close_writes().await;

        assert!(!store.accepts_writes());
        assert!(matches!(store.upsert_transaction(&sample_tx("b")).await, Err(StoreError::Closed)));
        assert_eq!(store.query_transactions(10, None, None).await.unwrap().len(), 1);

        store.ready().await.unwrap();
        store.upsert_transaction(&sample_tx("b")).await.unwrap();
        assert_eq!(store.query_transactions(10, None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_write() {
        let gate = Arc::new(WriteGate::new());

        let guard = gate.enter().await.unwrap();
        let closer = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.close().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closer.is_finished());
        assert!(!gate.is_open());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), closer)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.enter().await.is_err());
    }
}
