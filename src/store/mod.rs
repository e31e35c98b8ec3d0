//! Persistence contract for ranked wallets and classified transactions
//!
//! The monitor only talks to `dyn Store`. [`SqliteStore`] is the shipped
//! backend; [`GatedStore`] wraps any backend so shutdown can stop writes.

pub mod gated;
pub mod sqlite;

pub use gated::{GatedStore, WriteGate};
pub use sqlite::SqliteStore;

use crate::types::{DashboardTotals, ProtocolStats, Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    /// The store was closed, or never opened
    Closed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Closed => write!(f, "Store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Insert or replace the wallet keyed by address
    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError>;

    /// Ranked wallets, rank ascending
    async fn list_top_wallets(&self, limit: usize) -> Result<Vec<Wallet>, StoreError>;

    /// Drop the rank of every wallet whose address is not in `keep`
    async fn clear_stale_ranks(&self, keep: &[String]) -> Result<usize, StoreError>;

    /// Publish a complete ranking in one atomic step
    ///
    /// Upserts every wallet and clears the rank of every other wallet. Either
    /// all of it lands or none of it does. Returns how many ranks were cleared.
    async fn replace_ranking(&self, ranked: &[Wallet]) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert or replace the transaction keyed by id
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Newest first, optionally bounded by timestamp (both ends inclusive)
    async fn query_transactions(
        &self,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn aggregate_stats(&self) -> Result<DashboardTotals, StoreError>;

    /// Per-venue counts and volume, highest volume first
    async fn aggregate_by_protocol(&self) -> Result<Vec<ProtocolStats>, StoreError>;
}

#[async_trait]
pub trait Store: WalletStore + TransactionStore {
    /// Open the backend if needed; idempotent
    async fn ready(&self) -> Result<(), StoreError>;

    /// Release the backend; later calls fail with [`StoreError::Closed`] until `ready()`
    async fn close(&self) -> Result<(), StoreError>;
}
