//! SQLite backend for the wallet and transaction stores
//!
//! One connection behind a mutex, WAL journal, upserts through
//! `INSERT ... ON CONFLICT DO UPDATE`. The schema is created on every open
//! and is idempotent.

use super::{Store, StoreError, TransactionStore, WalletStore};
use crate::types::{DashboardTotals, ProtocolStats, TradeDirection, Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    address       TEXT PRIMARY KEY,
    balance       REAL NOT NULL,
    raw_quantity  TEXT NOT NULL,
    rank          INTEGER,
    last_updated  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    id             TEXT PRIMARY KEY,
    wallet_address TEXT NOT NULL,
    direction      TEXT NOT NULL CHECK (direction IN ('buy', 'sell')),
    amount         REAL NOT NULL,
    raw_amount     TEXT NOT NULL,
    protocol       TEXT NOT NULL,
    timestamp      INTEGER NOT NULL,
    signature      TEXT NOT NULL,
    block_time     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wallets_rank ON wallets(rank);
CREATE INDEX IF NOT EXISTS idx_transactions_wallet ON transactions(wallet_address);
CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_transactions_direction ON transactions(direction);
"#;

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.open_connection()?;
        Ok(store)
    }

    /// Store handle that connects on the first `ready()`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_connection(&self) -> Result<(), StoreError> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite store ready at {}", self.path.display());
        *guard = Some(conn);
        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(f(conn)?)
    }
}

fn to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn wallet_from_row(row: &Row<'_>) -> Result<Wallet, rusqlite::Error> {
    let rank: i64 = row.get(3)?;
    Ok(Wallet {
        address: row.get(0)?,
        balance: row.get(1)?,
        raw_quantity: row.get(2)?,
        rank: rank as u32,
        last_updated: to_datetime(row.get(4)?),
    })
}

fn transaction_from_row(row: &Row<'_>) -> Result<Transaction, rusqlite::Error> {
    let direction: String = row.get(2)?;
    let direction = direction.parse::<TradeDirection>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Transaction {
        id: row.get(0)?,
        wallet_address: row.get(1)?,
        direction,
        amount: row.get(3)?,
        raw_amount: row.get(4)?,
        protocol: row.get(5)?,
        timestamp: to_datetime(row.get(6)?),
        signature: row.get(7)?,
        block_time: row.get(8)?,
    })
}

fn write_wallet(conn: &Connection, wallet: &Wallet) -> Result<(), rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO wallets (address, balance, raw_quantity, rank, last_updated)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(address) DO UPDATE SET
            balance = excluded.balance,
            raw_quantity = excluded.raw_quantity,
            rank = excluded.rank,
            last_updated = excluded.last_updated
        "#,
        params![
            wallet.address,
            wallet.balance,
            wallet.raw_quantity,
            wallet.rank,
            wallet.last_updated.timestamp(),
        ],
    )?;
    Ok(())
}

/// Null the rank of every ranked wallet not in `keep`; caller owns the transaction
fn clear_unranked<'a>(
    conn: &Connection,
    keep: impl Iterator<Item = &'a str>,
) -> Result<usize, rusqlite::Error> {
    conn.execute("CREATE TEMP TABLE IF NOT EXISTS ranked_keep (address TEXT PRIMARY KEY)", [])?;
    conn.execute("DELETE FROM ranked_keep", [])?;
    {
        let mut insert = conn.prepare("INSERT OR IGNORE INTO ranked_keep (address) VALUES (?1)")?;
        for address in keep {
            insert.execute(params![address])?;
        }
    }
    conn.execute(
        r#"
        UPDATE wallets SET rank = NULL
        WHERE rank IS NOT NULL
          AND address NOT IN (SELECT address FROM ranked_keep)
        "#,
        [],
    )
}

#[async_trait]
impl WalletStore for SqliteStore {
    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        self.with_conn(|conn| write_wallet(conn, wallet))
    }

    async fn list_top_wallets(&self, limit: usize) -> Result<Vec<Wallet>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT address, balance, raw_quantity, rank, last_updated
                FROM wallets
                WHERE rank IS NOT NULL
                ORDER BY rank ASC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt.query_map(params![limit as i64], wallet_from_row)?;
            rows.collect()
        })
    }

    async fn clear_stale_ranks(&self, keep: &[String]) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let cleared = clear_unranked(&tx, keep.iter().map(String::as_str))?;
            tx.commit()?;
            Ok(cleared)
        })
    }

    async fn replace_ranking(&self, ranked: &[Wallet]) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            // Dropping `tx` on an early return rolls the whole ranking back
            let tx = conn.unchecked_transaction()?;
            for wallet in ranked {
                write_wallet(&tx, wallet)?;
            }
            let cleared = clear_unranked(&tx, ranked.iter().map(|w| w.address.as_str()))?;
            tx.commit()?;
            Ok(cleared)
        })
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO transactions (
                    id, wallet_address, direction, amount, raw_amount,
                    protocol, timestamp, signature, block_time
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    wallet_address = excluded.wallet_address,
                    direction = excluded.direction,
                    amount = excluded.amount,
                    raw_amount = excluded.raw_amount,
                    protocol = excluded.protocol,
                    timestamp = excluded.timestamp,
                    signature = excluded.signature,
                    block_time = excluded.block_time
                "#,
                params![
                    tx.id,
                    tx.wallet_address,
                    tx.direction.as_str(),
                    tx.amount,
                    tx.raw_amount,
                    tx.protocol,
                    tx.timestamp.timestamp(),
                    tx.signature,
                    tx.block_time,
                ],
            )?;
            Ok(())
        })
    }

    async fn query_transactions(
        &self,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, wallet_address, direction, amount, raw_amount,
                       protocol, timestamp, signature, block_time
                FROM transactions
                WHERE (?1 IS NULL OR timestamp >= ?1)
                  AND (?2 IS NULL OR timestamp <= ?2)
                ORDER BY timestamp DESC, id ASC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt.query_map(
                params![
                    start.map(|t| t.timestamp()),
                    end.map(|t| t.timestamp()),
                    limit as i64
                ],
                transaction_from_row,
            )?;
            rows.collect()
        })
    }

    async fn aggregate_stats(&self) -> Result<DashboardTotals, StoreError> {
        self.with_conn(|conn| {
            let totals = conn
                .query_row(
                    r#"
                    SELECT
                        COALESCE(SUM(CASE WHEN direction = 'buy' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN direction = 'sell' THEN 1 ELSE 0 END), 0),
                        COUNT(DISTINCT wallet_address)
                    FROM transactions
                    "#,
                    [],
                    |row| {
                        Ok(DashboardTotals {
                            total_buys: row.get::<_, i64>(0)? as u64,
                            total_sells: row.get::<_, i64>(1)? as u64,
                            active_wallets: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(totals.unwrap_or_default())
        })
    }

    async fn aggregate_by_protocol(&self) -> Result<Vec<ProtocolStats>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT
                    protocol,
                    SUM(CASE WHEN direction = 'buy' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN direction = 'sell' THEN 1 ELSE 0 END),
                    SUM(amount) AS volume
                FROM transactions
                GROUP BY protocol
                ORDER BY volume DESC, protocol ASC
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ProtocolStats {
                    protocol: row.get(0)?,
                    buy_count: row.get::<_, i64>(1)? as u64,
                    sell_count: row.get::<_, i64>(2)? as u64,
                    total_volume: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ready(&self) -> Result<(), StoreError> {
        self.open_connection()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            log::info!("🛑 SQLite store closed");
        }
        Ok(())
    }
}
