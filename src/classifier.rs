//! Turns a wallet's recent ledger transactions into buy/sell events
//!
//! A transaction counts for a wallet when both its pre- and post-execution
//! token balance lists carry an entry owned by that wallet for the tracked
//! mint. The sign of `post - pre` is the direction; the magnitude is the
//! amount. Changes smaller than [`NOISE_EPSILON`] are rounding noise.

use crate::ledger::{LedgerClient, LedgerError};
use crate::protocols::ProtocolRegistry;
use crate::types::{ParsedTransaction, TokenBalanceEntry, TradeDirection, Transaction};
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

/// Balance changes below this many token units are ignored
pub const NOISE_EPSILON: f64 = 0.000001;

/// Upper bound on signatures inspected per wallet in one call
pub const MAX_LOOKBACK: usize = 1000;

/// Transaction fetches in flight per `classify()` call unless configured
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Net balance change of one wallet for the tracked mint within a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct WalletDelta {
    pub ui_change: f64,
    /// `post - pre` in raw integer units, when both amounts parse
    pub raw_change: Option<i128>,
    pub decimals: u8,
}

fn find_entry<'a>(
    entries: &'a [TokenBalanceEntry],
    wallet: &str,
    mint: &str,
) -> Option<&'a TokenBalanceEntry> {
    entries
        .iter()
        .find(|entry| entry.mint == mint && entry.owner.as_deref() == Some(wallet))
}

/// Balance delta for `wallet`, or `None` if either side has no entry for it
pub fn wallet_delta(tx: &ParsedTransaction, wallet: &str, mint: &str) -> Option<WalletDelta> {
    let pre = find_entry(&tx.pre_token_balances, wallet, mint)?;
    let post = find_entry(&tx.post_token_balances, wallet, mint)?;

    let raw_change = match (pre.amount.parse::<i128>(), post.amount.parse::<i128>()) {
        (Ok(pre_raw), Ok(post_raw)) => Some(post_raw - pre_raw),
        _ => None,
    };

    Some(WalletDelta {
        ui_change: post.token_amount() - pre.token_amount(),
        raw_change,
        decimals: post.decimals,
    })
}

/// Classify one transaction from `wallet`'s point of view
///
/// Returns `None` for transactions that don't move the wallet's balance of
/// `mint` by at least [`NOISE_EPSILON`].
pub fn classify_transaction(
    tx: &ParsedTransaction,
    wallet: &str,
    mint: &str,
    registry: &ProtocolRegistry,
) -> Option<Transaction> {
    let delta = match wallet_delta(tx, wallet, mint) {
        Some(delta) => delta,
        None => {
            log::trace!("{} has no {} balance entries for {}", tx.signature, mint, wallet);
            return None;
        }
    };

    if delta.ui_change.abs() < NOISE_EPSILON {
        log::trace!("{} below noise threshold for {} ({})", tx.signature, wallet, delta.ui_change);
        return None;
    }

    let direction = if delta.ui_change > 0.0 {
        TradeDirection::Buy
    } else {
        TradeDirection::Sell
    };

    let amount = delta.ui_change.abs();
    // Unreadable raw strings: rebuild base units from the token-unit delta
    let raw_amount = match delta.raw_change {
        Some(raw) => raw.unsigned_abs(),
        None => (amount * 10f64.powi(i32::from(delta.decimals))).round() as u128,
    }
    .to_string();

    // Unconfirmed block time: fall back to wall clock
    let block_time = tx.block_time.unwrap_or_else(|| Utc::now().timestamp());
    let timestamp = Utc
        .timestamp_opt(block_time, 0)
        .single()
        .unwrap_or_else(Utc::now);

    Some(Transaction {
        id: tx.signature.clone(),
        wallet_address: wallet.to_string(),
        direction,
        amount,
        raw_amount,
        protocol: registry.attribute(tx.program_ids.as_slice()).to_string(),
        timestamp,
        signature: tx.signature.clone(),
        block_time,
    })
}

pub struct TransactionClassifier {
    ledger: Arc<dyn LedgerClient>,
    registry: ProtocolRegistry,
    mint: String,
    fetch_concurrency: usize,
}

impl TransactionClassifier {
    pub fn new(ledger: Arc<dyn LedgerClient>, mint: &str) -> Self {
        Self {
            ledger,
            registry: ProtocolRegistry::new(),
            mint: mint.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_fetch_concurrency(mut self, limit: usize) -> Self {
        self.fetch_concurrency = limit.max(1);
        self
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    /// Classify the `lookback` most recent transactions touching `wallet`
    ///
    /// Only the signature listing can fail the call. A signature whose
    /// transaction cannot be fetched is skipped and the rest still count.
    /// At most `fetch_concurrency` fetches run at once; results keep
    /// signature order.
    pub async fn classify(
        &self,
        wallet: &str,
        lookback: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let lookback = lookback.min(MAX_LOOKBACK);
        if lookback == 0 {
            return Ok(Vec::new());
        }

        let signatures = self.ledger.list_recent_signatures(wallet, lookback).await?;

        let fetches: Vec<_> = signatures
            .iter()
            .map(|signature| self.ledger.get_parsed_transaction(signature))
            .collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut classified = Vec::new();
        for (signature, result) in signatures.iter().zip(results) {
            match result {
                Ok(Some(tx)) => {
                    if let Some(event) = classify_transaction(&tx, wallet, &self.mint, &self.registry) {
                        classified.push(event);
                    }
                }
                Ok(None) => {
                    log::debug!("Transaction {} not available yet", signature);
                }
                Err(e) => {
                    log::warn!("⚠️  Skipping {} for {}: {}", signature, wallet, e);
                }
            }
        }

        log::debug!(
            "🔍 {} of {} recent transactions classified for {}",
            classified.len(),
            signatures.len(),
            wallet
        );

        Ok(classified)
    }
}
