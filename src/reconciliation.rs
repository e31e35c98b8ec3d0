//! Periodic re-scan of tracked wallets
//!
//! Push notifications can be lost; a pass re-classifies every ranked wallet's
//! most recent activity. Records are keyed by signature, so anything the push
//! path already stored is overwritten with identical values.

use crate::classifier::TransactionClassifier;
use crate::error::MonitorError;
use crate::store::{Store, TransactionStore};
use futures_util::stream::{self, StreamExt};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub wallets: usize,
    /// Classified records written (new or rewritten)
    pub recorded: usize,
    pub failed_wallets: usize,
}

/// Classify `wallet`'s last `lookback` transactions and upsert the results
///
/// Returns the number of records written.
pub async fn record_wallet_activity(
    classifier: &TransactionClassifier,
    store: &dyn Store,
    wallet: &str,
    lookback: usize,
) -> Result<usize, MonitorError> {
    let events = classifier.classify(wallet, lookback).await?;

    for event in &events {
        store.upsert_transaction(event).await?;
        log::debug!(
            "✅ {} {} {:.6} via {} ({})",
            event.wallet_address,
            event.direction,
            event.amount,
            event.protocol,
            event.signature
        );
    }

    Ok(events.len())
}

/// Re-classify the current top `top_n` wallets, `concurrency` at a time
///
/// Per-wallet failures are logged and counted. Only failing to read the
/// ranking aborts the pass.
pub async fn run_pass(
    classifier: &TransactionClassifier,
    store: &dyn Store,
    top_n: usize,
    lookback: usize,
    concurrency: usize,
) -> Result<PassSummary, MonitorError> {
    let wallets = store.list_top_wallets(top_n).await?;
    let mut summary = PassSummary {
        wallets: wallets.len(),
        ..PassSummary::default()
    };

    if wallets.is_empty() {
        log::debug!("🔄 Reconciliation skipped: no ranked wallets");
        return Ok(summary);
    }

    let tasks: Vec<_> = wallets
        .into_iter()
        .map(|wallet| async move {
            let outcome = record_wallet_activity(classifier, store, &wallet.address, lookback).await;
            (wallet.address, outcome)
        })
        .collect();
    let mut results = stream::iter(tasks).buffer_unordered(concurrency.max(1));

    while let Some((address, outcome)) = results.next().await {
        match outcome {
            Ok(count) => summary.recorded += count,
            Err(e) => {
                log::warn!("⚠️  Reconciliation failed for {}: {}", address, e);
                summary.failed_wallets += 1;
            }
        }
    }

    log::info!(
        "🔄 Reconciliation pass: {} wallets, {} records, {} failed",
        summary.wallets,
        summary.recorded,
        summary.failed_wallets
    );
    Ok(summary)
}
