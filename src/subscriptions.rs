//! Live account-change subscriptions for the top-K holders
//!
//! The manager owns the wallet -> handle map. `reconcile()` holds the map lock
//! from start to finish, so concurrent calls run one after another and each
//! sees the result of the previous one. Handles whose stream died are purged
//! before every reconcile, so the map only holds live subscriptions.

use crate::ledger::{is_valid_address, AccountChangeCallback, LedgerClient, SubscriptionHandle};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What one `reconcile()` call changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub subscribed: usize,
    pub cancelled: usize,
    /// Addresses rejected as malformed
    pub skipped: usize,
    /// Valid addresses whose subscribe call failed
    pub failed: usize,
    /// Dead handles purged before reconciling
    pub dead: usize,
}

pub struct SubscriptionManager {
    ledger: Arc<dyn LedgerClient>,
    active: Mutex<HashMap<String, SubscriptionHandle>>,
}

impl SubscriptionManager {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Make the active set match the valid addresses in `top_k`
    pub async fn reconcile(
        &self,
        top_k: &[String],
        on_change: AccountChangeCallback,
    ) -> ReconcileSummary {
        let mut active = self.active.lock().await;
        let mut summary = ReconcileSummary {
            dead: self.purge_dead(&mut active).await,
            ..ReconcileSummary::default()
        };
        let wanted: HashSet<&str> = top_k.iter().map(String::as_str).collect();

        let stale: Vec<String> = active
            .keys()
            .filter(|address| !wanted.contains(address.as_str()))
            .cloned()
            .collect();

        for address in stale {
            if let Some(handle) = active.remove(&address) {
                if let Err(e) = self.ledger.unsubscribe(handle).await {
                    log::warn!("⚠️  Failed to cancel subscription {} for {}: {}", handle, address, e);
                }
                summary.cancelled += 1;
            }
        }

        for address in top_k {
            if active.contains_key(address) {
                continue;
            }

            if !is_valid_address(address) {
                log::warn!("⚠️  Skipping malformed wallet address: {}", address);
                summary.skipped += 1;
                continue;
            }

            match self
                .ledger
                .subscribe_to_account_changes(address, on_change.clone())
                .await
            {
                Ok(handle) => {
                    active.insert(address.clone(), handle);
                    summary.subscribed += 1;
                }
                Err(e) => {
                    log::warn!("⚠️  Failed to subscribe to {}: {}", address, e);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "📡 Subscriptions reconciled: {} active (+{} -{}, {} dead, {} skipped, {} failed)",
            active.len(),
            summary.subscribed,
            summary.cancelled,
            summary.dead,
            summary.skipped,
            summary.failed
        );

        summary
    }

    /// Re-open every subscription whose stream has died, keeping the set
    pub async fn resubscribe_dead(&self, on_change: AccountChangeCallback) -> ReconcileSummary {
        let current: Vec<String> = {
            let active = self.active.lock().await;
            let any_dead = active
                .values()
                .any(|handle| !self.ledger.is_subscription_live(*handle));
            if !any_dead {
                return ReconcileSummary::default();
            }
            active.keys().cloned().collect()
        };
        self.reconcile(&current, on_change).await
    }

    /// Drop entries whose stream is gone; returns how many
    async fn purge_dead(&self, active: &mut HashMap<String, SubscriptionHandle>) -> usize {
        let dead: Vec<(String, SubscriptionHandle)> = active
            .iter()
            .filter(|(_, handle)| !self.ledger.is_subscription_live(**handle))
            .map(|(address, handle)| (address.clone(), *handle))
            .collect();

        for (address, handle) in &dead {
            active.remove(address);
            log::warn!("⚠️  Subscription {} for {} is dead, resubscribing", handle, address);
            if let Err(e) = self.ledger.unsubscribe(*handle).await {
                log::debug!("Releasing dead subscription {}: {}", handle, e);
            }
        }
        dead.len()
    }

    /// Cancel every subscription; cancel errors are logged and the handle dropped
    pub async fn cancel_all(&self) -> usize {
        let mut active = self.active.lock().await;
        let count = active.len();

        for (address, handle) in active.drain() {
            if let Err(e) = self.ledger.unsubscribe(handle).await {
                log::warn!("⚠️  Failed to cancel subscription {} for {}: {}", handle, address, e);
            }
        }

        if count > 0 {
            log::info!("🛑 Cancelled {} subscriptions", count);
        }
        count
    }

    /// Currently subscribed wallets, sorted
    pub async fn active_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.active.lock().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}
