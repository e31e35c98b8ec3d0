//! Monitoring service: owns the run/stop lifecycle
//!
//! `start()` opens the store, runs one discovery cycle inline and then arms
//! three background tasks: the discovery timer, the reconciliation timer and
//! the push worker that classifies wallets flagged by account notifications.
//!
//! `stop()` shuts the store's write gate first (waiting for in-flight writes),
//! then aborts the tasks, cancels every subscription and closes the store.

use crate::classifier::{TransactionClassifier, MAX_LOOKBACK};
use crate::config::MonitorConfig;
use crate::dashboard::build_dashboard_snapshot;
use crate::discovery::DiscoveryScheduler;
use crate::error::MonitorError;
use crate::ledger::{is_valid_address, AccountChangeCallback, LedgerClient, LedgerError};
use crate::reconciliation::{record_wallet_activity, run_pass, PassSummary};
use crate::store::{GatedStore, Store, TransactionStore, WalletStore};
use crate::subscriptions::SubscriptionManager;
use crate::types::{DashboardSnapshot, ProtocolStats, TokenInfo, Transaction, Wallet};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Components shared with the background tasks
struct Core {
    config: MonitorConfig,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<GatedStore>,
    classifier: TransactionClassifier,
    discovery: DiscoveryScheduler,
    subscriptions: SubscriptionManager,
}

impl Core {
    /// Discovery followed by subscription reconciliation against the new top-K
    ///
    /// Ledger failures skip the cycle; store failures are returned.
    async fn discovery_cycle(&self, on_change: &AccountChangeCallback) -> Result<(), MonitorError> {
        let ranked = match self.discovery.discover().await {
            Ok(ranked) => ranked,
            Err(MonitorError::Ledger(e)) => {
                log::warn!("⚠️  Discovery cycle skipped: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let top_k: Vec<String> = ranked
            .iter()
            .take(self.config.subscription_top_k)
            .map(|w| w.address.clone())
            .collect();

        self.subscriptions.reconcile(&top_k, on_change.clone()).await;
        Ok(())
    }

    /// Reopen dead subscriptions, then re-classify the ranked wallets
    async fn reconciliation_pass(&self, on_change: &AccountChangeCallback) -> Result<PassSummary, MonitorError> {
        self.subscriptions.resubscribe_dead(on_change.clone()).await;
        run_pass(
            &self.classifier,
            &*self.store,
            self.config.discovery_target_count,
            self.config.reconcile_lookback,
            self.config.reconcile_concurrency,
        )
        .await
    }
}

/// Handles for everything `start()` spawned
struct Workers {
    shutdown: watch::Sender<bool>,
    on_change: AccountChangeCallback,
    tasks: Vec<JoinHandle<()>>,
}

pub struct MonitoringService {
    core: Arc<Core>,
    state: Mutex<ServiceState>,
    workers: tokio::sync::Mutex<Option<Workers>>,
}

impl MonitoringService {
    pub fn new(config: MonitorConfig, ledger: Arc<dyn LedgerClient>, store: Arc<dyn Store>) -> Self {
        let store = Arc::new(GatedStore::new(store));
        let classifier = TransactionClassifier::new(ledger.clone(), &config.target_mint)
            .with_fetch_concurrency(config.fetch_concurrency);
        let discovery = DiscoveryScheduler::new(
            ledger.clone(),
            store.clone(),
            &config.target_mint,
            config.discovery_target_count,
        );
        let subscriptions = SubscriptionManager::new(ledger.clone());

        Self {
            core: Arc::new(Core {
                config,
                ledger,
                store,
                classifier,
                discovery,
                subscriptions,
            }),
            state: Mutex::new(ServiceState::Stopped),
            workers: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_running(&self) -> Result<(), MonitorError> {
        match self.state() {
            ServiceState::Running => Ok(()),
            _ => Err(MonitorError::NotRunning),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.core.config
    }

    /// Start monitoring; a no-op when already running
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            log::debug!("Monitoring service already running");
            return Ok(());
        }

        self.set_state(ServiceState::Starting);
        log::info!("🚀 Starting monitoring service for {}", self.core.config.target_mint);

        if let Err(e) = self.core.store.ready().await {
            log::error!("❌ Store not ready: {}", e);
            self.set_state(ServiceState::Stopped);
            return Err(e.into());
        }

        let (push_tx, push_rx) = mpsc::channel(self.core.config.push_channel_buffer.max(1));
        let on_change = push_callback(push_tx);

        if let Err(e) = self.core.discovery_cycle(&on_change).await {
            log::error!("❌ Initial discovery failed: {}", e);
            self.core.subscriptions.cancel_all().await;
            if let Err(close_err) = self.core.store.close().await {
                log::warn!("⚠️  Failed to close store: {}", close_err);
            }
            self.set_state(ServiceState::Stopped);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(push_worker(self.core.clone(), push_rx, shutdown_rx.clone())),
            tokio::spawn(discovery_timer(self.core.clone(), on_change.clone(), shutdown_rx.clone())),
            tokio::spawn(reconciliation_timer(self.core.clone(), on_change.clone(), shutdown_rx)),
        ];

        *workers = Some(Workers {
            shutdown: shutdown_tx,
            on_change,
            tasks,
        });
        self.set_state(ServiceState::Running);

        log::info!(
            "✅ Monitoring service running (discovery every {}s, reconciliation every {}s)",
            self.core.config.discovery_interval.as_secs(),
            self.core.config.reconcile_interval.as_secs()
        );
        Ok(())
    }

    /// Stop monitoring; no store write happens after this returns
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let mut workers = self.workers.lock().await;
        let running = match workers.take() {
            Some(running) => running,
            None => return Err(MonitorError::NotRunning),
        };

        self.set_state(ServiceState::Stopping);
        log::info!("🛑 Stopping monitoring service...");

        let _ = running.shutdown.send(true);
        self.core.store.close_writes().await;

        for task in &running.tasks {
            task.abort();
        }
        for task in running.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::warn!("⚠️  Background task ended abnormally: {}", e);
                }
            }
        }

        self.core.subscriptions.cancel_all().await;
        let closed = self.core.store.close().await;

        self.set_state(ServiceState::Stopped);
        log::info!("✅ Monitoring service stopped");
        closed.map_err(MonitorError::from)
    }

    pub async fn get_dashboard_snapshot(&self) -> Result<DashboardSnapshot, MonitorError> {
        self.ensure_running()?;
        let snapshot =
            build_dashboard_snapshot(&*self.core.store, self.core.config.dashboard_recent_limit).await?;
        Ok(snapshot)
    }

    pub async fn top_wallets(&self, limit: usize) -> Result<Vec<Wallet>, MonitorError> {
        self.ensure_running()?;
        Ok(self.core.store.list_top_wallets(limit).await?)
    }

    pub async fn recent_transactions(
        &self,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, MonitorError> {
        self.ensure_running()?;
        Ok(self.core.store.query_transactions(limit, start, end).await?)
    }

    pub async fn protocol_stats(&self) -> Result<Vec<ProtocolStats>, MonitorError> {
        self.ensure_running()?;
        Ok(self.core.store.aggregate_by_protocol().await?)
    }

    pub async fn token_info(&self) -> Result<TokenInfo, MonitorError> {
        self.ensure_running()?;
        Ok(self.core.ledger.get_token_info(&self.core.config.target_mint).await?)
    }

    /// Classify up to `lookback` (capped at [`MAX_LOOKBACK`]) past transactions of one wallet
    ///
    /// Returns the number of records written.
    pub async fn backfill_wallet(&self, address: &str, lookback: usize) -> Result<usize, MonitorError> {
        self.ensure_running()?;
        if !is_valid_address(address) {
            return Err(LedgerError::InvalidAddress(address.to_string()).into());
        }

        let lookback = lookback.min(MAX_LOOKBACK);
        log::info!("🔍 Backfilling {} (lookback {})", address, lookback);

        let recorded =
            record_wallet_activity(&self.core.classifier, &*self.core.store, address, lookback).await?;
        log::info!("✅ Backfill stored {} records for {}", recorded, address);
        Ok(recorded)
    }

    async fn change_callback(&self) -> Result<AccountChangeCallback, MonitorError> {
        self.ensure_running()?;
        self.workers
            .lock()
            .await
            .as_ref()
            .map(|w| w.on_change.clone())
            .ok_or(MonitorError::NotRunning)
    }

    /// Run a discovery cycle now instead of waiting for the timer
    pub async fn run_discovery(&self) -> Result<(), MonitorError> {
        let on_change = self.change_callback().await?;
        self.core.discovery_cycle(&on_change).await
    }

    /// Run a reconciliation pass now instead of waiting for the timer
    pub async fn run_reconciliation(&self) -> Result<PassSummary, MonitorError> {
        let on_change = self.change_callback().await?;
        self.core.reconciliation_pass(&on_change).await
    }

    pub async fn active_subscriptions(&self) -> Result<Vec<String>, MonitorError> {
        self.ensure_running()?;
        Ok(self.core.subscriptions.active_addresses().await)
    }
}

/// Change callback that queues the wallet for the push worker
fn push_callback(queue: mpsc::Sender<String>) -> AccountChangeCallback {
    Arc::new(move |address: &str| match queue.try_send(address.to_string()) {
        Ok(()) => {}
        Err(TrySendError::Full(wallet)) => {
            log::warn!("⚠️  Push queue full, dropping change for {} until next reconciliation", wallet);
        }
        Err(TrySendError::Closed(wallet)) => {
            log::debug!("Push queue closed, ignoring change for {}", wallet);
        }
    })
}

async fn push_worker(
    core: Arc<Core>,
    mut queue: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(wallet) = queue.recv() => {
                let core = core.clone();
                in_flight.spawn(async move {
                    match record_wallet_activity(
                        &core.classifier,
                        &*core.store,
                        &wallet,
                        core.config.push_lookback,
                    )
                    .await
                    {
                        Ok(count) => log::debug!("📡 Push for {} recorded {} transactions", wallet, count),
                        Err(e) => log::warn!("⚠️  Push classification failed for {}: {}", wallet, e),
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if !e.is_cancelled() {
                        log::error!("❌ Push classification task panicked: {}", e);
                    }
                }
            }
            else => break,
        }
    }

    in_flight.abort_all();
}

async fn discovery_timer(
    core: Arc<Core>,
    on_change: AccountChangeCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = core.config.discovery_interval;
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = timer.tick() => {
                if let Err(e) = core.discovery_cycle(&on_change).await {
                    log::error!("❌ Discovery cycle failed: {}", e);
                }
            }
        }
    }
}

async fn reconciliation_timer(
    core: Arc<Core>,
    on_change: AccountChangeCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = core.config.reconcile_interval;
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = timer.tick() => {
                if let Err(e) = core.reconciliation_pass(&on_change).await {
                    log::error!("❌ Reconciliation pass failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::tests::{balance_change, FakeLedger, MINT, WALLET_A, WALLET_B, WALLET_C};
    use crate::types::{TokenHolder, TradeDirection};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn holder(owner: &str, balance: f64) -> TokenHolder {
        TokenHolder {
            owner: owner.to_string(),
            balance,
            raw_quantity: format!("{}", (balance * 1_000_000.0) as u128),
        }
    }

    fn test_config(dir: &TempDir) -> MonitorConfig {
        MonitorConfig {
            target_mint: MINT.to_string(),
            db_path: dir.path().join("monitor.db").to_string_lossy().into_owned(),
            discovery_target_count: 3,
            subscription_top_k: 2,
            ..MonitorConfig::default()
        }
    }

    fn service(dir: &TempDir, ledger: Arc<FakeLedger>) -> MonitoringService {
        let config = test_config(dir);
        let store = Arc::new(SqliteStore::new(&config.db_path));
        MonitoringService::new(config, ledger, store)
    }

    async fn wait_for_transactions(service: &MonitoringService, count: usize) -> Vec<Transaction> {
        for _ in 0..100 {
            let txs = service.recent_transactions(50, None, None).await.unwrap();
            if txs.len() >= count {
                return txs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {} transactions", count);
    }

    #[tokio::test]
    async fn test_operations_rejected_while_stopped() {
        let dir = tempdir().unwrap();
        let service = service(&dir, Arc::new(FakeLedger::new()));

        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(matches!(service.get_dashboard_snapshot().await, Err(MonitorError::NotRunning)));
        assert!(matches!(service.top_wallets(10).await, Err(MonitorError::NotRunning)));
        assert!(matches!(service.backfill_wallet(WALLET_A, 5).await, Err(MonitorError::NotRunning)));
        assert!(matches!(service.stop().await, Err(MonitorError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_discovers_and_subscribes_top_k() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder(WALLET_A, 100.0), holder(WALLET_B, 80.0), holder(WALLET_C, 50.0)]);

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        let top = service.top_wallets(10).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].address, WALLET_A);

        let mut expected = vec![WALLET_A.to_string(), WALLET_B.to_string()];
        expected.sort();
        assert_eq!(service.active_subscriptions().await.unwrap(), expected);
        assert_eq!(ledger.subscribed_addresses(), expected);

        // second start is a no-op
        service.start().await.unwrap();
        assert_eq!(ledger.subscribe_calls(), 2);

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(ledger.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_push_notification_records_sell() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder(WALLET_A, 100.0), holder(WALLET_B, 80.0)]);

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();

        ledger.add_transaction(WALLET_A, balance_change("sig-sell", WALLET_A, 100.0, 90.0));
        assert_eq!(ledger.notify(WALLET_A), 1);

        let txs = wait_for_transactions(&service, 1).await;
        assert_eq!(txs[0].direction, TradeDirection::Sell);
        assert!((txs[0].amount - 10.0).abs() < 1e-9);
        assert_eq!(txs[0].protocol, "Raydium");

        let snapshot = service.get_dashboard_snapshot().await.unwrap();
        assert_eq!(snapshot.totals.total_sells, 1);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_failure_at_start_is_not_fatal() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.fail_next_holders(LedgerError::Timeout("getProgramAccounts".into()));

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();

        assert!(service.top_wallets(10).await.unwrap().is_empty());
        assert!(service.active_subscriptions().await.unwrap().is_empty());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_at_start_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let config = MonitorConfig {
            target_mint: MINT.to_string(),
            ..MonitorConfig::default()
        };
        let store = Arc::new(SqliteStore::new(blocker.join("db").join("monitor.db")));
        let service = MonitoringService::new(config, Arc::new(FakeLedger::new()), store);

        assert!(matches!(service.start().await, Err(MonitorError::Store(_))));
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder(WALLET_A, 10.0)]);

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();
        service.stop().await.unwrap();
        assert!(matches!(service.top_wallets(1).await, Err(MonitorError::NotRunning)));

        service.start().await.unwrap();
        assert_eq!(service.top_wallets(5).await.unwrap().len(), 1);
        assert_eq!(ledger.subscription_count(), 1);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_backfill_validates_and_caps() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.add_transaction(WALLET_C, balance_change("sig-buy", WALLET_C, 0.5, 3.0));

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();

        let err = service.backfill_wallet("bogus", 10).await.unwrap_err();
        assert!(matches!(err, MonitorError::Ledger(LedgerError::InvalidAddress(_))));

        assert_eq!(service.backfill_wallet(WALLET_C, 5_000).await.unwrap(), 1);
        let stats = service.protocol_stats().await.unwrap();
        assert_eq!(stats[0].buy_count, 1);

        let info = service.token_info().await.unwrap();
        assert_eq!(info.address, MINT);
        service.stop().await.unwrap();
    }

    /// Yield to the background tasks until `done` holds, on the paused clock
    async fn settle(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        done()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_and_stop_cancels_them() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder(WALLET_A, 100.0), holder(WALLET_B, 80.0), holder(WALLET_C, 50.0)]);

        let config = MonitorConfig {
            discovery_interval: Duration::from_secs(600),
            reconcile_interval: Duration::from_secs(60),
            ..test_config(&dir)
        };
        let store = Arc::new(SqliteStore::new(&config.db_path));
        let service = MonitoringService::new(config, ledger.clone(), store);

        service.start().await.unwrap();
        assert_eq!(ledger.holder_calls(), 1);
        assert_eq!(ledger.signature_calls(), 0);

        // One reconciliation tick re-reads every ranked wallet
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(settle(|| ledger.signature_calls() >= 3).await);
        assert_eq!(ledger.holder_calls(), 1);

        tokio::time::advance(Duration::from_secs(540)).await;
        assert!(settle(|| ledger.holder_calls() >= 2).await);

        service.stop().await.unwrap();
        let holders_at_stop = ledger.holder_calls();
        let signatures_at_stop = ledger.signature_calls();

        tokio::time::advance(Duration::from_secs(3_600)).await;
        settle(|| false).await;
        assert_eq!(ledger.holder_calls(), holders_at_stop);
        assert_eq!(ledger.signature_calls(), signatures_at_stop);
    }

    #[tokio::test]
    async fn test_reconciliation_reopens_dead_subscription() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_holders(vec![holder(WALLET_A, 100.0), holder(WALLET_B, 80.0)]);

        let service = service(&dir, ledger.clone());
        service.start().await.unwrap();
        assert_eq!(ledger.drop_stream(WALLET_A), 1);

        service.run_reconciliation().await.unwrap();
        assert_eq!(ledger.subscribe_calls(), 3);

        ledger.add_transaction(WALLET_A, balance_change("sig-after-revive", WALLET_A, 100.0, 120.0));
        assert_eq!(ledger.notify(WALLET_A), 1);
        let txs = wait_for_transactions(&service, 1).await;
        assert_eq!(txs[0].direction, TradeDirection::Buy);

        service.stop().await.unwrap();
    }
}
