use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokenwise::ledger::SolanaLedgerClient;
use tokenwise::protocols::ProtocolRegistry;
use tokenwise::store::SqliteStore;
use tokenwise::{MonitorConfig, MonitoringService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    // reqwest and tokio-tungstenite both pull rustls; pin one provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = MonitorConfig::from_env()?;
    let registry = ProtocolRegistry::new();

    info!("🚀 TokenWise holder monitor");
    info!("📊 Configuration:");
    info!("   ├─ RPC: {}", config.rpc_url);
    info!("   ├─ WebSocket: {}", config.ws_url);
    info!("   ├─ Token: {}", config.target_mint);
    info!("   ├─ Database: {}", config.db_path);
    info!(
        "   ├─ Holders: top {} ranked, top {} subscribed",
        config.discovery_target_count, config.subscription_top_k
    );
    info!(
        "   ├─ Intervals: discovery {}s, reconciliation {}s",
        config.discovery_interval.as_secs(),
        config.reconcile_interval.as_secs()
    );
    info!("   └─ Venues: {}", registry.venues().join(", "));

    let ledger = Arc::new(SolanaLedgerClient::new(
        &config.rpc_url,
        &config.ws_url,
        config.rpc_timeout,
    )?);
    let store = Arc::new(SqliteStore::new(&config.db_path));

    let service = MonitoringService::new(config, ledger, store);
    service.start().await?;

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    service.stop().await?;
    info!("✅ TokenWise stopped");
    Ok(())
}
