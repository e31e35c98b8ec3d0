//! One-shot holder ranking for the configured token, nothing persisted
//!
//! Prints `rank address balance raw_quantity`, one holder per line, then the
//! mint's supply and decimals.

use dotenv::dotenv;
use log::info;
use std::sync::Arc;
use tokenwise::discovery::rank_holders;
use tokenwise::ledger::{LedgerClient, SolanaLedgerClient};
use tokenwise::MonitorConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = MonitorConfig::from_env()?;
    let ledger = Arc::new(SolanaLedgerClient::new(
        &config.rpc_url,
        &config.ws_url,
        config.rpc_timeout,
    )?);

    info!("🔍 Scanning holders of {}", config.target_mint);
    let holders = ledger.list_token_holders(&config.target_mint).await?;
    let account_count = holders.len();
    let ranked = rank_holders(holders, config.discovery_target_count, chrono::Utc::now());

    for wallet in &ranked {
        println!(
            "{:>3}  {:<44}  {:>20.6}  {}",
            wallet.rank, wallet.address, wallet.balance, wallet.raw_quantity
        );
    }

    match ledger.get_token_info(&config.target_mint).await {
        Ok(info) => println!("supply {} (decimals {})", info.supply, info.decimals),
        Err(e) => log::warn!("⚠️  Token info unavailable: {}", e),
    }

    info!("✅ {} holders ranked from {} token accounts", ranked.len(), account_count);
    Ok(())
}
