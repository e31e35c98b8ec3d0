//! Print the dashboard snapshot of an existing database as JSON
//!
//! Usage: dashboard_snapshot [DB_PATH]
//! Falls back to TOKENWISE_DB_PATH, then ./data/tokenwise.db.

use dotenv::dotenv;
use std::env;
use std::path::Path;
use tokenwise::dashboard::build_dashboard_snapshot;
use tokenwise::store::SqliteStore;
use tokenwise::MonitorConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let defaults = MonitorConfig::default();
    let db_path = env::args()
        .nth(1)
        .or_else(|| env::var("TOKENWISE_DB_PATH").ok())
        .unwrap_or(defaults.db_path);

    if !Path::new(&db_path).exists() {
        return Err(format!("Database not found: {}", db_path).into());
    }

    let limit = env::var("DASHBOARD_RECENT_LIMIT")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(defaults.dashboard_recent_limit);

    let store = SqliteStore::open(&db_path)?;
    let snapshot = build_dashboard_snapshot(&store, limit).await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
