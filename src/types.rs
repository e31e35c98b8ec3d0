//! Core records shared by discovery, classification, the store and the dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Net effect of a classified transaction on the wallet's token balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeDirection::Buy),
            "sell" => Ok(TradeDirection::Sell),
            other => Err(format!("unknown trade direction: {}", other)),
        }
    }
}

/// A ranked holder of the tracked token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: String,
    /// Balance in token units (already scaled by decimals)
    pub balance: f64,
    /// Raw integer quantity as reported on chain
    pub raw_quantity: String,
    /// 1 = largest holder
    pub rank: u32,
    pub last_updated: DateTime<Utc>,
}

/// A classified buy/sell event, keyed by its ledger signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub wallet_address: String,
    pub direction: TradeDirection,
    pub amount: f64,
    pub raw_amount: String,
    pub protocol: String,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
    pub block_time: i64,
}

/// One token account holding the target mint, as enumerated by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct TokenHolder {
    pub owner: String,
    pub balance: f64,
    pub raw_quantity: String,
}

/// Token balance entry from a transaction's pre/post balance lists
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalanceEntry {
    pub account_index: u32,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_amount: Option<f64>,
    pub amount: String,
    pub decimals: u8,
}

impl TokenBalanceEntry {
    /// Balance in token units, derived from the raw amount when the RPC omits `uiAmount`
    pub fn token_amount(&self) -> f64 {
        match self.ui_amount {
            Some(ui) => ui,
            None => {
                let raw = self.amount.parse::<f64>().unwrap_or(0.0);
                raw / 10f64.powi(self.decimals as i32)
            }
        }
    }
}

/// The parts of a fetched transaction the classifier needs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedTransaction {
    pub signature: String,
    pub block_time: Option<i64>,
    /// Program ids of the top-level instructions, in order
    pub program_ids: Vec<String>,
    pub pre_token_balances: Vec<TokenBalanceEntry>,
    pub post_token_balances: Vec<TokenBalanceEntry>,
}

/// Mint-level information for the tracked token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
    pub supply: String,
}

/// Buy/sell totals across all stored transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTotals {
    pub total_buys: u64,
    pub total_sells: u64,
    pub active_wallets: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolStats {
    pub protocol: String,
    pub buy_count: u64,
    pub sell_count: u64,
    pub total_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetDirection {
    #[serde(rename = "buy-heavy")]
    BuyHeavy,
    #[serde(rename = "sell-heavy")]
    SellHeavy,
    #[serde(rename = "neutral")]
    Neutral,
}

impl NetDirection {
    pub fn from_counts(buys: u64, sells: u64) -> Self {
        if buys > sells {
            NetDirection::BuyHeavy
        } else if sells > buys {
            NetDirection::SellHeavy
        } else {
            NetDirection::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetDirection::BuyHeavy => "buy-heavy",
            NetDirection::SellHeavy => "sell-heavy",
            NetDirection::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub totals: DashboardTotals,
    pub net_direction: NetDirection,
    pub per_protocol: Vec<ProtocolStats>,
    pub recent: Vec<Transaction>,
}
