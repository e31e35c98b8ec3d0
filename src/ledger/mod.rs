//! Ledger client capability
//!
//! Everything the monitor needs from the chain goes through [`LedgerClient`]:
//! holder enumeration, signature history, parsed transaction fetch, mint info
//! and account-change push notifications. The production implementation is
//! [`SolanaLedgerClient`] (HTTP JSON-RPC reads + WebSocket `accountSubscribe`).

pub mod pubsub;
pub mod rpc;
pub mod wire;

pub use rpc::SolanaLedgerClient;

use crate::types::{ParsedTransaction, TokenHolder, TokenInfo};
use async_trait::async_trait;
use solana_pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Invoked with the wallet address whenever its account changes
pub type AccountChangeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Opaque token returned by a subscription, used only to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Http(String),
    Timeout(String),
    Rpc { code: i64, message: String },
    Decode(String),
    InvalidAddress(String),
    Subscription(String),
    UnknownSubscription(SubscriptionHandle),
}

impl LedgerError {
    /// Upstream failures worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Http(_) | LedgerError::Timeout(_) | LedgerError::Rpc { .. } | LedgerError::Subscription(_)
        )
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Http(e) => write!(f, "HTTP error: {}", e),
            LedgerError::Timeout(e) => write!(f, "Request timed out: {}", e),
            LedgerError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            LedgerError::Decode(e) => write!(f, "Decode error: {}", e),
            LedgerError::InvalidAddress(addr) => write!(f, "Invalid address: {}", addr),
            LedgerError::Subscription(e) => write!(f, "Subscription error: {}", e),
            LedgerError::UnknownSubscription(handle) => {
                write!(f, "Unknown subscription handle {}", handle)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout(err.to_string())
        } else if err.is_decode() {
            LedgerError::Decode(err.to_string())
        } else {
            LedgerError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Decode(err.to_string())
    }
}

/// Read queries and push notifications against the chain
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Every token account holding `mint`, one entry per account
    async fn list_token_holders(&self, mint: &str) -> Result<Vec<TokenHolder>, LedgerError>;

    /// Most recent signatures touching `address`, newest first
    async fn list_recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<String>, LedgerError>;

    /// `Ok(None)` when the ledger does not know the signature (yet)
    async fn get_parsed_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, LedgerError>;

    async fn subscribe_to_account_changes(
        &self,
        address: &str,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionHandle, LedgerError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError>;

    /// Whether `handle` still delivers notifications; `false` once its
    /// stream gave up or the handle was cancelled
    fn is_subscription_live(&self, handle: SubscriptionHandle) -> bool;

    async fn get_token_info(&self, mint: &str) -> Result<TokenInfo, LedgerError>;
}

/// Base58 address that decodes to exactly 32 bytes
pub fn is_valid_address(address: &str) -> bool {
    (32..=44).contains(&address.len()) && Pubkey::from_str(address).is_ok()
}
