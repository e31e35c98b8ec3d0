//! HTTP JSON-RPC ledger client
//!
//! Reads go through a single `reqwest::Client` whose timeout bounds every call;
//! an expired request surfaces as [`LedgerError::Timeout`]. Push subscriptions
//! are delegated to [`AccountPubsub`].

use super::pubsub::AccountPubsub;
use super::wire::{
    KeyedTokenAccount, MintAccountResult, RpcEnvelope, SignatureInfoWire, TransactionResultWire,
};
use super::{AccountChangeCallback, LedgerClient, LedgerError, SubscriptionHandle};
use crate::types::{ParsedTransaction, TokenHolder, TokenInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// SPL Token program (owner of every classic token account)
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Byte size of an SPL token account; the mint sits at offset 0
const TOKEN_ACCOUNT_SIZE: u64 = 165;

const COMMITMENT: &str = "confirmed";

pub struct SolanaLedgerClient {
    http: reqwest::Client,
    rpc_url: String,
    request_id: AtomicU64,
    pubsub: AccountPubsub,
}

impl SolanaLedgerClient {
    /// Create a client for `rpc_url` (reads) and `ws_url` (subscriptions)
    ///
    /// `timeout` bounds each HTTP request and each WebSocket connect.
    pub fn new(rpc_url: &str, ws_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            request_id: AtomicU64::new(1),
            pubsub: AccountPubsub::new(ws_url, timeout),
        })
    }

    pub fn active_subscriptions(&self) -> usize {
        self.pubsub.active_count()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.rpc_url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(LedgerError::Http(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let envelope: RpcEnvelope<T> = response.json().await?;
        envelope.into_result()
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    async fn list_token_holders(&self, mint: &str) -> Result<Vec<TokenHolder>, LedgerError> {
        let params = json!([
            TOKEN_PROGRAM_ID,
            {
                "encoding": "jsonParsed",
                "commitment": COMMITMENT,
                "filters": [
                    { "dataSize": TOKEN_ACCOUNT_SIZE },
                    { "memcmp": { "offset": 0, "bytes": mint } }
                ]
            }
        ]);

        let accounts: Vec<KeyedTokenAccount> = self
            .call("getProgramAccounts", params)
            .await?
            .unwrap_or_default();

        let total = accounts.len();
        let holders: Vec<TokenHolder> = accounts
            .into_iter()
            .filter_map(KeyedTokenAccount::into_holder)
            .collect();

        log::debug!("Fetched {} token accounts ({} parsed) for {}", total, holders.len(), mint);
        Ok(holders)
    }

    async fn list_recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<String>, LedgerError> {
        let params = json!([address, { "limit": limit, "commitment": COMMITMENT }]);

        let infos: Vec<SignatureInfoWire> = self
            .call("getSignaturesForAddress", params)
            .await?
            .unwrap_or_default();

        Ok(infos.into_iter().map(|info| info.signature).collect())
    }

    async fn get_parsed_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, LedgerError> {
        let params = json!([
            signature,
            {
                "encoding": "jsonParsed",
                "commitment": COMMITMENT,
                "maxSupportedTransactionVersion": 0
            }
        ]);

        let result: Option<TransactionResultWire> = self.call("getTransaction", params).await?;
        Ok(result.and_then(|tx| tx.into_parsed(signature)))
    }

    async fn subscribe_to_account_changes(
        &self,
        address: &str,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionHandle, LedgerError> {
        self.pubsub.subscribe(address, callback).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError> {
        self.pubsub.unsubscribe(handle).await
    }

    fn is_subscription_live(&self, handle: SubscriptionHandle) -> bool {
        self.pubsub.is_live(handle)
    }

    async fn get_token_info(&self, mint: &str) -> Result<TokenInfo, LedgerError> {
        let params = json!([mint, { "encoding": "jsonParsed", "commitment": COMMITMENT }]);

        let result: MintAccountResult = self
            .call("getAccountInfo", params)
            .await?
            .ok_or_else(|| LedgerError::Decode(format!("Empty getAccountInfo result for {}", mint)))?;

        result.into_token_info(mint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        // Port 9 (discard) on localhost refuses connections on any sane test host
        let client = SolanaLedgerClient::new(
            "http://127.0.0.1:9",
            "ws://127.0.0.1:9",
            Duration::from_millis(500),
        )
        .unwrap();

        let err = client.list_recent_signatures("11111111111111111111111111111111", 5).await;
        assert!(err.is_err());
        assert!(err.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unknown_handle_rejected() {
        let client = SolanaLedgerClient::new(
            "http://127.0.0.1:9",
            "ws://127.0.0.1:9",
            Duration::from_millis(500),
        )
        .unwrap();

        let result = client.unsubscribe(SubscriptionHandle(42)).await;
        assert!(matches!(result, Err(LedgerError::UnknownSubscription(SubscriptionHandle(42)))));
        assert_eq!(client.active_subscriptions(), 0);
    }
}
