//! WebSocket `accountSubscribe` streams
//!
//! Each subscription owns one socket and one task. A socket only counts as
//! subscribed once the server acks `accountSubscribe`; an error reply fails
//! the call. The task forwards every `accountNotification` to the callback,
//! reconnects under a [`ReconnectPolicy`] when the socket drops, and sends
//! `accountUnsubscribe` when its handle is cancelled. A task that gave up
//! leaves its handle registered but no longer live.

use super::{AccountChangeCallback, LedgerError, SubscriptionHandle};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;

/// Doubling delay between reconnect attempts of a dropped stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Attempts after which the stream is abandoned
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct ActiveSubscription {
    address: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct AccountPubsub {
    ws_url: String,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
    next_handle: AtomicU64,
    active: Mutex<HashMap<SubscriptionHandle, ActiveSubscription>>,
}

impl AccountPubsub {
    pub fn new(ws_url: &str, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            connect_timeout,
            reconnect: ReconnectPolicy::default(),
            next_handle: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Open a socket for `address` and start forwarding notifications
    ///
    /// Connect and the subscribe ack happen inline, so a dead endpoint or a
    /// rejected subscription fails the call instead of producing a handle
    /// that never fires.
    pub async fn subscribe(
        &self,
        address: &str,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionHandle, LedgerError> {
        let (ws, subscription_id) =
            open_account_stream(&self.ws_url, address, self.connect_timeout).await?;

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let stream = AccountStream {
            address: address.to_string(),
            ws_url: self.ws_url.clone(),
            connect_timeout: self.connect_timeout,
            policy: self.reconnect,
            callback,
        };
        let task = tokio::spawn(stream.run(ws, subscription_id, shutdown_rx));

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                handle,
                ActiveSubscription {
                    address: address.to_string(),
                    shutdown: shutdown_tx,
                    task,
                },
            );

        log::debug!("📡 accountSubscribe {} -> handle {} (server id {})", address, handle, subscription_id);
        Ok(handle)
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), LedgerError> {
        let entry = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .ok_or(LedgerError::UnknownSubscription(handle))?;

        // The task sends accountUnsubscribe and closes the socket on its own.
        // If it already exited the send fails, which is fine.
        if entry.shutdown.send(()).is_err() {
            log::debug!("Subscription {} for {} had already ended", handle, entry.address);
        }
        Ok(())
    }

    /// Registered and its stream task still running
    pub fn is_live(&self, handle: SubscriptionHandle) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .map_or(false, |entry| !entry.task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for AccountPubsub {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in active.drain() {
            entry.task.abort();
        }
    }
}

/// Server frames the stream task cares about
#[derive(Debug, PartialEq)]
enum PubsubFrame {
    /// Ack of `accountSubscribe` carrying the server-side subscription id
    Subscribed(u64),
    /// Error reply to one of our requests
    Rejected { code: i64, message: String },
    AccountNotification,
    Other,
}

fn parse_frame(text: &str) -> PubsubFrame {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Skipping invalid pubsub frame: {}", e);
            return PubsubFrame::Other;
        }
    };

    if value.get("method").and_then(Value::as_str) == Some("accountNotification") {
        return PubsubFrame::AccountNotification;
    }

    if let Some(error) = value.get("error") {
        return PubsubFrame::Rejected {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        };
    }

    match (value.get("id"), value.get("result").and_then(Value::as_u64)) {
        (Some(_), Some(subscription_id)) => PubsubFrame::Subscribed(subscription_id),
        _ => PubsubFrame::Other,
    }
}

/// Connect, send `accountSubscribe` and wait for its ack, all within `timeout`
async fn open_account_stream(
    ws_url: &str,
    address: &str,
    timeout: Duration,
) -> Result<(WsStream, u64), LedgerError> {
    tokio::time::timeout(timeout, subscribe_handshake(ws_url, address))
        .await
        .map_err(|_| LedgerError::Timeout(format!("accountSubscribe {} via {}", address, ws_url)))?
}

async fn subscribe_handshake(ws_url: &str, address: &str) -> Result<(WsStream, u64), LedgerError> {
    let (mut ws, _response) = connect_async(ws_url)
        .await
        .map_err(|e| LedgerError::Subscription(format!("connect {}: {}", ws_url, e)))?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "accountSubscribe",
        "params": [address, { "encoding": "jsonParsed", "commitment": "confirmed" }]
    });

    ws.send(Message::Text(request.to_string().into()))
        .await
        .map_err(|e| LedgerError::Subscription(format!("accountSubscribe {}: {}", address, e)))?;

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => match parse_frame(&text) {
                PubsubFrame::Subscribed(id) => return Ok((ws, id)),
                PubsubFrame::Rejected { code, message } => {
                    let _ = ws.close(None).await;
                    return Err(LedgerError::Rpc { code, message });
                }
                PubsubFrame::AccountNotification | PubsubFrame::Other => {}
            },
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(frame)) => {
                return Err(LedgerError::Subscription(format!(
                    "closed before accountSubscribe ack: {:?}",
                    frame
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(LedgerError::Subscription(format!("accountSubscribe {}: {}", address, e))),
        }
    }

    Err(LedgerError::Subscription(format!(
        "stream ended before accountSubscribe ack for {}",
        address
    )))
}

struct AccountStream {
    address: String,
    ws_url: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    callback: AccountChangeCallback,
}

impl AccountStream {
    async fn run(self, mut ws: WsStream, mut subscription_id: u64, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    close_stream(&mut ws, subscription_id).await;
                    log::debug!("📴 Closed account stream for {}", self.address);
                    return;
                }
                message = ws.next() => {
                    let healthy = match message {
                        Some(Ok(Message::Text(text))) => {
                            match parse_frame(&text) {
                                PubsubFrame::AccountNotification => {
                                    log::debug!("🔔 Account change detected for {}", self.address);
                                    (self.callback)(&self.address);
                                }
                                PubsubFrame::Rejected { code, message } => {
                                    log::warn!("⚠️  Pubsub error for {}: {} {}", self.address, code, message);
                                }
                                PubsubFrame::Subscribed(_) | PubsubFrame::Other => {}
                            }
                            true
                        }
                        Some(Ok(Message::Ping(payload))) => ws.send(Message::Pong(payload)).await.is_ok(),
                        Some(Ok(Message::Close(frame))) => {
                            log::warn!("⚠️  Account stream for {} closed by server: {:?}", self.address, frame);
                            false
                        }
                        Some(Ok(_)) => true,
                        Some(Err(e)) => {
                            log::warn!("⚠️  Account stream error for {}: {}", self.address, e);
                            false
                        }
                        None => {
                            log::warn!("⚠️  Account stream for {} ended", self.address);
                            false
                        }
                    };

                    if !healthy {
                        match self.reconnect(&mut shutdown).await {
                            Some((new_ws, id)) => {
                                ws = new_ws;
                                subscription_id = id;
                            }
                            None => return,
                        }
                    }
                }
            }
        }
    }

    /// `None` when cancelled or out of attempts
    async fn reconnect(&self, shutdown: &mut oneshot::Receiver<()>) -> Option<(WsStream, u64)> {
        for attempt in 0..self.policy.max_attempts {
            let delay = self.policy.delay(attempt);
            log::warn!(
                "⏳ Reconnecting account stream for {} (attempt {} of {}) in {:?}",
                self.address,
                attempt + 1,
                self.policy.max_attempts,
                delay
            );

            tokio::select! {
                _ = &mut *shutdown => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match open_account_stream(&self.ws_url, &self.address, self.connect_timeout).await {
                Ok(stream) => {
                    log::info!("✅ Reconnected account stream for {}", self.address);
                    return Some(stream);
                }
                Err(e) => log::warn!("⚠️  Reconnect failed for {}: {}", self.address, e),
            }
        }

        log::error!(
            "❌ Giving up on account stream for {} after {} attempts",
            self.address,
            self.policy.max_attempts
        );
        None
    }
}

async fn close_stream(ws: &mut WsStream, subscription_id: u64) {
    let request = json!({
        "jsonrpc": "2.0",
        "id": UNSUBSCRIBE_REQUEST_ID,
        "method": "accountUnsubscribe",
        "params": [subscription_id]
    });
    if let Err(e) = ws.send(Message::Text(request.to_string().into())).await {
        log::debug!("accountUnsubscribe {} not delivered: {}", subscription_id, e);
    }
    let _ = ws.close(None).await;
}
