//! JSON-RPC over WebSocket: request multiplexer and subscription manager.
//!
//! One driver task owns the socket. Requests are correlated by monotonic id
//! through a pending-request table with a 30 s deadline; server-pushed
//! notifications are fanned out to per-subscription channels keyed by the
//! server-assigned subscription id. On transport loss the driver fails all
//! pending requests with `TransportClosed`, closes the notification
//! channels (owners re-subscribe), and reconnects with exponential backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle interval after which a quiet subscription is logged (and the wait
/// restarted).
pub const SUBSCRIPTION_IDLE_INTERVAL: Duration = Duration::from_secs(30);

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value>>>>;
type SubscriptionMap = Mutex<HashMap<u64, mpsc::UnboundedSender<serde_json::Value>>>;

struct Shared {
    url: String,
    next_id: AtomicU64,
    pending: PendingMap,
    subscriptions: SubscriptionMap,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Clone)]
pub struct WsRpcClient {
    shared: Arc<Shared>,
}

impl WsRpcClient {
    /// Create the client and spawn its socket driver.
    pub fn connect(url: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            url,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
        });

        tokio::spawn(drive_socket(shared.clone(), outbound_rx));

        Self { shared }
    }

    /// Send one JSON-RPC request and await the correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            // Ids are process-monotonic; a collision is a programming error.
            assert!(
                pending.insert(id, tx).is_none(),
                "duplicate pending RPC id {}",
                id
            );
        }

        if self
            .shared
            .outbound
            .send(request.to_string())
            .is_err()
        {
            self.shared.pending.lock().remove(&id);
            return Err(Error::TransportClosed("WS driver stopped".into()));
        }

        match timeout(WS_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TransportClosed(format!(
                "{} request dropped by transport",
                method
            ))),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(Error::Timeout(format!("{} request timed out", method)))
            }
        }
    }

    /// Issue a subscribe RPC and register a notification channel under the
    /// server-assigned subscription id.
    pub async fn subscribe(
        &self,
        method: &'static str,
        params: serde_json::Value,
        unsubscribe_method: &'static str,
    ) -> Result<Subscription> {
        let result = self.request(method, params).await?;
        let subscription_id = result.as_u64().ok_or_else(|| {
            Error::Deserialize(format!("{} returned non-integer subscription id", method))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut subscriptions = self.shared.subscriptions.lock();
            if subscriptions.contains_key(&subscription_id) {
                return Err(Error::PreconditionFailed(format!(
                    "duplicate server subscription id {}",
                    subscription_id
                )));
            }
            subscriptions.insert(subscription_id, tx);
        }
        info!(method, subscription_id, "Subscribed");

        Ok(Subscription {
            id: subscription_id,
            rx,
            client: self.clone(),
            unsubscribe_method,
        })
    }

    fn remove_subscription(&self, id: u64) {
        self.shared.subscriptions.lock().remove(&id);
    }
}

/// A live server subscription. Dropping it removes the local entry;
/// `unsubscribe` also tears down the server side.
pub struct Subscription {
    pub id: u64,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
    client: WsRpcClient,
    unsubscribe_method: &'static str,
}

impl Subscription {
    /// Next notification payload (`params.result`). Returns `None` once the
    /// transport dropped the subscription; the owner should re-subscribe.
    /// Quiet periods are logged every idle interval.
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        loop {
            match timeout(SUBSCRIPTION_IDLE_INTERVAL, self.rx.recv()).await {
                Ok(message) => return message,
                Err(_) => {
                    debug!(subscription_id = self.id, "Subscription idle");
                }
            }
        }
    }

    /// Remove the server-side subscription and the local entry.
    pub async fn unsubscribe(mut self) -> Result<()> {
        self.rx.close();
        self.client.remove_subscription(self.id);
        let result = self
            .client
            .request(self.unsubscribe_method, serde_json::json!([self.id]))
            .await?;
        if result.as_bool() != Some(true) {
            warn!(subscription_id = self.id, "Server rejected unsubscribe");
        }
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.remove_subscription(self.id);
    }
}

async fn drive_socket(shared: Arc<Shared>, mut outbound: mpsc::UnboundedReceiver<String>) {
    let mut delay = RECONNECT_INITIAL_DELAY;

    loop {
        let stream = match connect_async(&shared.url).await {
            Ok((stream, response)) => {
                info!(url = %shared.url, status = %response.status(), "WS connected");
                delay = RECONNECT_INITIAL_DELAY;
                stream
            }
            Err(e) => {
                error!(url = %shared.url, error = %e, delay_ms = delay.as_millis() as u64, "WS connect failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                continue;
            }
        };

        let (mut sink, mut reader) = stream.split();

        loop {
            tokio::select! {
                message = outbound.recv() => {
                    match message {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!(error = %e, "WS write failed");
                                break;
                            }
                        }
                        None => {
                            // All client handles dropped; shut the socket down.
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                    }
                }
                frame = reader.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => handle_frame(&shared, &text),
                        Some(Ok(Message::Ping(payload))) => {
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "WS closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WS read error");
                            break;
                        }
                        None => {
                            info!("WS end of stream");
                            break;
                        }
                    }
                }
            }
        }

        fail_inflight(&shared);
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
    }
}

/// Fail pending requests and close notification channels after a disconnect.
/// In-flight requests whose response is lost surface `TransportClosed` to
/// their callers; subscription owners observe the closed channel.
fn fail_inflight(shared: &Shared) {
    let pending: Vec<_> = {
        let mut map = shared.pending.lock();
        map.drain().collect()
    };
    for (id, tx) in pending {
        debug!(id, "Failing in-flight request on disconnect");
        let _ = tx.send(Err(Error::TransportClosed(
            "connection lost before response".into(),
        )));
    }
    shared.subscriptions.lock().clear();
}

fn handle_frame(shared: &Shared, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Unparseable WS frame");
            return;
        }
    };

    // Response to one of our requests.
    if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
        let sender = shared.pending.lock().remove(&id);
        let Some(sender) = sender else {
            debug!(id, "Response for unknown or expired request id");
            return;
        };
        let outcome = if let Some(error) = value.get("error") {
            Err(Error::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            })
        } else {
            value
                .get("result")
                .cloned()
                .ok_or_else(|| Error::Deserialize("response missing result".into()))
        };
        let _ = sender.send(outcome);
        return;
    }

    // Server notification: `{ method: "...Notification", params: { subscription, result } }`.
    let Some(params) = value.get("params") else {
        debug!("WS frame without id or params");
        return;
    };
    let Some(subscription_id) = params.get("subscription").and_then(|v| v.as_u64()) else {
        warn!("Notification without subscription id");
        return;
    };
    let Some(result) = params.get("result") else {
        warn!(subscription_id, "Notification without result");
        return;
    };

    let subscriptions = shared.subscriptions.lock();
    match subscriptions.get(&subscription_id) {
        Some(tx) => {
            // A slow or dropped consumer must not poison the stream.
            if tx.send(result.clone()).is_err() {
                debug!(subscription_id, "Dropping notification for closed consumer");
            }
        }
        None => {
            debug!(subscription_id, "Notification for unknown subscription");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared() -> Arc<Shared> {
        let (outbound, _rx) = mpsc::unbounded_channel();
        Arc::new(Shared {
            url: "wss://unused.example".into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            outbound,
        })
    }

    #[tokio::test]
    async fn response_resolves_pending_request() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(7, tx);

        handle_frame(&shared, r#"{"jsonrpc":"2.0","id":7,"result":42}"#);

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!(42));
        assert!(shared.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn rpc_error_surfaces_to_caller() {
        let shared = test_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(3, tx);

        handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"bad params"}}"#,
        );

        match rx.await.unwrap() {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("expected rpc error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn notification_routes_by_subscription_id() {
        let shared = test_shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.subscriptions.lock().insert(99, tx);

        handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"subscription":99,"result":{"slot":5,"parent":4,"root":3}}}"#,
        );

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["slot"], 5);
    }

    #[tokio::test]
    async fn unknown_subscription_is_dropped() {
        let shared = test_shared();
        // Must not panic or leak state.
        handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"subscription":1,"result":{}}}"#,
        );
        assert!(shared.subscriptions.lock().is_empty());
    }

    #[tokio::test]
    async fn disconnect_fails_pending_and_closes_subscriptions() {
        let shared = test_shared();
        let (req_tx, req_rx) = oneshot::channel();
        shared.pending.lock().insert(1, req_tx);
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        shared.subscriptions.lock().insert(2, sub_tx);

        fail_inflight(&shared);

        assert!(matches!(
            req_rx.await.unwrap(),
            Err(Error::TransportClosed(_))
        ));
        assert!(sub_rx.recv().await.is_none());
        assert!(shared.pending.lock().is_empty());
        assert!(shared.subscriptions.lock().is_empty());
    }
}
