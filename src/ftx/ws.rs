//! CEX WebSocket client.
//!
//! One driver task owns the socket. Market-data and private-channel
//! events are fanned out on separate channels. On disconnect the driver
//! reconnects with exponential backoff, replays the login (when
//! credentials are configured), waits the venue's authentication settle
//! delay, and re-subscribes every tracked channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::sign_hmac_sha256;
use crate::error::{Error, Result};
use crate::ftx::message::{
    ChannelRequest, FillMessage, LoginArgs, LoginMessage, OrderMessage, OrderbookData, WsFrame,
};

/// Delay between login and private-channel subscription; the venue
/// authenticates the socket asynchronously.
pub const AUTHENTICATION_SETTLE_DELAY: Duration = Duration::from_secs(1);

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookAction {
    Snapshot,
    Delta,
}

#[derive(Debug)]
pub enum BookEvent {
    Book {
        market: String,
        action: BookAction,
        data: OrderbookData,
    },
    /// The transport reconnected; books rebuilt from the next snapshots.
    Resync,
}

#[derive(Debug)]
pub enum PrivateEvent {
    Order(OrderMessage),
    Fill(FillMessage),
}

#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

struct Shared {
    outbound: mpsc::UnboundedSender<String>,
    /// Markets with an active orderbook subscription, replayed on
    /// reconnect.
    orderbook_markets: Mutex<HashSet<String>>,
    /// Whether private fills/orders channels are wanted.
    private_channels: Mutex<bool>,
    book_events: mpsc::UnboundedSender<BookEvent>,
    private_events: mpsc::UnboundedSender<PrivateEvent>,
}

#[derive(Clone)]
pub struct FtxWsClient {
    shared: Arc<Shared>,
}

impl FtxWsClient {
    /// Connect and return the client plus the two event streams.
    pub fn connect(
        host: String,
        credentials: Option<Credentials>,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<BookEvent>,
        mpsc::UnboundedReceiver<PrivateEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (book_tx, book_rx) = mpsc::unbounded_channel();
        let (private_tx, private_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            orderbook_markets: Mutex::new(HashSet::new()),
            private_channels: Mutex::new(false),
            book_events: book_tx,
            private_events: private_tx,
        });

        tokio::spawn(drive_socket(
            shared.clone(),
            host,
            credentials,
            outbound_rx,
        ));

        (Self { shared }, book_rx, private_rx)
    }

    fn send(&self, message: &impl serde::Serialize) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.shared
            .outbound
            .send(text)
            .map_err(|_| Error::TransportClosed("CEX WS driver stopped".into()))
    }

    /// Subscribe the orderbook channel for one market; replayed after
    /// reconnects.
    pub fn subscribe_orderbook(&self, market: &str) -> Result<()> {
        self.shared
            .orderbook_markets
            .lock()
            .insert(market.to_string());
        self.send(&ChannelRequest {
            op: "subscribe",
            channel: "orderbook",
            market: Some(market.to_string()),
        })
    }

    /// Drop and re-establish one market's orderbook subscription; the
    /// venue answers with a fresh snapshot.
    pub fn resubscribe_orderbook(&self, market: &str) -> Result<()> {
        self.send(&ChannelRequest {
            op: "unsubscribe",
            channel: "orderbook",
            market: Some(market.to_string()),
        })?;
        self.send(&ChannelRequest {
            op: "subscribe",
            channel: "orderbook",
            market: Some(market.to_string()),
        })
    }

    /// Subscribe the private fills and orders channels (requires
    /// credentials at connect time).
    pub fn subscribe_private_channels(&self) -> Result<()> {
        *self.shared.private_channels.lock() = true;
        self.send(&ChannelRequest {
            op: "subscribe",
            channel: "fills",
            market: None,
        })?;
        self.send(&ChannelRequest {
            op: "subscribe",
            channel: "orders",
            market: None,
        })
    }
}

pub(crate) fn login_message(credentials: &Credentials, now_ms: i64) -> LoginMessage {
    let tag = sign_hmac_sha256(
        format!("{}websocket_login", now_ms).as_bytes(),
        credentials.api_secret.as_bytes(),
    );
    LoginMessage {
        op: "login",
        args: LoginArgs {
            key: credentials.api_key.clone(),
            sign: hex::encode(tag),
            time: now_ms,
        },
    }
}

async fn drive_socket(
    shared: Arc<Shared>,
    host: String,
    credentials: Option<Credentials>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    use tokio_tungstenite::tungstenite::Message;

    let url = format!("wss://{}/ws/", host);
    let mut delay = RECONNECT_INITIAL_DELAY;
    let mut first_connect = true;

    loop {
        let stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, response)) => {
                info!(url = %url, status = %response.status(), "CEX WS connected");
                delay = RECONNECT_INITIAL_DELAY;
                stream
            }
            Err(e) => {
                error!(url = %url, error = %e, "CEX WS connect failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                continue;
            }
        };

        let (mut sink, mut reader) = stream.split();

        // Session replay: login, settle, then re-subscribe everything.
        if let Some(credentials) = &credentials {
            let login = login_message(credentials, chrono::Utc::now().timestamp_millis());
            let text = serde_json::to_string(&login).expect("login serializes");
            if sink.send(Message::Text(text)).await.is_err() {
                continue;
            }
            tokio::time::sleep(AUTHENTICATION_SETTLE_DELAY).await;
        }
        if !first_connect {
            let _ = shared.book_events.send(BookEvent::Resync);
            replay_subscriptions(&shared, &mut sink).await;
        }
        first_connect = false;

        loop {
            tokio::select! {
                message = outbound.recv() => {
                    match message {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!(error = %e, "CEX WS write failed");
                                break;
                            }
                        }
                        None => {
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
                            info!(frame = ?frame, "CEX WS closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "CEX WS read error");
                            break;
                        }
                        None => {
                            info!("CEX WS end of stream");
                            break;
                        }
                    }
                }
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
    }
}

async fn replay_subscriptions<S>(shared: &Shared, sink: &mut S)
where
    S: futures_util::Sink<tokio_tungstenite::tungstenite::Message> + Unpin,
{
    use tokio_tungstenite::tungstenite::Message;

    let markets: Vec<String> = shared.orderbook_markets.lock().iter().cloned().collect();
    for market in markets {
        let request = ChannelRequest {
            op: "subscribe",
            channel: "orderbook",
            market: Some(market),
        };
        let text = serde_json::to_string(&request).expect("request serializes");
        if sink.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    if *shared.private_channels.lock() {
        for channel in ["fills", "orders"] {
            let request = ChannelRequest {
                op: "subscribe",
                channel,
                market: None,
            };
            let text = serde_json::to_string(&request).expect("request serializes");
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }
}

fn handle_frame(shared: &Shared, text: &str) {
    let frame: WsFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, raw = %text, "Unparseable CEX WS frame");
            return;
        }
    };

    match frame.frame_type.as_str() {
        "subscribed" => {
            info!(channel = ?frame.channel, market = ?frame.market, "CEX channel subscribed");
        }
        "unsubscribed" => {
            info!(channel = ?frame.channel, market = ?frame.market, "CEX channel unsubscribed");
        }
        "error" => {
            error!(code = ?frame.code, msg = ?frame.msg, "CEX WS error frame");
        }
        "info" | "pong" => {
            debug!(msg = ?frame.msg, "CEX WS info frame");
        }
        "partial" | "update" => dispatch_data(shared, frame),
        other => {
            warn!(frame_type = other, "Unknown CEX frame type");
        }
    }
}

fn dispatch_data(shared: &Shared, frame: WsFrame) {
    let Some(channel) = frame.channel.as_deref() else {
        warn!("CEX data frame without channel");
        return;
    };
    let Some(data) = frame.data else {
        warn!(channel, "CEX data frame without payload");
        return;
    };

    match channel {
        "orderbook" => {
            let Some(market) = frame.market else {
                warn!("Orderbook frame without market");
                return;
            };
            let action = if frame.frame_type == "partial" {
                BookAction::Snapshot
            } else {
                BookAction::Delta
            };
            match serde_json::from_value::<OrderbookData>(data) {
                Ok(data) => {
                    let _ = shared.book_events.send(BookEvent::Book {
                        market,
                        action,
                        data,
                    });
                }
                Err(e) => {
                    error!(error = %e, "Bad orderbook payload");
                }
            }
        }
        "orders" => match serde_json::from_value::<OrderMessage>(data) {
            Ok(message) => {
                let _ = shared.private_events.send(PrivateEvent::Order(message));
            }
            Err(e) => {
                error!(error = %e, "Bad order payload");
            }
        },
        "fills" => match serde_json::from_value::<FillMessage>(data) {
            Ok(message) => {
                let _ = shared.private_events.send(PrivateEvent::Fill(message));
            }
            Err(e) => {
                error!(error = %e, "Bad fill payload");
            }
        },
        other => {
            warn!(channel = other, "Data frame for unknown channel");
        }
    }
}
