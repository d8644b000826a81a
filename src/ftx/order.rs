//! CEX order client.
//!
//! Orders are posted over signed REST as IOC limit orders and tracked to
//! completion by the private WS `orders` channel, correlated on
//! `client_order_id`. Each pending order carries a 30 s deadline; a
//! CLOSED update resolves the waiting caller with the final fill state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ftx::message::{OrderMessage, OrderRequest, OrderStatus};
use crate::ftx::reference::{FtxReferenceClient, FtxReferenceData};
use crate::ftx::rest::FtxRestClient;
use crate::ftx::ws::{FtxWsClient, PrivateEvent};
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{next_client_order_id, Order, OrderClient, OrderState};

pub const ORDER_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingOrder {
    order: Order,
    waiter: Option<oneshot::Sender<Order>>,
}

struct Inner {
    reference: Arc<FtxReferenceData>,
    rest: FtxRestClient,
    stats: StatsPublisher,
    /// Pending orders keyed by client order id.
    pending: Mutex<HashMap<u64, PendingOrder>>,
    /// Exchange order id -> client order id, filled by NEW updates.
    exchange_ids: Mutex<HashMap<u64, u64>>,
}

pub struct FtxOrderClient {
    inner: Arc<Inner>,
}

impl FtxOrderClient {
    /// Log in the private channels and start consuming order updates.
    pub async fn start(
        reference_client: &FtxReferenceClient,
        ws: FtxWsClient,
        private_events: mpsc::UnboundedReceiver<PrivateEvent>,
        rest: FtxRestClient,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = reference_client.reference_data().await?;

        // Login happens inside the WS driver; private channels ride on it.
        ws.subscribe_private_channels()?;
        info!("Subscribed private CEX channels");

        let inner = Arc::new(Inner {
            reference,
            rest,
            stats: stats.scoped("ftx_order_client"),
            pending: Mutex::new(HashMap::new()),
            exchange_ids: Mutex::new(HashMap::new()),
        });

        tokio::spawn(consume_private_events(inner.clone(), private_events));

        Ok(Self { inner })
    }
}

async fn consume_private_events(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<PrivateEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PrivateEvent::Order(message) => inner.on_order_message(&message),
            PrivateEvent::Fill(fill) => {
                debug!(
                    order_id = fill.order_id,
                    market = %fill.market,
                    price = %fill.price,
                    size = %fill.size,
                    "CEX fill"
                );
            }
        }
    }
}

impl Inner {
    fn on_order_message(&self, message: &OrderMessage) {
        let Some(client_order_id) = message.client_id else {
            warn!(order_id = message.id, "Order update without client id");
            return;
        };

        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&client_order_id) else {
            warn!(client_order_id, "Order update for unknown client id");
            return;
        };

        let state = match message.status {
            OrderStatus::New => OrderState::New,
            OrderStatus::Open => OrderState::Open,
            OrderStatus::Closed => OrderState::Closed,
        };
        if !entry.order.transition(state) {
            debug!(client_order_id, "Out-of-order state update dropped");
            return;
        }
        entry.order.order_id = message.id;
        entry.order.fill_quantity = message.filled_size;
        if let Some(average) = message.avg_fill_price {
            entry.order.average_fill_price = average;
        }

        if message.status == OrderStatus::New {
            self.exchange_ids.lock().insert(message.id, client_order_id);
        }

        self.publish_order_stat(&entry.order);

        if entry.order.is_closed() {
            let entry = pending.remove(&client_order_id).expect("entry held");
            self.exchange_ids.lock().remove(&entry.order.order_id);
            if let Some(waiter) = entry.waiter {
                let _ = waiter.send(entry.order);
            }
        }
    }

    fn publish_order_stat(&self, order: &Order) {
        self.stats.publish(Measurement {
            name: "order".into(),
            tags: vec![
                ("source".into(), "ftx".into()),
                ("trading_pair_index".into(), order.pair_index.to_string()),
            ],
            fields: vec![
                ("price".into(), FieldValue::Decimal(order.price)),
                ("quantity".into(), FieldValue::Decimal(order.quantity)),
                ("side".into(), FieldValue::Str(order.side.as_str().into())),
                (
                    "client_order_id".into(),
                    FieldValue::U64(order.client_order_id),
                ),
                (
                    "order_state".into(),
                    FieldValue::Str(order.state.as_str().into()),
                ),
                (
                    "average_fill_price".into(),
                    FieldValue::Decimal(order.average_fill_price),
                ),
                (
                    "fill_quantity".into(),
                    FieldValue::Decimal(order.fill_quantity),
                ),
            ],
        });
    }
}

#[async_trait]
impl OrderClient for FtxOrderClient {
    async fn send_order(&self, mut order: Order) -> Result<Order> {
        order.client_order_id = next_client_order_id();
        let market_name = self.inner.reference.pairs[order.pair_index]
            .market_name
            .clone();

        let request = OrderRequest {
            market: market_name,
            side: order.side.as_order_str(),
            price: order.price,
            order_type: "limit",
            size: order.quantity,
            reduce_only: false,
            ioc: true,
            post_only: false,
            client_id: order.client_order_id.to_string(),
        };

        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            order.client_order_id,
            PendingOrder {
                order: order.clone(),
                waiter: Some(waiter_tx),
            },
        );
        self.inner.publish_order_stat(&order);

        info!(
            client_order_id = order.client_order_id,
            side = %order.side,
            price = %order.price,
            quantity = %order.quantity,
            "Sending CEX order"
        );

        if let Err(e) = self.inner.rest.place_order(&request).await {
            // Clean up the pending slot before surfacing the failure.
            self.inner.pending.lock().remove(&order.client_order_id);
            error!(client_order_id = order.client_order_id, error = %e, "CEX order send failed");
            return Err(e);
        }

        match tokio::time::timeout(ORDER_TIMEOUT, waiter_rx).await {
            Ok(Ok(order)) => Ok(order),
            Ok(Err(_)) => Err(Error::Internal(
                "order waiter dropped without resolution".into(),
            )),
            Err(_) => {
                self.inner.pending.lock().remove(&order.client_order_id);
                Err(Error::Timeout(format!(
                    "order {} not closed within {:?}",
                    order.client_order_id, ORDER_TIMEOUT
                )))
            }
        }
    }

    fn venue(&self) -> &'static str {
        "ftx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftx::reference::{FtxCurrency, FtxPair};
    use crate::trading::Side;
    use rust_decimal_macros::dec;

    fn test_inner() -> Arc<Inner> {
        Arc::new(Inner {
            reference: Arc::new(FtxReferenceData {
                pairs: vec![FtxPair {
                    market_name: "SOL/USD".into(),
                    base_currency_index: 0,
                    quote_currency_index: 1,
                    price_increment: dec!(0.01),
                    quantity_increment: dec!(0.01),
                }],
                currencies: vec![
                    FtxCurrency { name: "SOL".into() },
                    FtxCurrency { name: "USD".into() },
                ],
            }),
            rest: FtxRestClient::new("cex.example".into(), "k".into(), "s".into()).unwrap(),
            stats: StatsPublisher::disabled(),
            pending: Mutex::new(HashMap::new()),
            exchange_ids: Mutex::new(HashMap::new()),
        })
    }

    fn order_update(client_id: u64, status: OrderStatus, filled: rust_decimal::Decimal) -> OrderMessage {
        OrderMessage {
            id: 42,
            client_id: Some(client_id),
            market: "SOL/USD".into(),
            side: Side::Bid,
            price: Some(dec!(100)),
            size: dec!(2),
            status,
            filled_size: filled,
            avg_fill_price: Some(dec!(100)),
        }
    }

    #[tokio::test]
    async fn closed_update_resolves_waiter() {
        let inner = test_inner();
        let order = Order::immediate_or_cancel(Side::Bid, dec!(100), dec!(2), 0, "ftx");
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(
            7,
            PendingOrder {
                order: {
                    let mut order = order;
                    order.client_order_id = 7;
                    order
                },
                waiter: Some(tx),
            },
        );

        inner.on_order_message(&order_update(7, OrderStatus::New, dec!(0)));
        inner.on_order_message(&order_update(7, OrderStatus::Closed, dec!(2)));

        let resolved = rx.await.unwrap();
        assert!(resolved.is_closed());
        assert_eq!(resolved.fill_quantity, dec!(2));
        assert_eq!(resolved.order_id, 42);
        assert!(inner.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_client_id_is_ignored() {
        let inner = test_inner();
        inner.on_order_message(&order_update(99, OrderStatus::New, dec!(0)));
        assert!(inner.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn out_of_order_updates_do_not_regress_state() {
        let inner = test_inner();
        let mut order = Order::immediate_or_cancel(Side::Bid, dec!(100), dec!(2), 0, "ftx");
        order.client_order_id = 5;
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(
            5,
            PendingOrder {
                order,
                waiter: Some(tx),
            },
        );

        inner.on_order_message(&order_update(5, OrderStatus::Closed, dec!(2)));
        // A late NEW after the close must not resurrect the entry.
        inner.on_order_message(&order_update(5, OrderStatus::New, dec!(0)));

        let resolved = rx.await.unwrap();
        assert!(resolved.is_closed());
    }
}
