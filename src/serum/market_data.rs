//! Serum L2 book engine.
//!
//! Initial books come from one batched read of every pair's bids and asks
//! slabs; thereafter each slab and event queue is tracked through an
//! account subscription. Slab leaves are lot-scaled into decimal levels and
//! merged per price in the side's order. Book state is committed before any
//! subscriber callback runs.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::serum::layout::{event_flag, EventQueueAccount, SlabAccount, SlabOrder};
use crate::serum::reference::{SerumReferenceClient, SerumReferenceData};
use crate::solana::message::{account_subscribe_params, parse_account_notification, Commitment};
use crate::solana::{AccountBatcher, WsRpcClient};
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{pow10, Book, PriceLevel, Quantity, Side};

pub type BookCallback = Arc<dyn Fn(usize, &Book) + Send + Sync>;

/// Lot-size scaling for one pair, captured once from reference data.
#[derive(Debug, Clone, Copy)]
pub struct LotParams {
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

impl LotParams {
    pub fn price_from_lots(&self, raw: u64) -> Quantity {
        Quantity::from(raw) * Quantity::from(self.quote_lot_size) * pow10(self.base_decimals)
            / (pow10(self.quote_decimals) * Quantity::from(self.base_lot_size))
    }

    pub fn quantity_from_lots(&self, raw: u64) -> Quantity {
        Quantity::from(raw) * Quantity::from(self.base_lot_size) / pow10(self.base_decimals)
    }
}

/// Convert slab leaves to a sorted, price-merged level list.
pub fn levels_from_slab(orders: &[SlabOrder], side: Side, lots: &LotParams) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = orders
        .iter()
        .map(|order| {
            PriceLevel::new(
                lots.price_from_lots(order.key.limit_price),
                lots.quantity_from_lots(order.quantity),
            )
        })
        .collect();

    match side {
        Side::Bid => levels.sort_by(|a, b| b.price.cmp(&a.price)),
        Side::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
    }

    let mut merged: Vec<PriceLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        match merged.last_mut() {
            Some(last) if last.price == level.price => last.quantity += level.quantity,
            _ => merged.push(level),
        }
    }
    merged
}

/// How many event-queue entries to drain. Returns `(to_process, missed)`:
/// the first notification drains the whole visible window, afterwards the
/// sequence delta bounded by the visible count; a delta beyond the count
/// means events were missed.
pub fn events_to_process(last_seen: Option<u64>, queue: &EventQueueAccount) -> (u64, u64) {
    let to_process = match last_seen {
        None => queue.count,
        Some(last) => queue.sequence_number.wrapping_sub(last),
    };
    let missed = to_process.saturating_sub(queue.count);
    (to_process.min(queue.count), missed)
}

struct PairState {
    book: Book,
    last_event_seq: Option<u64>,
}

struct Inner {
    reference: Arc<SerumReferenceData>,
    lots: Vec<LotParams>,
    ws: WsRpcClient,
    stats: StatsPublisher,
    pairs: Mutex<Vec<PairState>>,
    callbacks: RwLock<Vec<BookCallback>>,
}

#[derive(Clone)]
pub struct SerumMarketData {
    inner: Arc<Inner>,
}

impl SerumMarketData {
    /// Load initial books and subscribe to every pair's bids, asks and
    /// event queue.
    pub async fn start(
        reference_client: &SerumReferenceClient,
        batcher: Arc<AccountBatcher>,
        ws: WsRpcClient,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = reference_client.reference_data().await?;
        let pair_count = reference.pairs.len();

        let lots: Vec<LotParams> = reference
            .pairs
            .iter()
            .map(|pair| LotParams {
                base_lot_size: pair.market.base_lot_size,
                quote_lot_size: pair.market.quote_lot_size,
                base_decimals: reference.currencies[pair.base_currency_index].decimals,
                quote_decimals: reference.currencies[pair.quote_currency_index].decimals,
            })
            .collect();

        let inner = Arc::new(Inner {
            lots,
            ws,
            stats: stats.scoped("serum_market_data"),
            pairs: Mutex::new(
                (0..pair_count)
                    .map(|_| PairState {
                        book: Book::new(),
                        last_event_seq: None,
                    })
                    .collect(),
            ),
            callbacks: RwLock::new(Vec::new()),
            reference,
        });

        // Initial book state in one batched read: bids then asks.
        let mut keys = Vec::with_capacity(pair_count * 2);
        for pair in &inner.reference.pairs {
            keys.push(pair.market.bids);
        }
        for pair in &inner.reference.pairs {
            keys.push(pair.market.asks);
        }
        let accounts = batcher.get_multiple_accounts(&keys).await?;

        for pair_index in 0..pair_count {
            for (offset, expected_side) in [(0, Side::Bid), (pair_count, Side::Ask)] {
                let account = accounts[pair_index + offset].as_ref().ok_or_else(|| {
                    Error::NotFound(format!(
                        "orderbook slab for pair {} is missing",
                        pair_index
                    ))
                })?;
                // Initial load: publish only once both sides are in.
                let publish = expected_side == Side::Ask;
                inner.apply_slab(pair_index, &account.data, Some(expected_side), publish)?;
            }
        }

        info!(pairs = pair_count, "Loaded initial serum books");

        // Subscriptions: bids, asks, event queue per pair.
        for pair_index in 0..pair_count {
            let market = &inner.reference.pairs[pair_index].market;
            spawn_slab_subscription(inner.clone(), pair_index, market.bids);
            spawn_slab_subscription(inner.clone(), pair_index, market.asks);
            spawn_event_queue_subscription(inner.clone(), pair_index, market.event_queue);
        }

        Ok(Self { inner })
    }

    /// Register a book subscriber; fired after every committed update.
    pub fn orderbook_subscribe(&self, callback: BookCallback) {
        self.inner.callbacks.write().push(callback);
    }

    pub fn book(&self, pair_index: usize) -> Book {
        self.inner.pairs.lock()[pair_index].book.clone()
    }
}

impl Inner {
    /// Parse a slab account and replace the matching book side. Commits
    /// the mutation, then notifies subscribers with the committed copy.
    fn apply_slab(
        &self,
        pair_index: usize,
        data: &[u8],
        expected_side: Option<Side>,
        publish: bool,
    ) -> Result<()> {
        let slab = SlabAccount::parse(data)?;
        if let Some(expected) = expected_side {
            if slab.side != expected {
                return Err(Error::IntegrityMismatch(format!(
                    "expected {} slab, account flags say {}",
                    expected, slab.side
                )));
            }
        }
        let side = slab.side;
        let levels = levels_from_slab(&slab.orders()?, side, &self.lots[pair_index]);

        let book_copy = {
            let mut pairs = self.pairs.lock();
            let state = &mut pairs[pair_index];
            let now = chrono::Utc::now();
            state.book.replace_side(side, levels);
            state.book.receive_ts = Some(now);
            // No exchange clock on chain reads; consensus time is approximated
            // by receive time.
            state.book.exchange_ts = Some(now);
            state.book.clone()
        };

        if publish {
            for callback in self.callbacks.read().iter() {
                callback(pair_index, &book_copy);
            }
        }
        self.publish_book_stats(pair_index, side, &book_copy);
        Ok(())
    }

    fn on_event_queue(&self, pair_index: usize, data: &[u8]) -> Result<()> {
        let queue = EventQueueAccount::parse(data)?;

        let (to_process, missed, last_seen) = {
            let mut pairs = self.pairs.lock();
            let state = &mut pairs[pair_index];
            let (to_process, missed) = events_to_process(state.last_event_seq, &queue);
            let last_seen = state.last_event_seq;
            state.last_event_seq = Some(queue.sequence_number);
            (to_process, missed, last_seen)
        };

        if missed > 0 {
            warn!(
                pair_index,
                missed,
                count = queue.count,
                "Missed serum events"
            );
        }

        for offset in 0..to_process {
            let Some(event) = queue.event_at(offset) else {
                break;
            };
            if event.event_flags & event_flag::FILL != 0 {
                debug!(
                    pair_index,
                    client_order_id = event.client_order_id,
                    released = event.native_quantity_released,
                    paid = event.native_quantity_paid,
                    "Serum fill event"
                );
            }
        }

        debug!(
            pair_index,
            to_process,
            seq = queue.sequence_number,
            ?last_seen,
            "Processed serum event queue"
        );
        Ok(())
    }

    fn publish_book_stats(&self, pair_index: usize, side: Side, book: &Book) {
        let levels = book.side(side);
        let measurements: Vec<Measurement> = levels
            .iter()
            .enumerate()
            .map(|(level_index, level)| Measurement {
                name: "order_book".into(),
                tags: vec![
                    ("source".into(), "serum".into()),
                    ("side".into(), side.as_str().into()),
                    ("level_index".into(), level_index.to_string()),
                    ("trading_pair_index".into(), pair_index.to_string()),
                ],
                fields: vec![
                    ("price".into(), FieldValue::Decimal(level.price)),
                    ("quantity".into(), FieldValue::Decimal(level.quantity)),
                ],
            })
            .collect();
        self.stats.publish_batch(&measurements);
    }
}

fn spawn_slab_subscription(inner: Arc<Inner>, pair_index: usize, account: crate::core::Pubkey) {
    tokio::spawn(async move {
        loop {
            let mut subscription = match inner
                .ws
                .subscribe(
                    "accountSubscribe",
                    account_subscribe_params(&account, Commitment::Processed),
                    "accountUnsubscribe",
                )
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(pair_index, account = %account, error = %e, "Slab subscription failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = subscription.next().await {
                match parse_account_notification(&payload)
                    .and_then(|account| inner.apply_slab(pair_index, &account.data, None, true))
                {
                    Ok(()) => {}
                    Err(e) => {
                        error!(pair_index, error = %e, "Bad slab notification");
                    }
                }
            }
            info!(pair_index, account = %account, "Slab subscription closed, re-subscribing");
        }
    });
}

fn spawn_event_queue_subscription(
    inner: Arc<Inner>,
    pair_index: usize,
    account: crate::core::Pubkey,
) {
    tokio::spawn(async move {
        loop {
            let mut subscription = match inner
                .ws
                .subscribe(
                    "accountSubscribe",
                    account_subscribe_params(&account, Commitment::Processed),
                    "accountUnsubscribe",
                )
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(pair_index, error = %e, "Event queue subscription failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = subscription.next().await {
                match parse_account_notification(&payload)
                    .and_then(|account| inner.on_event_queue(pair_index, &account.data))
                {
                    Ok(()) => {}
                    Err(e) => {
                        error!(pair_index, error = %e, "Bad event queue notification");
                    }
                }
            }
            info!(pair_index, "Event queue subscription closed, re-subscribing");
        }
    });
}
