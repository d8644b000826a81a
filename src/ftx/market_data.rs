//! CEX L2 book engine with checksum gating.
//!
//! Snapshots (`partial`) replace both sides wholesale and must pass the
//! CRC check before the book is committed; a failing snapshot is dropped.
//! Deltas merge `(side, price, qty)` entries in one ordered pass and then
//! re-verify; a failing delta means the book is desynchronized, so it is
//! discarded and the market re-subscribed for a fresh snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::TimeZone;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ftx::checksum::orderbook_checksum;
use crate::ftx::message::OrderbookData;
use crate::ftx::reference::{FtxReferenceClient, FtxReferenceData};
use crate::ftx::ws::{BookAction, BookEvent, FtxWsClient};
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{Book, PriceLevel, Side};

pub type BookCallback = Arc<dyn Fn(usize, &Book) + Send + Sync>;

/// Outcome of applying one orderbook message.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Book committed and safe to publish.
    Committed,
    /// Snapshot failed its checksum; the message was dropped.
    SnapshotRejected,
    /// Delta failed its checksum; the book must be rebuilt.
    Desynchronized,
}

/// Apply a snapshot or delta to `book`, enforcing the checksum. The book
/// is only mutated when the result is [`ApplyOutcome::Committed`] or the
/// book was emptied by a desync.
pub fn apply_book_message(book: &mut Book, action: BookAction, data: &OrderbookData) -> ApplyOutcome {
    let mut candidate = match action {
        BookAction::Snapshot => Book::new(),
        BookAction::Delta => book.clone(),
    };

    match action {
        BookAction::Snapshot => {
            candidate.replace_side(
                Side::Bid,
                data.bids
                    .iter()
                    .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
                    .collect(),
            );
            candidate.replace_side(
                Side::Ask,
                data.asks
                    .iter()
                    .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
                    .collect(),
            );
        }
        BookAction::Delta => {
            for (price, quantity) in &data.bids {
                candidate.apply_delta(Side::Bid, *price, *quantity);
            }
            for (price, quantity) in &data.asks {
                candidate.apply_delta(Side::Ask, *price, *quantity);
            }
        }
    }

    let seconds = data.time.trunc() as i64;
    let nanos = (data.time.fract() * 1e9) as u32;
    candidate.exchange_ts = chrono::Utc.timestamp_opt(seconds, nanos).single();
    candidate.receive_ts = Some(chrono::Utc::now());

    if orderbook_checksum(&candidate) != data.checksum {
        return match action {
            BookAction::Snapshot => ApplyOutcome::SnapshotRejected,
            BookAction::Delta => {
                // The local book no longer matches the venue; empty it so
                // nothing downstream trades on stale levels.
                *book = Book::new();
                ApplyOutcome::Desynchronized
            }
        };
    }

    *book = candidate;
    ApplyOutcome::Committed
}

struct Inner {
    reference: Arc<FtxReferenceData>,
    ws: FtxWsClient,
    stats: StatsPublisher,
    books: Mutex<Vec<Book>>,
    market_to_pair: HashMap<String, usize>,
    callbacks: RwLock<Vec<BookCallback>>,
}

#[derive(Clone)]
pub struct FtxMarketData {
    inner: Arc<Inner>,
}

impl FtxMarketData {
    pub async fn start(
        reference_client: &FtxReferenceClient,
        ws: FtxWsClient,
        book_events: mpsc::UnboundedReceiver<BookEvent>,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = reference_client.reference_data().await?;

        let market_to_pair: HashMap<String, usize> = reference
            .pairs
            .iter()
            .enumerate()
            .map(|(index, pair)| (pair.market_name.clone(), index))
            .collect();

        let inner = Arc::new(Inner {
            books: Mutex::new(vec![Book::new(); reference.pairs.len()]),
            market_to_pair,
            callbacks: RwLock::new(Vec::new()),
            stats: stats.scoped("ftx_market_data"),
            ws,
            reference,
        });

        for pair in &inner.reference.pairs {
            inner.ws.subscribe_orderbook(&pair.market_name)?;
        }
        info!(markets = inner.reference.pairs.len(), "Subscribed CEX orderbooks");

        tokio::spawn(consume_events(inner.clone(), book_events));

        Ok(Self { inner })
    }

    pub fn orderbook_subscribe(&self, callback: BookCallback) {
        self.inner.callbacks.write().push(callback);
    }

    pub fn book(&self, pair_index: usize) -> Book {
        self.inner.books.lock()[pair_index].clone()
    }
}

async fn consume_events(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<BookEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            BookEvent::Book {
                market,
                action,
                data,
            } => {
                let Some(&pair_index) = inner.market_to_pair.get(&market) else {
                    warn!(market = %market, "Orderbook event for unknown market");
                    continue;
                };
                inner.on_book_message(pair_index, &market, action, &data);
            }
            BookEvent::Resync => {
                // Transport reconnected; snapshots will rebuild each book.
                info!("CEX book resync, clearing books");
                let mut books = inner.books.lock();
                for book in books.iter_mut() {
                    *book = Book::new();
                }
            }
        }
    }
}

impl Inner {
    fn on_book_message(
        &self,
        pair_index: usize,
        market: &str,
        action: BookAction,
        data: &OrderbookData,
    ) {
        let (outcome, book_copy) = {
            let mut books = self.books.lock();
            let outcome = apply_book_message(&mut books[pair_index], action, data);
            (outcome, books[pair_index].clone())
        };

        match outcome {
            ApplyOutcome::Committed => {
                for callback in self.callbacks.read().iter() {
                    callback(pair_index, &book_copy);
                }
                self.publish_book_stats(pair_index, &book_copy);
            }
            ApplyOutcome::SnapshotRejected => {
                error!(
                    market = %market,
                    expected = data.checksum,
                    "CEX snapshot failed checksum, dropped"
                );
            }
            ApplyOutcome::Desynchronized => {
                error!(
                    market = %market,
                    expected = data.checksum,
                    "CEX book desynchronized, re-subscribing"
                );
                if let Err(e) = self.ws.resubscribe_orderbook(market) {
                    error!(market = %market, error = %e, "Re-subscribe failed");
                }
            }
        }
    }

    fn publish_book_stats(&self, pair_index: usize, book: &Book) {
        let mut measurements = Vec::new();
        for side in [Side::Bid, Side::Ask] {
            for (level_index, level) in book.side(side).iter().enumerate() {
                measurements.push(Measurement {
                    name: "order_book".into(),
                    tags: vec![
                        ("source".into(), "ftx".into()),
                        ("side".into(), side.as_str().into()),
                        ("level_index".into(), level_index.to_string()),
                        ("trading_pair_index".into(), pair_index.to_string()),
                    ],
                    fields: vec![
                        ("price".into(), FieldValue::Decimal(level.price)),
                        ("quantity".into(), FieldValue::Decimal(level.quantity)),
                    ],
                });
            }
        }
        self.stats.publish_batch(&measurements);
        debug!(pair_index, "Published CEX book measurements");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderbookData {
        // Compute the checksum the venue would send for this image.
        let mut book = Book::new();
        book.replace_side(
            Side::Bid,
            bids.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
        );
        book.replace_side(
            Side::Ask,
            asks.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
        );
        OrderbookData {
            time: 1640995200.5,
            checksum: orderbook_checksum(&book),
            bids: bids.to_vec(),
            asks: asks.to_vec(),
        }
    }

    #[test]
    fn valid_snapshot_commits() {
        let mut book = Book::new();
        let data = snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(2))]);
        assert_eq!(
            apply_book_message(&mut book, BookAction::Snapshot, &data),
            ApplyOutcome::Committed
        );
        assert!(book.is_valid());
        assert!(book.exchange_ts.is_some());
    }

    #[test]
    fn corrupt_snapshot_is_dropped_and_book_untouched() {
        let mut book = Book::new();
        let good = snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(2))]);
        apply_book_message(&mut book, BookAction::Snapshot, &good);

        let mut bad = snapshot(&[(dec!(90), dec!(1))], &[(dec!(91), dec!(2))]);
        bad.checksum ^= 1;
        assert_eq!(
            apply_book_message(&mut book, BookAction::Snapshot, &bad),
            ApplyOutcome::SnapshotRejected
        );
        // Previous committed book survives.
        assert_eq!(book.best(Side::Bid).unwrap().price, dec!(100));
    }

    #[test]
    fn checksum_verified_delta_commits() {
        let mut book = Book::new();
        let data = snapshot(
            &[(dec!(100), dec!(5)), (dec!(99), dec!(3)), (dec!(98), dec!(1))],
            &[(dec!(101), dec!(1))],
        );
        apply_book_message(&mut book, BookAction::Snapshot, &data);

        // Delete 99, replace 100, insert 100.5; checksum of the result.
        let mut expected = book.clone();
        expected.apply_delta(Side::Bid, dec!(99), dec!(0));
        expected.apply_delta(Side::Bid, dec!(100), dec!(7));
        expected.apply_delta(Side::Bid, dec!(100.5), dec!(2));

        let delta = OrderbookData {
            time: 1640995201.0,
            checksum: orderbook_checksum(&expected),
            bids: vec![
                (dec!(99), dec!(0)),
                (dec!(100), dec!(7)),
                (dec!(100.5), dec!(2)),
            ],
            asks: vec![],
        };
        assert_eq!(
            apply_book_message(&mut book, BookAction::Delta, &delta),
            ApplyOutcome::Committed
        );
        assert_eq!(
            book.side(Side::Bid),
            &[
                PriceLevel::new(dec!(100.5), dec!(2)),
                PriceLevel::new(dec!(100), dec!(7)),
                PriceLevel::new(dec!(98), dec!(1)),
            ]
        );
    }

    #[test]
    fn corrupt_delta_desynchronizes_and_empties_book() {
        let mut book = Book::new();
        let data = snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]);
        apply_book_message(&mut book, BookAction::Snapshot, &data);

        let delta = OrderbookData {
            time: 1640995201.0,
            checksum: 0xDEAD_BEEF,
            bids: vec![(dec!(100), dec!(2))],
            asks: vec![],
        };
        assert_eq!(
            apply_book_message(&mut book, BookAction::Delta, &delta),
            ApplyOutcome::Desynchronized
        );
        // Nothing downstream may trade on the stale image.
        assert!(!book.is_valid());
        assert!(book.side(Side::Bid).is_empty());
    }
}
