//! End-to-end strategy scenarios: no-arb baseline, arb trigger with the
//! single-flight latch, and hedge-after-take.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use basisbot::config::StrategyConfig;
use basisbot::error::Result;
use basisbot::ftx::reference::{FtxCurrency, FtxPair, FtxReferenceData};
use basisbot::stats::StatsPublisher;
use basisbot::strategy::{StrategyEvent, TakeStrategy};
use basisbot::trading::{Book, Order, OrderClient, OrderState, PriceLevel, Side, Wallet};

/// Order client that records submissions and resolves them on demand.
struct MockOrderClient {
    venue: &'static str,
    sent: Mutex<Vec<Order>>,
    /// When set, orders stay open until the latch sender fires.
    release: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    notify: mpsc::UnboundedSender<Order>,
}

impl MockOrderClient {
    fn new(venue: &'static str) -> (Arc<Self>, mpsc::UnboundedReceiver<Order>) {
        let (notify, notified) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                venue,
                sent: Mutex::new(Vec::new()),
                release: Mutex::new(None),
                notify,
            }),
            notified,
        )
    }

    fn hold_orders(&self) -> mpsc::UnboundedSender<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.release.lock() = Some(rx);
        tx
    }

    fn orders(&self) -> Vec<Order> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl OrderClient for MockOrderClient {
    async fn send_order(&self, mut order: Order) -> Result<Order> {
        self.sent.lock().push(order.clone());
        let _ = self.notify.send(order.clone());

        let waiter = self.release.lock().take();
        if let Some(mut waiter) = waiter {
            let _ = waiter.recv().await;
            *self.release.lock() = Some(waiter);
        }

        order.transition(OrderState::Closed);
        order.fill_quantity = order.quantity;
        order.average_fill_price = order.price;
        Ok(order)
    }

    fn venue(&self) -> &'static str {
        self.venue
    }
}

fn reference_data() -> Arc<FtxReferenceData> {
    Arc::new(FtxReferenceData {
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
    })
}

fn strategy_config(max_size: Decimal, min_profit: Decimal) -> StrategyConfig {
    StrategyConfig {
        max_usd_trade_size: max_size,
        min_usd_trade_profit: min_profit,
        dry_run: false,
    }
}

fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> Book {
    let mut book = Book::new();
    book.replace_side(
        Side::Bid,
        bids.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
    );
    book.replace_side(
        Side::Ask,
        asks.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
    );
    book
}

struct Harness {
    events: mpsc::UnboundedSender<StrategyEvent>,
    dex: Arc<MockOrderClient>,
    dex_notified: mpsc::UnboundedReceiver<Order>,
    cex: Arc<MockOrderClient>,
    cex_notified: mpsc::UnboundedReceiver<Order>,
}

fn spawn_strategy(config: StrategyConfig) -> Harness {
    let (dex, dex_notified) = MockOrderClient::new("serum");
    let (cex, cex_notified) = MockOrderClient::new("ftx");

    let (strategy, events) = TakeStrategy::new(
        config,
        reference_data(),
        dex.clone(),
        cex.clone(),
        StatsPublisher::disabled(),
    );
    tokio::spawn(strategy.run());

    Harness {
        events,
        dex,
        dex_notified,
        cex,
        cex_notified,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn no_arb_baseline_sends_nothing() {
    // S1: DEX 100/101, CEX 100.5/100.6 - spread inside fees.
    let harness = spawn_strategy(strategy_config(dec!(1000), dec!(0.10)));

    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(100.0), dec!(1.0))], &[(dec!(101.0), dec!(1.0))]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[(dec!(100.5), dec!(1.0))], &[(dec!(100.6), dec!(1.0))]),
        })
        .unwrap();

    settle().await;
    assert!(harness.dex.orders().is_empty());
    assert!(harness.cex.orders().is_empty());
}

#[tokio::test]
async fn arb_trigger_takes_dex_liquidity_once() {
    // S2: DEX bids 110x2 vs CEX asks 100x2; expected profit 19.534.
    let mut harness = spawn_strategy(strategy_config(dec!(1000), dec!(1)));
    let release = harness.dex.hold_orders();

    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[], &[(dec!(100.0), dec!(2.0))]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(110.0), dec!(2.0))], &[]),
        })
        .unwrap();

    let order = tokio::time::timeout(Duration::from_secs(1), harness.dex_notified.recv())
        .await
        .expect("take order submitted")
        .unwrap();
    // One DEX IOC sell at 110.0 for 2.0.
    assert_eq!(order.side, Side::Ask);
    assert_eq!(order.price, dec!(110.0));
    assert_eq!(order.quantity, dec!(2.0));
    assert_eq!(order.venue, "serum");

    // While the take is in flight, further crossing updates must not
    // produce a second order.
    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(111.0), dec!(2.0))], &[]),
        })
        .unwrap();
    settle().await;
    assert_eq!(harness.dex.orders().len(), 1);

    // Release the order; the latch clears and the next signal trades.
    release.send(()).unwrap();
    settle().await;
    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(112.0), dec!(2.0))], &[]),
        })
        .unwrap();
    let order = tokio::time::timeout(Duration::from_secs(1), harness.dex_notified.recv())
        .await
        .expect("second take after latch release")
        .unwrap();
    assert_eq!(order.price, dec!(112.0));
}

#[tokio::test]
async fn max_trade_size_caps_quantity() {
    let mut harness = spawn_strategy(strategy_config(dec!(110), dec!(1)));

    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[], &[(dec!(100.0), dec!(2.0))]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(110.0), dec!(2.0))], &[]),
        })
        .unwrap();

    let order = tokio::time::timeout(Duration::from_secs(1), harness.dex_notified.recv())
        .await
        .expect("take order submitted")
        .unwrap();
    // 110 USD at price 110 caps the take at 1.0.
    assert_eq!(order.quantity, dec!(1.0));
}

#[tokio::test]
async fn hedge_after_take_buys_the_deficit() {
    // S3: after the take fills, the DEX wallet reports base -2, the CEX
    // wallet is flat: net -2 must be bought back on the CEX.
    let mut harness = spawn_strategy(strategy_config(dec!(1000), dec!(1)));

    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[(dec!(99.0), dec!(5.0))], &[(dec!(100.0), dec!(5.0))]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::FtxWallet(Wallet {
            positions: vec![dec!(0), dec!(1000)],
            margin_available: vec![dec!(1000)],
        }))
        .unwrap();
    harness
        .events
        .send(StrategyEvent::MangoWallet(Wallet {
            positions: vec![dec!(-2.0), dec!(220)],
            margin_available: vec![dec!(500)],
        }))
        .unwrap();

    let hedge = tokio::time::timeout(Duration::from_secs(1), harness.cex_notified.recv())
        .await
        .expect("hedge order submitted")
        .unwrap();
    assert_eq!(hedge.side, Side::Bid);
    assert_eq!(hedge.quantity, dec!(2.0));
    assert_eq!(hedge.price, dec!(100.0));
    assert_eq!(hedge.venue, "ftx");

    // The hedge covers the whole deficit: net position returns to zero
    // once it fills.
    let net_before = dec!(-2.0);
    let net_after = net_before + hedge.fill_quantity.max(hedge.quantity);
    assert!(net_after.abs() < net_before.abs());
    assert_eq!(net_after, dec!(0));
}

#[tokio::test]
async fn usd_is_never_hedged() {
    let harness = spawn_strategy(strategy_config(dec!(1000), dec!(1)));

    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[(dec!(99.0), dec!(5.0))], &[(dec!(100.0), dec!(5.0))]),
        })
        .unwrap();
    // USD deeply negative, base currency flat.
    harness
        .events
        .send(StrategyEvent::MangoWallet(Wallet {
            positions: vec![dec!(0), dec!(-5000)],
            margin_available: vec![dec!(0)],
        }))
        .unwrap();

    settle().await;
    assert!(harness.cex.orders().is_empty());
}

#[tokio::test]
async fn dust_deficits_are_not_hedged() {
    let harness = spawn_strategy(strategy_config(dec!(1000), dec!(1)));

    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[(dec!(99.0), dec!(5.0))], &[(dec!(100.0), dec!(5.0))]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::MangoWallet(Wallet {
            positions: vec![dec!(-0.005), dec!(0)],
            margin_available: vec![dec!(0)],
        }))
        .unwrap();

    settle().await;
    assert!(harness.cex.orders().is_empty());
}

#[tokio::test]
async fn empty_book_side_never_signals() {
    let harness = spawn_strategy(strategy_config(dec!(1000), dec!(0)));

    // DEX bids crossed far above, but the CEX ask side is empty.
    harness
        .events
        .send(StrategyEvent::SerumBook {
            pair_index: 0,
            book: book(&[(dec!(200.0), dec!(2.0))], &[]),
        })
        .unwrap();
    harness
        .events
        .send(StrategyEvent::FtxBook {
            pair_index: 0,
            book: book(&[(dec!(100.0), dec!(2.0))], &[]),
        })
        .unwrap();

    settle().await;
    assert!(harness.dex.orders().is_empty());
}
