//! Take-and-hedge strategy.
//!
//! Book updates drive a price-priority lockstep walk of the DEX side
//! against the opposite CEX side; when the spread net of both taker fees
//! clears the configured profit floor, one DEX IOC takes the liquidity.
//! A single in-flight trade latch serializes takes. Hedging is driven by
//! margin-wallet updates: any non-USD currency short across both venues
//! is bought back on the CEX at the first ask level deep enough to cover
//! the deficit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::StrategyConfig;
use crate::ftx::reference::FtxReferenceData;
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{Book, Order, OrderClient, PriceLevel, Price, Quantity, Side, Wallet};

/// Events feeding the strategy's single-threaded loop.
#[derive(Debug)]
pub enum StrategyEvent {
    SerumBook { pair_index: usize, book: Book },
    FtxBook { pair_index: usize, book: Book },
    MangoWallet(Wallet),
    FtxWallet(Wallet),
}

/// Result of one arbitrage walk.
#[derive(Debug, Clone, Default)]
pub struct ArbSignal {
    pub quantity: Quantity,
    pub expected_profit: Decimal,
    /// DEX price of the last profitable level; the take order's limit.
    pub trade_price: Price,
    pub spread: Decimal,
    pub spread_with_fees: Decimal,
}

/// Walk the DEX `side` levels against the opposite CEX side in price
/// priority, accumulating quantity while the edge net of both taker fees
/// stays positive. Levels are consumed by `min` of remaining quantities.
pub fn compute_arbitrage(
    dex_levels: &[PriceLevel],
    cex_levels: &[PriceLevel],
    side: Side,
    dex_fee_rate: Decimal,
    cex_fee_rate: Decimal,
) -> ArbSignal {
    let mut signal = ArbSignal::default();
    if dex_levels.is_empty() || cex_levels.is_empty() {
        return signal;
    }

    // Top-of-book spread metrics, fees in and out.
    let dex_best = dex_levels[0].price;
    let cex_best = cex_levels[0].price;
    signal.spread = match side {
        Side::Bid => dex_best - cex_best,
        Side::Ask => cex_best - dex_best,
    };
    signal.spread_with_fees = match side {
        Side::Bid => {
            dex_best * (Decimal::ONE - dex_fee_rate) - cex_best * (Decimal::ONE + cex_fee_rate)
        }
        Side::Ask => {
            cex_best * (Decimal::ONE - cex_fee_rate) - dex_best * (Decimal::ONE + dex_fee_rate)
        }
    };

    let mut dex_iter = dex_levels.iter();
    let mut cex_iter = cex_levels.iter();
    let mut dex_level = dex_iter.next();
    let mut cex_level = cex_iter.next();
    let mut dex_remaining = dex_level.map(|l| l.quantity).unwrap_or_default();
    let mut cex_remaining = cex_level.map(|l| l.quantity).unwrap_or_default();

    while let (Some(dex), Some(cex)) = (dex_level, cex_level) {
        let dex_fee = dex.price * dex_fee_rate;
        let cex_fee = cex.price * cex_fee_rate;

        let edge = match side {
            // Selling into DEX bids, buying back on CEX asks.
            Side::Bid => dex.price - (cex.price + cex_fee + dex_fee),
            // Buying DEX asks, selling into CEX bids.
            Side::Ask => cex.price - (dex.price + cex_fee + dex_fee),
        };
        if edge <= Decimal::ZERO {
            debug!(
                dex_price = %dex.price,
                cex_price = %cex.price,
                %dex_fee,
                %cex_fee,
                "Arbitrage walk break"
            );
            break;
        }

        let take = dex_remaining.min(cex_remaining);
        signal.quantity += take;
        signal.expected_profit += edge * take;
        signal.trade_price = dex.price;

        // Advance the side with less remaining quantity; both on a tie.
        if dex_remaining < cex_remaining {
            cex_remaining -= dex_remaining;
            dex_level = dex_iter.next();
            dex_remaining = dex_level.map(|l| l.quantity).unwrap_or_default();
        } else if cex_remaining < dex_remaining {
            dex_remaining -= cex_remaining;
            cex_level = cex_iter.next();
            cex_remaining = cex_level.map(|l| l.quantity).unwrap_or_default();
        } else {
            dex_level = dex_iter.next();
            dex_remaining = dex_level.map(|l| l.quantity).unwrap_or_default();
            cex_level = cex_iter.next();
            cex_remaining = cex_level.map(|l| l.quantity).unwrap_or_default();
        }
    }

    signal
}

/// Plan a hedge buy for a net short: the limit price is the first ask
/// level whose cumulative depth covers the deficit. Returns `None` when
/// the deficit is under the venue's quantity increment or the book cannot
/// price it.
pub fn plan_hedge(
    net_position: Quantity,
    cex_book: &Book,
    quantity_increment: Quantity,
) -> Option<(Price, Quantity)> {
    if net_position >= Decimal::ZERO {
        return None;
    }
    let deficit = -net_position;
    if deficit < quantity_increment {
        return None;
    }
    if !cex_book.is_valid() {
        return None;
    }
    let price = cex_book.price_for_quantity(Side::Ask, deficit)?;
    Some((price, deficit))
}

pub struct TakeStrategy {
    config: StrategyConfig,
    ftx_reference: Arc<FtxReferenceData>,
    dex_order_client: Arc<dyn OrderClient>,
    cex_order_client: Arc<dyn OrderClient>,
    stats: StatsPublisher,
    events: mpsc::UnboundedReceiver<StrategyEvent>,

    serum_books: Vec<Book>,
    ftx_books: Vec<Book>,
    mango_wallet: Wallet,
    ftx_wallet: Wallet,
    /// Single in-flight DEX take per process.
    is_trading: Arc<AtomicBool>,
    is_running: bool,
}

impl TakeStrategy {
    pub fn new(
        config: StrategyConfig,
        ftx_reference: Arc<FtxReferenceData>,
        dex_order_client: Arc<dyn OrderClient>,
        cex_order_client: Arc<dyn OrderClient>,
        stats: StatsPublisher,
    ) -> (Self, mpsc::UnboundedSender<StrategyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pair_count = ftx_reference.pairs.len();
        let currency_count = ftx_reference.currencies.len();

        let strategy = Self {
            config,
            ftx_reference,
            dex_order_client,
            cex_order_client,
            stats: stats.scoped("take_strategy"),
            events: rx,
            serum_books: vec![Book::new(); pair_count],
            ftx_books: vec![Book::new(); pair_count],
            mango_wallet: Wallet::with_sizes(currency_count, pair_count),
            ftx_wallet: Wallet::with_sizes(currency_count, pair_count),
            is_trading: Arc::new(AtomicBool::new(false)),
            is_running: false,
        };
        (strategy, tx)
    }

    /// Strategy event loop; owns all mutable strategy state.
    pub async fn run(mut self) {
        assert!(!self.is_running, "strategy already running");
        self.is_running = true;
        info!(
            max_usd_trade_size = %self.config.max_usd_trade_size,
            min_usd_trade_profit = %self.config.min_usd_trade_profit,
            dry_run = self.config.dry_run,
            "Take strategy running"
        );

        while let Some(event) = self.events.recv().await {
            match event {
                StrategyEvent::SerumBook { pair_index, book } => {
                    self.serum_books[pair_index] = book;
                    self.evaluate(pair_index, Side::Bid);
                    self.evaluate(pair_index, Side::Ask);
                }
                StrategyEvent::FtxBook { pair_index, book } => {
                    self.ftx_books[pair_index] = book;
                    self.evaluate(pair_index, Side::Bid);
                    self.evaluate(pair_index, Side::Ask);
                }
                StrategyEvent::MangoWallet(wallet) => {
                    self.mango_wallet = wallet;
                    self.hedge();
                }
                StrategyEvent::FtxWallet(wallet) => {
                    self.ftx_wallet = wallet;
                }
            }
        }
        info!("Take strategy stopped");
    }

    fn evaluate(&mut self, pair_index: usize, side: Side) {
        let dex_levels = self.serum_books[pair_index].side(side);
        let cex_levels = self.ftx_books[pair_index].side(side.flip());
        if dex_levels.is_empty() || cex_levels.is_empty() {
            return;
        }

        let signal = compute_arbitrage(
            dex_levels,
            cex_levels,
            side,
            crate::serum::taker_fee_rate(),
            crate::ftx::taker_fee_rate(),
        );
        self.publish_signal(pair_index, side, &signal);

        if self.is_trading.load(Ordering::Acquire) {
            debug!(pair_index, "Skipping arbitrage: trade in flight");
            return;
        }
        if signal.quantity.is_zero() || signal.expected_profit < self.config.min_usd_trade_profit
        {
            return;
        }
        if self.config.dry_run {
            info!(
                pair_index,
                expected_profit = %signal.expected_profit,
                quantity = %signal.quantity,
                "Dry run: arbitrage signal not traded"
            );
            return;
        }

        // The latch may only be taken when previously clear.
        if self
            .is_trading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let trade_quantity = signal
            .quantity
            .min(self.config.max_usd_trade_size / signal.trade_price);
        // Taking DEX bids means selling on the DEX and vice versa.
        let order = Order::immediate_or_cancel(
            side.flip(),
            signal.trade_price,
            trade_quantity,
            pair_index,
            "serum",
        );

        info!(
            pair_index,
            side = %order.side,
            price = %order.price,
            quantity = %order.quantity,
            expected_profit = %signal.expected_profit,
            "Sending DEX take order"
        );

        let client = self.dex_order_client.clone();
        let latch = self.is_trading.clone();
        tokio::spawn(async move {
            match client.send_order(order).await {
                Ok(order) => {
                    info!(
                        client_order_id = order.client_order_id,
                        fill_quantity = %order.fill_quantity,
                        "DEX take order closed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "DEX take order failed");
                }
            }
            // The latch clears on completion or failure, never earlier.
            latch.store(false, Ordering::Release);
        });
    }

    /// Hedge every currency short across both venues. USD never hedges.
    fn hedge(&mut self) {
        for currency_index in 0..self.ftx_reference.currencies.len() {
            let name = &self.ftx_reference.currencies[currency_index].name;
            if name == "USD" {
                continue;
            }

            let mango_position = self
                .mango_wallet
                .positions
                .get(currency_index)
                .copied()
                .unwrap_or_default();
            let ftx_position = self
                .ftx_wallet
                .positions
                .get(currency_index)
                .copied()
                .unwrap_or_default();
            let net = mango_position + ftx_position;
            if net >= Decimal::ZERO {
                continue;
            }

            let Some(pair_index) = self.ftx_reference.pair_for_base_currency(currency_index)
            else {
                error!(currency = %name, "No CEX pair configured to hedge currency");
                continue;
            };
            let pair = &self.ftx_reference.pairs[pair_index];

            let Some((price, quantity)) =
                plan_hedge(net, &self.ftx_books[pair_index], pair.quantity_increment)
            else {
                debug!(
                    currency = %name,
                    net = %net,
                    "Deficit not hedgeable (below increment or empty book)"
                );
                continue;
            };

            info!(
                currency = %name,
                ftx_position = %ftx_position,
                mango_position = %mango_position,
                price = %price,
                quantity = %quantity,
                "Hedging net short on CEX"
            );

            if self.config.dry_run {
                continue;
            }

            let order =
                Order::immediate_or_cancel(Side::Bid, price, quantity, pair_index, "ftx");
            let client = self.cex_order_client.clone();
            tokio::spawn(async move {
                match client.send_order(order).await {
                    Ok(order) => {
                        info!(
                            client_order_id = order.client_order_id,
                            fill_quantity = %order.fill_quantity,
                            "Hedge order closed"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Hedge order failed");
                    }
                }
            });
        }
    }

    fn publish_signal(&self, pair_index: usize, side: Side, signal: &ArbSignal) {
        self.stats.publish(Measurement {
            name: "arbitrage".into(),
            tags: vec![
                ("source".into(), "strategy".into()),
                ("side".into(), side.as_str().into()),
                ("trading_pair_index".into(), pair_index.to_string()),
            ],
            fields: vec![
                (
                    "arbitrage_quantity".into(),
                    FieldValue::Decimal(signal.quantity),
                ),
                (
                    "expected_profit".into(),
                    FieldValue::Decimal(signal.expected_profit),
                ),
                ("spread".into(), FieldValue::Decimal(signal.spread)),
                (
                    "spread_with_fees".into(),
                    FieldValue::Decimal(signal.spread_with_fees),
                ),
                (
                    "min_usd_trade_profit".into(),
                    FieldValue::Decimal(self.config.min_usd_trade_profit),
                ),
                (
                    "max_usd_trade_size".into(),
                    FieldValue::Decimal(self.config.max_usd_trade_size),
                ),
                (
                    "is_trading".into(),
                    FieldValue::Bool(self.is_trading.load(Ordering::Acquire)),
                ),
            ],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(entries: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
        entries
            .iter()
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
            .collect()
    }

    const DEX_FEE: Decimal = Decimal::from_parts(3, 0, 0, false, 4); // 0.0003
    const CEX_FEE: Decimal = Decimal::from_parts(2, 0, 0, false, 3); // 0.002

    #[test]
    fn no_arb_inside_spread() {
        // DEX 100/101 vs CEX 100.5/100.6: no crossing either way.
        let signal = compute_arbitrage(
            &levels(&[(dec!(100.0), dec!(1.0))]),
            &levels(&[(dec!(100.6), dec!(1.0))]),
            Side::Bid,
            DEX_FEE,
            CEX_FEE,
        );
        assert_eq!(signal.quantity, dec!(0));
        assert_eq!(signal.expected_profit, dec!(0));

        let signal = compute_arbitrage(
            &levels(&[(dec!(101.0), dec!(1.0))]),
            &levels(&[(dec!(100.5), dec!(1.0))]),
            Side::Ask,
            DEX_FEE,
            CEX_FEE,
        );
        assert_eq!(signal.quantity, dec!(0));
    }

    #[test]
    fn crossed_books_produce_expected_profit() {
        // DEX bids 110x2 vs CEX asks 100x2.
        let signal = compute_arbitrage(
            &levels(&[(dec!(110.0), dec!(2.0))]),
            &levels(&[(dec!(100.0), dec!(2.0))]),
            Side::Bid,
            DEX_FEE,
            CEX_FEE,
        );
        assert_eq!(signal.quantity, dec!(2.0));
        // (110 - (100 + 0.2 + 0.033)) * 2 = 19.534.
        assert_eq!(signal.expected_profit, dec!(19.534));
        assert_eq!(signal.trade_price, dec!(110.0));
        assert_eq!(signal.spread, dec!(10));
    }

    #[test]
    fn walk_stops_at_unprofitable_level() {
        let signal = compute_arbitrage(
            &levels(&[(dec!(110), dec!(1)), (dec!(100), dec!(5))]),
            &levels(&[(dec!(100), dec!(10))]),
            Side::Bid,
            DEX_FEE,
            CEX_FEE,
        );
        // Second DEX level is no longer profitable against 100 asks.
        assert_eq!(signal.quantity, dec!(1));
        assert_eq!(signal.trade_price, dec!(110));
    }

    #[test]
    fn walk_advances_by_min_remaining() {
        // DEX 110x3 consumes CEX 100x1 then 101x4.
        let signal = compute_arbitrage(
            &levels(&[(dec!(110), dec!(3))]),
            &levels(&[(dec!(100), dec!(1)), (dec!(101), dec!(4))]),
            Side::Bid,
            DEX_FEE,
            CEX_FEE,
        );
        assert_eq!(signal.quantity, dec!(3));
        let edge_first = dec!(110) - (dec!(100) + dec!(0.2) + dec!(0.033));
        let edge_second = dec!(110) - (dec!(101) + dec!(0.202) + dec!(0.033));
        assert_eq!(
            signal.expected_profit,
            edge_first * dec!(1) + edge_second * dec!(2)
        );
    }

    #[test]
    fn ask_side_walk_buys_dex() {
        // DEX asks 90x1 vs CEX bids 100x1.
        let signal = compute_arbitrage(
            &levels(&[(dec!(90), dec!(1))]),
            &levels(&[(dec!(100), dec!(1))]),
            Side::Ask,
            DEX_FEE,
            CEX_FEE,
        );
        assert_eq!(signal.quantity, dec!(1));
        // 100 - (90 + 0.2 + 0.027) = 9.773.
        assert_eq!(signal.expected_profit, dec!(9.773));
    }

    #[test]
    fn hedge_plans_cover_the_deficit() {
        let mut book = Book::new();
        book.replace_side(
            Side::Ask,
            levels(&[(dec!(100), dec!(1)), (dec!(101), dec!(5))]),
        );
        book.replace_side(Side::Bid, levels(&[(dec!(99), dec!(1))]));

        // Deficit 2: first level is too thin, price comes from level two.
        let (price, quantity) = plan_hedge(dec!(-2), &book, dec!(0.01)).unwrap();
        assert_eq!(price, dec!(101));
        assert_eq!(quantity, dec!(2));
    }

    #[test]
    fn hedge_skips_dust_and_flat_positions() {
        let mut book = Book::new();
        book.replace_side(Side::Ask, levels(&[(dec!(100), dec!(5))]));
        book.replace_side(Side::Bid, levels(&[(dec!(99), dec!(5))]));

        assert!(plan_hedge(dec!(0), &book, dec!(0.01)).is_none());
        assert!(plan_hedge(dec!(1), &book, dec!(0.01)).is_none());
        // Below the quantity increment.
        assert!(plan_hedge(dec!(-0.005), &book, dec!(0.01)).is_none());
    }

    #[test]
    fn hedge_requires_valid_book() {
        let book = Book::new();
        assert!(plan_hedge(dec!(-2), &book, dec!(0.01)).is_none());
    }
}
