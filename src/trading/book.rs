//! L2 order book: two price-sorted level sequences.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::trading::{Price, Quantity, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

impl PriceLevel {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

/// One venue's view of a market. Bids are descending, asks ascending;
/// adjacent levels always have distinct prices. An empty side is valid.
#[derive(Debug, Clone, Default)]
pub struct Book {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    pub exchange_ts: Option<DateTime<Utc>>,
    pub receive_ts: Option<DateTime<Utc>>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Replace a side wholesale. The input must already be sorted in the
    /// side's order; levels at the same price are merged.
    pub fn replace_side(&mut self, side: Side, levels: Vec<PriceLevel>) {
        let book_side = self.side_mut(side);
        book_side.clear();
        for level in levels {
            match book_side.last_mut() {
                Some(last) if last.price == level.price => last.quantity += level.quantity,
                _ => book_side.push(level),
            }
        }
    }

    /// Apply one `(price, quantity)` delta to a side, preserving order:
    /// zero quantity deletes the level, a matching price replaces its
    /// quantity, otherwise the level is inserted at its sorted position.
    pub fn apply_delta(&mut self, side: Side, price: Price, quantity: Quantity) {
        let book_side = self.side_mut(side);
        let position = book_side.partition_point(|level| match side {
            Side::Bid => level.price > price,
            Side::Ask => level.price < price,
        });

        match book_side.get(position) {
            Some(level) if level.price == price => {
                if quantity.is_zero() {
                    book_side.remove(position);
                } else {
                    book_side[position].quantity = quantity;
                }
            }
            _ if quantity.is_zero() => {
                // Delete for a level we never had; nothing to do.
            }
            _ => {
                book_side.insert(position, PriceLevel::new(price, quantity));
            }
        }
    }

    pub fn best(&self, side: Side) -> Option<&PriceLevel> {
        self.side(side).first()
    }

    /// Strict price monotonicity in the side's order, no duplicates.
    pub fn is_sorted(&self) -> bool {
        self.bids.windows(2).all(|w| w[0].price > w[1].price)
            && self.asks.windows(2).all(|w| w[0].price < w[1].price)
    }

    /// The limit price for taking `target` quantity against this side:
    /// the first level at which cumulative quantity covers the target.
    pub fn price_for_quantity(&self, side: Side, target: Quantity) -> Option<Price> {
        let mut cumulative = Decimal::ZERO;
        for level in self.side(side) {
            cumulative += level.quantity;
            if cumulative >= target {
                return Some(level.price);
            }
        }
        self.side(side).last().map(|level| level.price)
    }
}
