use rust_decimal::Decimal;

use crate::trading::{Price, Quantity, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    ImmediateOrCancel,
}

/// Order lifecycle states. Transitions are monotonic NEW → OPEN → CLOSED;
/// CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderState {
    Created,
    New,
    Open,
    Closed,
}

impl OrderState {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::New => "new",
            OrderState::Open => "open",
            OrderState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub fill_quantity: Quantity,
    pub average_fill_price: Price,
    pub state: OrderState,
    pub order_type: OrderType,
    /// Exchange-assigned id, 0 until acknowledged.
    pub order_id: u64,
    /// Process-local monotonic correlation key (nanosecond timestamp).
    pub client_order_id: u64,
    pub pair_index: usize,
    pub venue: &'static str,
}

impl Order {
    pub fn immediate_or_cancel(
        side: Side,
        price: Price,
        quantity: Quantity,
        pair_index: usize,
        venue: &'static str,
    ) -> Self {
        Self {
            side,
            price,
            quantity,
            fill_quantity: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            state: OrderState::Created,
            order_type: OrderType::ImmediateOrCancel,
            order_id: 0,
            client_order_id: 0,
            pair_index,
            venue,
        }
    }

    /// Apply a state transition, enforcing monotonicity. Updates out of
    /// order (a late NEW after CLOSED) are dropped.
    pub fn transition(&mut self, state: OrderState) -> bool {
        if state < self.state {
            return false;
        }
        self.state = state;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state == OrderState::Closed
    }
}

/// Process-local monotonic nanosecond timestamp used as client order id.
pub fn next_client_order_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64;

    // Strictly increasing even if the clock stalls within a nanosecond.
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}
