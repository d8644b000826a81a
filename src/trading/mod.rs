//! Venue-independent trading domain types.

pub mod book;
pub mod client;
pub mod order;
pub mod side;
pub mod wallet;

pub use book::{Book, PriceLevel};
pub use client::OrderClient;
pub use order::{next_client_order_id, Order, OrderState, OrderType};
pub use side::Side;
pub use wallet::Wallet;

use rust_decimal::Decimal;

pub type Price = Decimal;
pub type Quantity = Decimal;

/// `10^exponent` as an exact decimal, for fixed-point unit conversions.
pub fn pow10(exponent: u8) -> Decimal {
    let mut value = Decimal::ONE;
    for _ in 0..exponent {
        value *= Decimal::from(10u8);
    }
    value
}

/// Native fixed-point amount to decimal: `raw / 10^decimals`.
pub fn native_to_decimal(raw: u64, decimals: u8) -> Decimal {
    Decimal::from_i128_with_scale(raw as i128, decimals as u32)
}
