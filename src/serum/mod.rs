//! Serum venue: on-chain account layouts, reference data and the L2 book
//! engine.

pub mod layout;
pub mod market_data;
pub mod reference;

pub use market_data::SerumMarketData;
pub use reference::{SerumReferenceClient, SerumReferenceData};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Serum taker fee rate (3 bps).
pub fn taker_fee_rate() -> Decimal {
    dec!(0.0003)
}
