//! CEX orderbook integrity checksum.
//!
//! The exchange's CRC-32 covers a string of the first 100 levels,
//! interleaved `bid_price:bid_qty:ask_price:ask_qty:...` with the shorter
//! side skipped once exhausted and the trailing separator dropped. Each
//! decimal is rendered with a trailing `.0` when it is integer-valued,
//! matching the venue's own float formatting.

use rust_decimal::Decimal;

use crate::trading::{Book, Side};

const CHECKSUM_DEPTH: usize = 100;

/// Render one decimal in the venue's checksum format.
fn push_checksum_decimal(value: Decimal, out: &mut String) {
    use std::fmt::Write;

    let normalized = value.normalize();
    if normalized.fract().is_zero() {
        let _ = write!(out, "{}.0:", normalized.trunc());
    } else {
        let _ = write!(out, "{}:", normalized);
    }
}

pub fn checksum_string(book: &Book) -> String {
    let bids = book.side(Side::Bid);
    let asks = book.side(Side::Ask);

    let mut out = String::new();
    let depth = bids.len().max(asks.len()).min(CHECKSUM_DEPTH);
    for level_index in 0..depth {
        if let Some(bid) = bids.get(level_index) {
            push_checksum_decimal(bid.price, &mut out);
            push_checksum_decimal(bid.quantity, &mut out);
        }
        if let Some(ask) = asks.get(level_index) {
            push_checksum_decimal(ask.price, &mut out);
            push_checksum_decimal(ask.quantity, &mut out);
        }
    }
    out.pop(); // trailing separator
    out
}

/// CRC-32 (reflected, poly 0xEDB88320, init/final 0xFFFFFFFF) of the
/// checksum string.
pub fn orderbook_checksum(book: &Book) -> u32 {
    crc32fast::hash(checksum_string(book).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::PriceLevel;
    use rust_decimal_macros::dec;

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

    #[test]
    fn interleaves_bid_ask_levels() {
        let book = book(
            &[(dec!(100.5), dec!(2)), (dec!(100.0), dec!(1.25))],
            &[(dec!(100.6), dec!(1))],
        );
        assert_eq!(
            checksum_string(&book),
            "100.5:2.0:100.6:1.0:100.0:1.25"
        );
    }

    #[test]
    fn integer_values_keep_trailing_zero() {
        let book = book(&[(dec!(4000), dec!(3))], &[]);
        assert_eq!(checksum_string(&book), "4000.0:3.0");
    }

    #[test]
    fn empty_book_is_empty_string() {
        let book = Book::new();
        assert_eq!(checksum_string(&book), "");
        // CRC of the empty string.
        assert_eq!(orderbook_checksum(&book), 0);
    }

    #[test]
    fn crc_matches_reference_vector() {
        // Standard CRC-32 test vector.
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn checksum_changes_with_book_content() {
        let a = book(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]);
        let b = book(&[(dec!(100), dec!(2))], &[(dec!(101), dec!(1))]);
        assert_ne!(orderbook_checksum(&a), orderbook_checksum(&b));
    }

    #[test]
    fn depth_is_capped_at_one_hundred() {
        let levels: Vec<(Decimal, Decimal)> = (0..150)
            .map(|i| (Decimal::from(10_000 - i), dec!(1)))
            .collect();
        let full = book(&levels, &[]);
        let truncated = book(&levels[..100], &[]);
        assert_eq!(
            checksum_string(&full),
            checksum_string(&truncated)
        );
    }
}
