//! Book reconstruction: delta sequences and checksum gating.

use basisbot::ftx::checksum::{checksum_string, orderbook_checksum};
use basisbot::ftx::market_data::{apply_book_message, ApplyOutcome};
use basisbot::ftx::message::OrderbookData;
use basisbot::ftx::ws::BookAction;
use basisbot::trading::{Book, PriceLevel, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn levels(entries: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
    entries
        .iter()
        .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
        .collect()
}

#[test]
fn delta_sequence_deletes_replaces_inserts() {
    let mut book = Book::new();
    book.replace_side(
        Side::Bid,
        levels(&[(dec!(100), dec!(5)), (dec!(99), dec!(3)), (dec!(98), dec!(1))]),
    );

    book.apply_delta(Side::Bid, dec!(99), dec!(0));
    assert_eq!(
        book.side(Side::Bid),
        levels(&[(dec!(100), dec!(5)), (dec!(98), dec!(1))]).as_slice()
    );

    book.apply_delta(Side::Bid, dec!(100), dec!(7));
    assert_eq!(
        book.side(Side::Bid),
        levels(&[(dec!(100), dec!(7)), (dec!(98), dec!(1))]).as_slice()
    );

    book.apply_delta(Side::Bid, dec!(101), dec!(2));
    assert_eq!(
        book.side(Side::Bid),
        levels(&[(dec!(101), dec!(2)), (dec!(100), dec!(7)), (dec!(98), dec!(1))]).as_slice()
    );
}

/// Replays a snapshot plus a run of deltas where every message carries the
/// venue-correct checksum; every step must commit.
#[test]
fn valid_snapshot_delta_sequence_always_matches_checksum() {
    let mut venue_book = Book::new();
    venue_book.replace_side(Side::Bid, levels(&[(dec!(100), dec!(5)), (dec!(99), dec!(3))]));
    venue_book.replace_side(Side::Ask, levels(&[(dec!(101), dec!(2))]));

    let mut local = Book::new();
    let snapshot = OrderbookData {
        time: 1.0,
        checksum: orderbook_checksum(&venue_book),
        bids: venue_book
            .side(Side::Bid)
            .iter()
            .map(|l| (l.price, l.quantity))
            .collect(),
        asks: venue_book
            .side(Side::Ask)
            .iter()
            .map(|l| (l.price, l.quantity))
            .collect(),
    };
    assert_eq!(
        apply_book_message(&mut local, BookAction::Snapshot, &snapshot),
        ApplyOutcome::Committed
    );

    let steps: &[(Side, Decimal, Decimal)] = &[
        (Side::Bid, dec!(99), dec!(0)),     // delete
        (Side::Bid, dec!(100), dec!(7)),    // replace
        (Side::Ask, dec!(100.5), dec!(4)),  // insert at front
        (Side::Ask, dec!(101), dec!(0)),    // delete
    ];

    for (side, price, quantity) in steps {
        venue_book.apply_delta(*side, *price, *quantity);
        let delta = OrderbookData {
            time: 2.0,
            checksum: orderbook_checksum(&venue_book),
            bids: if *side == Side::Bid {
                vec![(*price, *quantity)]
            } else {
                vec![]
            },
            asks: if *side == Side::Ask {
                vec![(*price, *quantity)]
            } else {
                vec![]
            },
        };
        assert_eq!(
            apply_book_message(&mut local, BookAction::Delta, &delta),
            ApplyOutcome::Committed,
            "step {:?} {} {}",
            side,
            price,
            quantity
        );
        assert_eq!(checksum_string(&local), checksum_string(&venue_book));
    }
}

#[test]
fn desynchronized_delta_discards_book() {
    let mut local = Book::new();
    let snapshot = {
        let mut book = Book::new();
        book.replace_side(Side::Bid, levels(&[(dec!(100), dec!(1))]));
        book.replace_side(Side::Ask, levels(&[(dec!(101), dec!(1))]));
        OrderbookData {
            time: 1.0,
            checksum: orderbook_checksum(&book),
            bids: vec![(dec!(100), dec!(1))],
            asks: vec![(dec!(101), dec!(1))],
        }
    };
    apply_book_message(&mut local, BookAction::Snapshot, &snapshot);

    let bad_delta = OrderbookData {
        time: 2.0,
        checksum: 1,
        bids: vec![(dec!(100), dec!(3))],
        asks: vec![],
    };
    assert_eq!(
        apply_book_message(&mut local, BookAction::Delta, &bad_delta),
        ApplyOutcome::Desynchronized
    );
    // The stale image must not survive for the strategy to read.
    assert!(!local.is_valid());
}

#[test]
fn book_sides_stay_strictly_sorted() {
    let mut book = Book::new();
    for price in [100, 98, 102, 99, 101] {
        book.apply_delta(Side::Bid, Decimal::from(price), dec!(1));
        book.apply_delta(Side::Ask, Decimal::from(price + 10), dec!(1));
    }
    assert!(book.is_sorted());

    // Replacing and deleting keeps the invariant.
    book.apply_delta(Side::Bid, dec!(100), dec!(5));
    book.apply_delta(Side::Bid, dec!(99), dec!(0));
    assert!(book.is_sorted());
}
