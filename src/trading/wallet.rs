use rust_decimal::Decimal;

use crate::trading::Quantity;

/// Per-venue position and margin view.
///
/// `positions` is indexed by currency, signed net of deposits and borrows.
/// `margin_available` is indexed by trading pair, a non-negative cap in
/// quote units on how much notional the venue will let us take.
#[derive(Debug, Clone, Default)]
pub struct Wallet {
    pub positions: Vec<Quantity>,
    pub margin_available: Vec<Quantity>,
}

impl Wallet {
    pub fn with_sizes(currency_count: usize, pair_count: usize) -> Self {
        Self {
            positions: vec![Decimal::ZERO; currency_count],
            margin_available: vec![Decimal::ZERO; pair_count],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_wallet_starts_flat() {
        let wallet = Wallet::with_sizes(3, 2);
        assert_eq!(wallet.positions.len(), 3);
        assert_eq!(wallet.margin_available.len(), 2);
        assert!(wallet.positions.iter().all(|p| p.is_zero()));
    }
}
