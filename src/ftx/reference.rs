//! CEX reference data: markets and currencies resolved once at startup.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ftx::rest::FtxRestClient;
use crate::serum::reference::await_load_slot;
use crate::trading::{Price, Quantity};

/// CEX taker fee rate (20 bps).
pub fn taker_fee_rate() -> Decimal {
    dec!(0.002)
}

#[derive(Debug, Clone)]
pub struct FtxCurrency {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FtxPair {
    pub market_name: String,
    pub base_currency_index: usize,
    pub quote_currency_index: usize,
    pub price_increment: Price,
    pub quantity_increment: Quantity,
}

#[derive(Debug, Clone)]
pub struct FtxReferenceData {
    pub pairs: Vec<FtxPair>,
    pub currencies: Vec<FtxCurrency>,
}

impl FtxReferenceData {
    /// The pair whose base currency hedges `currency_index`, if any.
    pub fn pair_for_base_currency(&self, currency_index: usize) -> Option<usize> {
        self.pairs
            .iter()
            .position(|pair| pair.base_currency_index == currency_index)
    }
}

#[derive(Clone)]
pub struct FtxReferenceClient {
    slot: watch::Receiver<Option<Arc<FtxReferenceData>>>,
}

impl FtxReferenceClient {
    pub fn spawn(config: &Config, rest: FtxRestClient) -> Self {
        let pairs = config.pairs.clone();
        let currencies = config.currencies.clone();

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            match load(&pairs, &currencies, &rest).await {
                Ok(data) => {
                    info!(pairs = data.pairs.len(), "Loaded CEX reference data");
                    let _ = tx.send(Some(Arc::new(data)));
                }
                Err(e) => {
                    error!(error = %e, "CEX reference load failed");
                }
            }
        });

        Self { slot: rx }
    }

    pub async fn reference_data(&self) -> Result<Arc<FtxReferenceData>> {
        await_load_slot(self.slot.clone(), "ftx").await
    }
}

async fn load(
    pair_configs: &[crate::config::PairConfig],
    currency_configs: &[crate::config::CurrencyConfig],
    rest: &FtxRestClient,
) -> Result<FtxReferenceData> {
    let markets = rest.get_markets().await?;

    let currencies: Vec<FtxCurrency> = currency_configs
        .iter()
        .map(|currency| FtxCurrency {
            name: currency.name.clone(),
        })
        .collect();

    let mut pairs = Vec::with_capacity(pair_configs.len());
    for pair in pair_configs {
        let market = markets
            .iter()
            .find(|market| market.name == pair.cex_market_name)
            .ok_or_else(|| {
                Error::NotFound(format!("CEX market {} is not listed", pair.cex_market_name))
            })?;

        // Currency existence was validated at config load; indices must
        // resolve here.
        let base_currency_index = currencies
            .iter()
            .position(|c| c.name == pair.base)
            .ok_or_else(|| Error::Config(format!("unknown base currency {}", pair.base)))?;
        let quote_currency_index = currencies
            .iter()
            .position(|c| c.name == pair.quote)
            .ok_or_else(|| Error::Config(format!("unknown quote currency {}", pair.quote)))?;

        pairs.push(FtxPair {
            market_name: market.name.clone(),
            base_currency_index,
            quote_currency_index,
            price_increment: market.price_increment,
            quantity_increment: market.size_increment,
        });
    }

    Ok(FtxReferenceData { pairs, currencies })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_lookup_by_base_currency() {
        let data = FtxReferenceData {
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
        };
        assert_eq!(data.pair_for_base_currency(0), Some(0));
        assert_eq!(data.pair_for_base_currency(1), None);
    }
}
