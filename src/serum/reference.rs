//! Serum reference data: one batched load at startup, immutable after.
//!
//! Market accounts and the mints they reference are fetched in a single
//! multi-account read, cross-indexed by mint address into per-pair
//! base/quote currency indices, and verified against the configured
//! currency list. Late callers of `reference_data()` await the load.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{Config, CurrencyConfig, PairConfig};
use crate::core::Pubkey;
use crate::error::{Error, Result};
use crate::solana::token::MintAccount;
use crate::solana::AccountBatcher;
use crate::serum::layout::MarketAccount;
use crate::trading::{pow10, Price, Quantity};

pub const REFERENCE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SerumCurrency {
    pub name: String,
    pub mint: Pubkey,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct SerumPair {
    pub market_address: Pubkey,
    pub market: MarketAccount,
    pub base_currency_index: usize,
    pub quote_currency_index: usize,
    pub price_increment: Price,
    pub quantity_increment: Quantity,
}

#[derive(Debug, Clone)]
pub struct SerumReferenceData {
    pub program_id: Pubkey,
    pub pairs: Vec<SerumPair>,
    pub currencies: Vec<SerumCurrency>,
}

type LoadSlot = watch::Receiver<Option<Arc<SerumReferenceData>>>;

#[derive(Clone)]
pub struct SerumReferenceClient {
    slot: LoadSlot,
}

impl SerumReferenceClient {
    /// Spawn the background load.
    pub fn spawn(config: &Config, batcher: Arc<AccountBatcher>) -> Result<Self> {
        let program_id = Pubkey::from_base58(&config.serum.program_id)
            .map_err(|_| Error::Config("serum.program_id is not valid base58".into()))?;
        let pairs = config.pairs.clone();
        let currencies = config.currencies.clone();

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            match load(program_id, &pairs, &currencies, &batcher).await {
                Ok(data) => {
                    info!(
                        pairs = data.pairs.len(),
                        currencies = data.currencies.len(),
                        "Loaded serum reference data"
                    );
                    let _ = tx.send(Some(Arc::new(data)));
                }
                Err(e) => {
                    // Waiters observe the closed channel and fail.
                    error!(error = %e, "Serum reference load failed");
                }
            }
        });

        Ok(Self { slot: rx })
    }

    /// Await the one-shot load; every caller gets the same immutable copy.
    pub async fn reference_data(&self) -> Result<Arc<SerumReferenceData>> {
        await_load_slot(self.slot.clone(), "serum").await
    }
}

/// Shared late-binding wait: resolve once the slot holds a value, fail if
/// the loader died or the deadline passes.
pub(crate) async fn await_load_slot<T: Clone>(
    mut slot: watch::Receiver<Option<T>>,
    venue: &str,
) -> Result<T> {
    let deadline = tokio::time::timeout(REFERENCE_LOAD_TIMEOUT, async {
        loop {
            if let Some(data) = slot.borrow().clone() {
                return Ok(data);
            }
            if slot.changed().await.is_err() {
                // Loader dropped without publishing.
                return Err(Error::Internal(format!(
                    "{} reference data load failed",
                    venue
                )));
            }
        }
    })
    .await;

    match deadline {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} reference data load timed out",
            venue
        ))),
    }
}

async fn load(
    program_id: Pubkey,
    pair_configs: &[PairConfig],
    currency_configs: &[CurrencyConfig],
    batcher: &AccountBatcher,
) -> Result<SerumReferenceData> {
    // One batched read: all market accounts, then all mints.
    let market_keys: Vec<Pubkey> = pair_configs
        .iter()
        .map(|pair| {
            Pubkey::from_base58(&pair.dex_market_address).map_err(|_| {
                Error::Config(format!(
                    "dex_market_address for {}/{} is not valid base58",
                    pair.base, pair.quote
                ))
            })
        })
        .collect::<Result<_>>()?;
    let mint_keys: Vec<Pubkey> = currency_configs
        .iter()
        .map(|currency| {
            Pubkey::from_base58(&currency.mint).map_err(|_| {
                Error::Config(format!("mint for {} is not valid base58", currency.name))
            })
        })
        .collect::<Result<_>>()?;

    let mut keys = market_keys.clone();
    keys.extend_from_slice(&mint_keys);
    let accounts = batcher.get_multiple_accounts(&keys).await?;

    let mut currencies = Vec::with_capacity(currency_configs.len());
    for (index, currency) in currency_configs.iter().enumerate() {
        let account = accounts[market_keys.len() + index]
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("mint account for {}", currency.name)))?;
        let mint = MintAccount::parse(&account.data)?;
        currencies.push(SerumCurrency {
            name: currency.name.clone(),
            mint: mint_keys[index],
            decimals: mint.decimals,
        });
    }

    let mut pairs = Vec::with_capacity(pair_configs.len());
    for (index, pair) in pair_configs.iter().enumerate() {
        let account = accounts[index].as_ref().ok_or_else(|| {
            Error::NotFound(format!("market account {}", pair.dex_market_address))
        })?;
        let market = MarketAccount::parse(&account.data)?;

        // Cross-index the market's mints into the currency table.
        let base_currency_index = currencies
            .iter()
            .position(|c| c.mint == market.base_mint)
            .ok_or_else(|| {
                Error::Config(format!(
                    "market {} base mint is not a configured currency",
                    pair.dex_market_address
                ))
            })?;
        let quote_currency_index = currencies
            .iter()
            .position(|c| c.mint == market.quote_mint)
            .ok_or_else(|| {
                Error::Config(format!(
                    "market {} quote mint is not a configured currency",
                    pair.dex_market_address
                ))
            })?;

        let base_decimals = currencies[base_currency_index].decimals;
        let quote_decimals = currencies[quote_currency_index].decimals;

        pairs.push(SerumPair {
            market_address: market_keys[index],
            price_increment: price_increment(&market, base_decimals, quote_decimals),
            quantity_increment: quantity_increment(&market, base_decimals),
            market,
            base_currency_index,
            quote_currency_index,
        });
    }

    Ok(SerumReferenceData {
        program_id,
        pairs,
        currencies,
    })
}

/// Smallest representable price step:
/// `quote_lot * 10^base_dec / (10^quote_dec * base_lot)`.
fn price_increment(market: &MarketAccount, base_decimals: u8, quote_decimals: u8) -> Price {
    Price::from(market.quote_lot_size) * pow10(base_decimals)
        / (pow10(quote_decimals) * Price::from(market.base_lot_size))
}

/// Smallest representable size step: `base_lot / 10^base_dec`.
fn quantity_increment(market: &MarketAccount, base_decimals: u8) -> Quantity {
    Quantity::from(market.base_lot_size) / pow10(base_decimals)
}
