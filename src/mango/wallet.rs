//! Margin-venue wallet: positions and health-factor-aware margin.
//!
//! The wallet subscribes to the margin account, the cache, and every
//! open-orders account. Each update recomputes signed positions
//! (`deposit × deposit_index − borrow × borrow_index`, scaled by token
//! decimals) and the health factor, from which per-pair margin headroom is
//! derived. Negative health zeroes all margin.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::mango::layout::{fixed_to_decimal, CacheAccount, MarginAccount};
use crate::mango::reference::{MangoReferenceClient, MangoReferenceData};
use crate::serum::layout::OpenOrdersAccount;
use crate::serum::reference::SerumReferenceData;
use crate::solana::message::{account_subscribe_params, parse_account_notification, Commitment};
use crate::solana::WsRpcClient;
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{pow10, Price, Quantity, Wallet};

pub type WalletCallback = Arc<dyn Fn(&Wallet) + Send + Sync>;

/// Mutable inputs to the health computation, updated by subscriptions.
pub struct HealthState {
    pub account: MarginAccount,
    pub cache: CacheAccount,
    /// Per configured pair, the latest open-orders image.
    pub open_orders: Vec<Option<OpenOrdersAccount>>,
}

/// Intermediate health terms, kept separate for inspection and tests.
#[derive(Debug, Clone)]
pub struct HealthComponents {
    pub quote: Quantity,
    pub spot: Vec<Quantity>,
    pub price: Vec<Price>,
    pub weight: Vec<Price>,
}

pub fn compute_positions(
    state: &HealthState,
    reference: &MangoReferenceData,
    serum: &SerumReferenceData,
) -> Vec<Quantity> {
    reference
        .currencies
        .iter()
        .enumerate()
        .map(|(currency_index, currency)| {
            let token_index = currency.token_index;
            let deposit_index = fixed_to_decimal(state.cache.root_bank_caches[token_index].deposit_index);
            let borrow_index = fixed_to_decimal(state.cache.root_bank_caches[token_index].borrow_index);
            let deposits = fixed_to_decimal(state.account.deposits[token_index]);
            let borrows = fixed_to_decimal(state.account.borrows[token_index]);

            let native = deposits * deposit_index - borrows * borrow_index;
            native / pow10(serum.currencies[currency_index].decimals)
        })
        .collect()
}

/// Cached oracle price for a pair, rescaled from native units to UI units.
fn oracle_price(
    state: &HealthState,
    reference: &MangoReferenceData,
    serum: &SerumReferenceData,
    pair_index: usize,
) -> Price {
    let pair = &reference.pairs[pair_index];
    let base_decimals = serum.currencies
        [serum.pairs[pair_index].base_currency_index]
        .decimals;
    let quote_decimals = serum.currencies
        [serum.pairs[pair_index].quote_currency_index]
        .decimals;

    fixed_to_decimal(state.cache.price_caches[pair.group_pair_index].price)
        * pow10(base_decimals)
        / pow10(quote_decimals)
}

pub fn compute_health_components(
    state: &HealthState,
    reference: &MangoReferenceData,
    serum: &SerumReferenceData,
    positions: &[Quantity],
) -> HealthComponents {
    let pair_count = reference.pairs.len();
    let mut components = HealthComponents {
        quote: Decimal::ZERO,
        spot: vec![Decimal::ZERO; pair_count],
        price: vec![Decimal::ZERO; pair_count],
        weight: vec![Decimal::ZERO; pair_count],
    };

    for (currency_index, currency) in reference.currencies.iter().enumerate() {
        let token_index = currency.token_index;
        let position = positions[currency_index];

        if (token_index as u64) < reference.group.num_oracles {
            // Base currency of some pair: token index doubles as the
            // group's pair index.
            let Some(pair_index) = reference
                .pairs
                .iter()
                .position(|pair| pair.base_token_index == token_index)
            else {
                continue;
            };
            let group_pair_index = reference.pairs[pair_index].group_pair_index;

            let price = oracle_price(state, reference, serum, pair_index);
            components.price[pair_index] = price;

            if state.account.in_margin_basket[group_pair_index] {
                let serum_pair = &serum.pairs[pair_index];
                let base_decimals = serum.currencies[serum_pair.base_currency_index].decimals;
                let quote_decimals = serum.currencies[serum_pair.quote_currency_index].decimals;

                let open_orders = state.open_orders[pair_index].as_ref();
                let (base_free, base_locked, quote_free, quote_locked) = match open_orders {
                    Some(oo) => (
                        Decimal::from(oo.native_base_free) / pow10(base_decimals),
                        Decimal::from(oo.native_base_total - oo.native_base_free)
                            / pow10(base_decimals),
                        Decimal::from(oo.native_quote_free + oo.referrer_rebates_accrued)
                            / pow10(quote_decimals),
                        Decimal::from(oo.native_quote_total - oo.native_quote_free)
                            / pow10(quote_decimals),
                    ),
                    None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
                };

                // Worst case across resting orders: all bids filling vs all
                // asks filling.
                let bids_base = if price.is_zero() {
                    position + base_free + base_locked
                } else {
                    position + base_free + base_locked + quote_locked / price
                };
                let asks_base = position + base_free;

                if bids_base.abs() > asks_base.abs() {
                    components.spot[pair_index] = bids_base;
                    components.quote += quote_free;
                } else {
                    components.spot[pair_index] = asks_base;
                    components.quote += base_locked * price + quote_free + quote_locked;
                }
            } else {
                components.spot[pair_index] = position;
            }

            let market = &reference.group.spot_markets[group_pair_index];
            components.weight[pair_index] = if components.spot[pair_index] >= Decimal::ZERO {
                fixed_to_decimal(market.init_asset_weight)
            } else {
                fixed_to_decimal(market.init_liab_weight)
            };
        } else if token_index == crate::mango::layout::QUOTE_TOKEN_INDEX {
            // The quote currency is 1:1 with itself.
            components.quote += position;
        }
    }

    components
}

pub fn health_from_components(components: &HealthComponents) -> Quantity {
    let mut health = components.quote;
    for pair_index in 0..components.spot.len() {
        health += components.spot[pair_index]
            * components.price[pair_index]
            * components.weight[pair_index];
    }
    health
}

/// Full wallet view: positions plus per-pair margin headroom
/// `health / (1 - weight)`, zeroed when health is not positive.
pub fn compute_wallet(
    state: &HealthState,
    reference: &MangoReferenceData,
    serum: &SerumReferenceData,
) -> Wallet {
    let positions = compute_positions(state, reference, serum);
    let components = compute_health_components(state, reference, serum, &positions);
    let health = health_from_components(&components);

    let mut wallet = Wallet {
        positions,
        margin_available: vec![Decimal::ZERO; reference.pairs.len()],
    };

    if health > Decimal::ZERO {
        for pair_index in 0..reference.pairs.len() {
            let denominator = Decimal::ONE - components.weight[pair_index];
            if denominator <= Decimal::ZERO {
                error!(pair_index, "Margin weight at or above one, zeroing margin");
                continue;
            }
            wallet.margin_available[pair_index] = health / denominator;
        }
    }

    wallet
}

struct Inner {
    reference: Arc<MangoReferenceData>,
    serum: Arc<SerumReferenceData>,
    state: Mutex<HealthState>,
    callbacks: RwLock<Vec<WalletCallback>>,
    stats: StatsPublisher,
    ws: WsRpcClient,
}

/// Subscription-driven wallet client.
#[derive(Clone)]
pub struct MangoWalletClient {
    inner: Arc<Inner>,
}

impl MangoWalletClient {
    pub async fn start(
        mango_reference: &MangoReferenceClient,
        serum_reference: &crate::serum::reference::SerumReferenceClient,
        ws: WsRpcClient,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = mango_reference.reference_data().await?;
        let serum = serum_reference.reference_data().await?;

        let state = HealthState {
            account: reference.account.clone(),
            cache: reference.cache.clone(),
            open_orders: vec![None; reference.pairs.len()],
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(state),
            callbacks: RwLock::new(Vec::new()),
            stats: stats.scoped("mango_wallet"),
            ws,
            serum,
            reference,
        });

        // Margin account and cache subscriptions.
        spawn_account_subscription(inner.clone(), inner.reference.account_address, Target::Account);
        spawn_account_subscription(inner.clone(), inner.reference.group.cache, Target::Cache);

        // One subscription per open-orders account.
        for (pair_index, pair) in inner.reference.pairs.iter().enumerate() {
            if pair.open_orders_address.is_zero() {
                debug!(pair_index, "Pair has no open-orders account yet");
                continue;
            }
            spawn_account_subscription(
                inner.clone(),
                pair.open_orders_address,
                Target::OpenOrders(pair_index),
            );
        }

        info!("Margin wallet client started");
        Ok(Self { inner })
    }

    /// Register a subscriber and push the current snapshot to it.
    pub fn subscribe_wallet(&self, callback: WalletCallback) {
        let wallet = self.inner.recompute_and_publish();
        callback(&wallet);
        self.inner.callbacks.write().push(callback);
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Account,
    Cache,
    OpenOrders(usize),
}

impl Inner {
    fn recompute_and_publish(&self) -> Wallet {
        let wallet = {
            let state = self.state.lock();
            compute_wallet(&state, &self.reference, &self.serum)
        };

        let mut measurements = Vec::with_capacity(
            wallet.positions.len() + wallet.margin_available.len(),
        );
        for (currency_index, position) in wallet.positions.iter().enumerate() {
            measurements.push(Measurement {
                name: "wallet".into(),
                tags: vec![
                    ("source".into(), "mango".into()),
                    ("currency_index".into(), currency_index.to_string()),
                ],
                fields: vec![("position".into(), FieldValue::Decimal(*position))],
            });
        }
        for (pair_index, margin) in wallet.margin_available.iter().enumerate() {
            measurements.push(Measurement {
                name: "wallet".into(),
                tags: vec![
                    ("source".into(), "mango".into()),
                    ("trading_pair_index".into(), pair_index.to_string()),
                ],
                fields: vec![("margin_available".into(), FieldValue::Decimal(*margin))],
            });
        }
        self.stats.publish_batch(&measurements);

        wallet
    }

    fn apply_update(&self, target: Target, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock();
            match target {
                Target::Account => state.account = MarginAccount::parse(data)?,
                Target::Cache => state.cache = CacheAccount::parse(data)?,
                Target::OpenOrders(pair_index) => {
                    state.open_orders[pair_index] = Some(OpenOrdersAccount::parse(data)?)
                }
            }
        }

        let wallet = self.recompute_and_publish();
        for callback in self.callbacks.read().iter() {
            callback(&wallet);
        }
        Ok(())
    }
}

fn spawn_account_subscription(inner: Arc<Inner>, account: crate::core::Pubkey, target: Target) {
    tokio::spawn(async move {
        loop {
            let mut subscription = match inner
                .ws
                .subscribe(
                    "accountSubscribe",
                    account_subscribe_params(&account, Commitment::Processed),
                    "accountUnsubscribe",
                )
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(account = %account, error = %e, "Wallet subscription failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = subscription.next().await {
                match parse_account_notification(&payload)
                    .and_then(|account_data| inner.apply_update(target, &account_data.data))
                {
                    Ok(()) => {}
                    Err(e) => {
                        error!(account = %account, error = %e, "Bad wallet notification");
                    }
                }
            }
            info!(account = %account, "Wallet subscription closed, re-subscribing");
        }
    });
}
