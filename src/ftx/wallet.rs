//! CEX wallet: 1 s balance polling.
//!
//! Free balances map straight onto positions; the venue has no
//! cross-margin here, so each pair's margin headroom is simply the free
//! quote balance.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::error::Result;
use crate::ftx::message::Balance;
use crate::ftx::reference::{FtxReferenceClient, FtxReferenceData};
use crate::ftx::rest::FtxRestClient;
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::Wallet;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub type WalletCallback = Arc<dyn Fn(&Wallet) + Send + Sync>;

/// Build the wallet view from one balances response.
pub fn wallet_from_balances(reference: &FtxReferenceData, balances: &[Balance]) -> Wallet {
    let mut wallet = Wallet::with_sizes(reference.currencies.len(), reference.pairs.len());

    for (currency_index, currency) in reference.currencies.iter().enumerate() {
        if let Some(balance) = balances.iter().find(|b| b.coin == currency.name) {
            wallet.positions[currency_index] = balance.free;
        }
    }

    for (pair_index, pair) in reference.pairs.iter().enumerate() {
        wallet.margin_available[pair_index] = wallet.positions[pair.quote_currency_index]
            .max(Decimal::ZERO);
    }

    wallet
}

struct Inner {
    reference: Arc<FtxReferenceData>,
    rest: FtxRestClient,
    stats: StatsPublisher,
    callbacks: RwLock<Vec<WalletCallback>>,
}

pub struct FtxWalletClient {
    inner: Arc<Inner>,
}

impl FtxWalletClient {
    pub async fn start(
        reference_client: &FtxReferenceClient,
        rest: FtxRestClient,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = reference_client.reference_data().await?;

        let inner = Arc::new(Inner {
            reference,
            rest,
            stats: stats.scoped("ftx_wallet"),
            callbacks: RwLock::new(Vec::new()),
        });

        tokio::spawn(poll_balances(inner.clone()));
        info!("CEX wallet polling started");

        Ok(Self { inner })
    }

    pub fn subscribe_wallet(&self, callback: WalletCallback) {
        self.inner.callbacks.write().push(callback);
    }
}

async fn poll_balances(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let balances = match inner.rest.get_balances().await {
            Ok(balances) => balances,
            Err(e) => {
                error!(error = %e, "CEX balance poll failed");
                continue;
            }
        };

        let wallet = wallet_from_balances(&inner.reference, &balances);

        let mut measurements = Vec::with_capacity(wallet.positions.len());
        for (currency_index, position) in wallet.positions.iter().enumerate() {
            measurements.push(Measurement {
                name: "wallet".into(),
                tags: vec![
                    ("source".into(), "ftx".into()),
                    ("currency_index".into(), currency_index.to_string()),
                ],
                fields: vec![("position".into(), FieldValue::Decimal(*position))],
            });
        }
        inner.stats.publish_batch(&measurements);

        for callback in inner.callbacks.read().iter() {
            callback(&wallet);
        }
    }
}
