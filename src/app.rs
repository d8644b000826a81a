//! Engine wiring.
//!
//! Builds the component graph leaves-first: telemetry, key store, chain
//! transports, reference loaders, market data, wallets, order clients,
//! then the strategy loop. Runs until ctrl-c.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::core::KeyStore;
use crate::error::Result;
use crate::ftx::{
    Credentials, FtxMarketData, FtxOrderClient, FtxReferenceClient, FtxRestClient,
    FtxWalletClient, FtxWsClient,
};
use crate::mango::{MangoOrderClient, MangoReferenceClient, MangoWalletClient};
use crate::serum::{SerumMarketData, SerumReferenceClient};
use crate::solana::{AccountBatcher, HttpRpcClient, SlotTracker, WsRpcClient};
use crate::stats::StatsPublisher;
use crate::strategy::{StrategyEvent, TakeStrategy};
use crate::trading::OrderClient;

pub struct App;

impl App {
    pub async fn run(config: Config) -> Result<()> {
        let stats = match &config.telemetry {
            Some(telemetry) => StatsPublisher::spawn(telemetry),
            None => {
                warn!("No telemetry endpoint configured; metrics disabled");
                StatsPublisher::disabled()
            }
        };

        // Key custody first; order signing depends on it.
        let key_store = Arc::new(KeyStore::new(config.key_store.path.clone()));
        key_store.verify_directory()?;

        // Chain transports.
        let http = Arc::new(HttpRpcClient::new(config.solana.http_url.clone())?);
        let ws = WsRpcClient::connect(config.solana.ws_url.clone());
        let batcher = Arc::new(AccountBatcher::new(http.clone()));
        let slot_tracker = SlotTracker::spawn(http.clone(), ws.clone(), stats.clone());

        info!(health = %http.get_health().await?, "Chain node reachable");

        // CEX transports.
        let rest = FtxRestClient::new(
            config.ftx.host.clone(),
            config.ftx.api_key.clone(),
            config.ftx.api_secret.clone(),
        )?;
        let credentials = (!config.ftx.api_key.is_empty()).then(|| Credentials {
            api_key: config.ftx.api_key.clone(),
            api_secret: config.ftx.api_secret.clone(),
        });
        let (ftx_ws, book_events, private_events) =
            FtxWsClient::connect(config.ftx.host.clone(), credentials);

        // Reference data loads in the background; consumers await it.
        let serum_reference = SerumReferenceClient::spawn(&config, batcher.clone())?;
        let mango_reference =
            MangoReferenceClient::spawn(&config, serum_reference.clone(), batcher.clone())?;
        let ftx_reference = FtxReferenceClient::spawn(&config, rest.clone());

        // Market data, wallets, order clients.
        let serum_market_data = SerumMarketData::start(
            &serum_reference,
            batcher.clone(),
            ws.clone(),
            stats.clone(),
        )
        .await?;
        let ftx_market_data =
            FtxMarketData::start(&ftx_reference, ftx_ws.clone(), book_events, stats.clone())
                .await?;

        let mango_wallet =
            MangoWalletClient::start(&mango_reference, &serum_reference, ws.clone(), stats.clone())
                .await?;
        let ftx_wallet =
            FtxWalletClient::start(&ftx_reference, rest.clone(), stats.clone()).await?;

        let mango_orders: Arc<dyn OrderClient> = Arc::new(
            MangoOrderClient::start(
                &mango_reference,
                &serum_reference,
                &key_store,
                http.clone(),
                ws.clone(),
                slot_tracker.clone(),
                stats.clone(),
            )
            .await?,
        );
        let ftx_orders: Arc<dyn OrderClient> = Arc::new(
            FtxOrderClient::start(
                &ftx_reference,
                ftx_ws.clone(),
                private_events,
                rest.clone(),
                stats.clone(),
            )
            .await?,
        );

        // Strategy loop and its event feeds.
        let (strategy, events) = TakeStrategy::new(
            config.strategy.clone(),
            ftx_reference.reference_data().await?,
            mango_orders,
            ftx_orders,
            stats.clone(),
        );

        {
            let events = events.clone();
            serum_market_data.orderbook_subscribe(Arc::new(move |pair_index, book| {
                let _ = events.send(StrategyEvent::SerumBook {
                    pair_index,
                    book: book.clone(),
                });
            }));
        }
        {
            let events = events.clone();
            ftx_market_data.orderbook_subscribe(Arc::new(move |pair_index, book| {
                let _ = events.send(StrategyEvent::FtxBook {
                    pair_index,
                    book: book.clone(),
                });
            }));
        }
        {
            let events = events.clone();
            mango_wallet.subscribe_wallet(Arc::new(move |wallet| {
                let _ = events.send(StrategyEvent::MangoWallet(wallet.clone()));
            }));
        }
        {
            let events = events.clone();
            ftx_wallet.subscribe_wallet(Arc::new(move |wallet| {
                let _ = events.send(StrategyEvent::FtxWallet(wallet.clone()));
            }));
        }

        info!("Engine assembled, entering strategy loop");
        tokio::select! {
            _ = strategy.run() => {
                warn!("Strategy loop ended");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }

        Ok(())
    }
}
