//! Slot subscription and rolling recent blockhash.
//!
//! Every slot notification is published as telemetry. Once the chain has
//! advanced `BLOCKHASH_REFRESH_SLOTS` past the slot at which the current
//! blockhash was observed, a fresh one is fetched at `finalized`
//! commitment; it replaces the old one only if its
//! `last_valid_block_height` strictly increases. Subscribers get updates
//! through a watch channel, so late subscribers see the current value
//! immediately.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::core::Hash32;
use crate::error::Result;
use crate::solana::message::{Commitment, SlotNotification};
use crate::solana::rpc::HttpRpcClient;
use crate::solana::ws::WsRpcClient;
use crate::stats::{FieldValue, Measurement, StatsPublisher};

pub const BLOCKHASH_REFRESH_SLOTS: u64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct RecentBlockhash {
    pub hash: Hash32,
    pub last_valid_block_height: u64,
    pub observed_slot: u64,
}

#[derive(Clone)]
pub struct SlotTracker {
    rx: watch::Receiver<Option<RecentBlockhash>>,
}

impl SlotTracker {
    /// Spawn the tracker task. The returned handle is cheap to clone.
    pub fn spawn(
        http: Arc<HttpRpcClient>,
        ws: WsRpcClient,
        stats: StatsPublisher,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(run(http, ws, stats, tx));
        Self { rx }
    }

    /// Current blockhash, if one has been observed.
    pub fn recent_blockhash(&self) -> Option<RecentBlockhash> {
        *self.rx.borrow()
    }

    /// Watch stream of blockhash updates; the current value is delivered
    /// first.
    pub fn subscribe(&self) -> watch::Receiver<Option<RecentBlockhash>> {
        self.rx.clone()
    }

    #[cfg(test)]
    pub(crate) fn fixed(value: RecentBlockhash) -> Self {
        let (tx, rx) = watch::channel(Some(value));
        // Keep the sender alive for the test's lifetime.
        std::mem::forget(tx);
        Self { rx }
    }
}

async fn run(
    http: Arc<HttpRpcClient>,
    ws: WsRpcClient,
    stats: StatsPublisher,
    tx: watch::Sender<Option<RecentBlockhash>>,
) {
    loop {
        let mut subscription = match ws
            .subscribe("slotSubscribe", serde_json::json!([]), "slotUnsubscribe")
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Slot subscription failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        while let Some(payload) = subscription.next().await {
            let notification: SlotNotification = match serde_json::from_value(payload) {
                Ok(notification) => notification,
                Err(e) => {
                    error!(error = %e, "Bad slot notification");
                    continue;
                }
            };

            stats.publish(Measurement {
                name: "slot".into(),
                tags: vec![("source".into(), "solana".into())],
                fields: vec![
                    ("slot".into(), FieldValue::U64(notification.slot)),
                    ("root".into(), FieldValue::U64(notification.root)),
                    ("parent".into(), FieldValue::U64(notification.parent)),
                ],
            });

            if let Err(e) = maybe_refresh(&http, &stats, &tx, notification.slot).await {
                error!(error = %e, "Blockhash refresh failed");
            }
        }

        info!("Slot subscription closed, re-subscribing");
    }
}

async fn maybe_refresh(
    http: &HttpRpcClient,
    stats: &StatsPublisher,
    tx: &watch::Sender<Option<RecentBlockhash>>,
    slot: u64,
) -> Result<()> {
    let current = *tx.borrow();
    if let Some(current) = current {
        if slot < current.observed_slot + BLOCKHASH_REFRESH_SLOTS {
            return Ok(());
        }
    }

    let info = http.get_latest_blockhash(Commitment::Finalized).await?;

    // Freshness is monotonic: a hash that is not valid for longer than the
    // one we already hold is ignored.
    if let Some(current) = current {
        if info.last_valid_block_height <= current.last_valid_block_height {
            debug!(
                last_valid_block_height = info.last_valid_block_height,
                held = current.last_valid_block_height,
                "Skipping stale blockhash"
            );
            return Ok(());
        }
    }

    let update = RecentBlockhash {
        hash: info.blockhash,
        last_valid_block_height: info.last_valid_block_height,
        observed_slot: slot,
    };
    info!(
        blockhash = %update.hash,
        last_valid_block_height = update.last_valid_block_height,
        slot,
        "Updated recent blockhash"
    );
    let _ = tx.send(Some(update));

    stats.publish(Measurement {
        name: "recent_blockhash".into(),
        tags: vec![("source".into(), "solana".into())],
        fields: vec![
            (
                "blockhash".into(),
                FieldValue::Str(update.hash.to_base58()),
            ),
            (
                "last_valid_block_height".into(),
                FieldValue::U64(update.last_valid_block_height),
            ),
        ],
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_subscriber_sees_current_value() {
        let value = RecentBlockhash {
            hash: Hash32::ZERO,
            last_valid_block_height: 10,
            observed_slot: 5,
        };
        let tracker = SlotTracker::fixed(value);
        let rx = tracker.subscribe();
        assert_eq!(rx.borrow().unwrap().last_valid_block_height, 10);
        assert_eq!(tracker.recent_blockhash().unwrap().observed_slot, 5);
    }
}
