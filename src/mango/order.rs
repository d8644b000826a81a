//! Margin-venue order client.
//!
//! `send_order` lot-scales the order, assembles the place-spot-order
//! account graph, signs over the tracked recent blockhash, submits the
//! transaction, and resolves once the signature is observed at
//! `processed` commitment. Failed sends are surfaced to the caller and as
//! telemetry; there is no retry.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::core::{Hash32, Keypair, KeyStore, Pubkey};
use crate::error::{Error, Result};
use crate::mango::instruction;
use crate::mango::layout::MarginAccount;
use crate::mango::reference::{MangoReferenceClient, MangoReferenceData};
use crate::serum::reference::{SerumReferenceClient, SerumReferenceData};
use crate::solana::message::{
    account_subscribe_params, parse_account_notification, signature_subscribe_params, Commitment,
};
use crate::solana::tx::build_transaction;
use crate::solana::{HttpRpcClient, SlotTracker, WsRpcClient};
use crate::stats::{FieldValue, Measurement, StatsPublisher};
use crate::trading::{next_client_order_id, pow10, Order, OrderClient, OrderState};

pub struct MangoOrderClient {
    reference: Arc<MangoReferenceData>,
    serum: Arc<SerumReferenceData>,
    http: Arc<HttpRpcClient>,
    ws: WsRpcClient,
    slot_tracker: SlotTracker,
    stats: StatsPublisher,
    owner: Arc<Keypair>,
    spl_token_program: Pubkey,
    /// Live margin-account image; the in-basket flags decide which extra
    /// open-orders accounts each order must reference.
    account: Arc<Mutex<MarginAccount>>,
}

impl MangoOrderClient {
    pub async fn start(
        mango_reference: &MangoReferenceClient,
        serum_reference: &SerumReferenceClient,
        key_store: &KeyStore,
        http: Arc<HttpRpcClient>,
        ws: WsRpcClient,
        slot_tracker: SlotTracker,
        stats: StatsPublisher,
    ) -> Result<Self> {
        let reference = mango_reference.reference_data().await?;
        let serum = serum_reference.reference_data().await?;

        // The margin account's owner must be present in the key store.
        let owner_tag = reference.account.owner.to_base58();
        key_store.load_keypair(&owner_tag)?;
        let owner = key_store.keypair(&owner_tag)?;
        let spl_token_program = key_store.pubkey("spl_token_program")?;

        let account = Arc::new(Mutex::new(reference.account.clone()));
        spawn_account_tracking(ws.clone(), reference.account_address, account.clone());

        info!(owner = %reference.account.owner, "Margin order client ready");

        Ok(Self {
            reference,
            serum,
            http,
            ws,
            slot_tracker,
            stats: stats.scoped("mango_order_client"),
            owner,
            spl_token_program,
            account,
        })
    }

    fn lot_scaled(&self, order: &Order) -> (u64, u64, u64) {
        let serum_pair = &self.serum.pairs[order.pair_index];
        let market = &serum_pair.market;
        let base_decimals = self.serum.currencies[serum_pair.base_currency_index].decimals;
        let quote_decimals = self.serum.currencies[serum_pair.quote_currency_index].decimals;

        let price_lots = (order.price * pow10(quote_decimals)
            / Decimal::from(market.quote_lot_size))
        .floor();
        let size_lots =
            (order.quantity * pow10(base_decimals) / Decimal::from(market.base_lot_size)).floor();
        // Max quote includes the taker fee, in native quote units.
        let max_quote = ((Decimal::ONE + crate::serum::taker_fee_rate())
            * price_lots
            * Decimal::from(market.quote_lot_size)
            * size_lots)
            .floor();

        (
            decimal_to_u64(price_lots),
            decimal_to_u64(size_lots),
            decimal_to_u64(max_quote),
        )
    }

    /// Assemble the account vectors and index list for a place-spot-order.
    /// Returns `(writable, readonly, account_indices, program_id_index)`.
    fn order_accounts(
        &self,
        pair_index: usize,
    ) -> (Vec<Pubkey>, Vec<Pubkey>, Vec<u8>, u8) {
        let serum_pair = &self.serum.pairs[pair_index];
        let mango_pair = &self.reference.pairs[pair_index];
        let market = &serum_pair.market;

        let base_currency = &self.reference.currencies
            [serum_pair.base_currency_index];
        let quote_currency = &self.reference.currencies
            [serum_pair.quote_currency_index];

        let dex_signer = Hash32::derive_program_address(
            &self.reference.group.spot_markets[mango_pair.group_pair_index].spot_market,
            &self.serum.program_id,
            market.vault_signer_nonce,
        );

        // Account vector slots 1..=13 (0 is the signing owner).
        let writable = vec![
            self.reference.account_address,
            serum_pair.market_address,
            market.bids,
            market.asks,
            market.request_queue,
            market.event_queue,
            market.base_vault,
            market.quote_vault,
            base_currency.node_bank_address,
            base_currency.node_bank.vault,
            quote_currency.node_bank_address,
            quote_currency.node_bank.vault,
            mango_pair.open_orders_address,
        ];

        // Slots 14..=23.
        let mut readonly = vec![
            self.reference.group_address,
            self.reference.group.cache,
            self.reference.group.dex_program_id,
            base_currency.root_bank_address,
            quote_currency.root_bank_address,
            self.spl_token_program,
            self.reference.group.signer_key,
            dex_signer,
            self.reference.group.msrm_vault,
            self.reference.program_id,
        ];
        let program_id_index = (1 + writable.len() + readonly.len() - 1) as u8;

        // Program account order: group, account, owner, cache, dex program,
        // market accounts, banks, token program, signers, then open orders.
        let mut account_indices = vec![
            14, 1, 0, 15, 16, 2, 3, 4, 5, 6, 7, 8, 17, 9, 10, 18, 11, 12, 19, 20, 21, 22, 13,
        ];

        // Other in-basket open-orders accounts ride along read-only.
        let account = self.account.lock();
        let mut next_index = (1 + writable.len() + readonly.len()) as u8;
        for (group_pair_index, in_basket) in account.in_margin_basket.iter().enumerate() {
            if *in_basket && group_pair_index != mango_pair.group_pair_index {
                readonly.push(account.open_orders[group_pair_index]);
                account_indices.push(next_index);
                next_index += 1;
            }
        }

        (writable, readonly, account_indices, program_id_index)
    }

    fn publish_order_stat(&self, order: &Order) {
        self.stats.publish(Measurement {
            name: "order".into(),
            tags: vec![
                ("source".into(), "mango".into()),
                ("trading_pair_index".into(), order.pair_index.to_string()),
            ],
            fields: vec![
                ("price".into(), FieldValue::Decimal(order.price)),
                ("quantity".into(), FieldValue::Decimal(order.quantity)),
                ("side".into(), FieldValue::Str(order.side.as_str().into())),
                (
                    "client_order_id".into(),
                    FieldValue::U64(order.client_order_id),
                ),
                (
                    "order_state".into(),
                    FieldValue::Str(order.state.as_str().into()),
                ),
                (
                    "average_fill_price".into(),
                    FieldValue::Decimal(order.average_fill_price),
                ),
                (
                    "fill_quantity".into(),
                    FieldValue::Decimal(order.fill_quantity),
                ),
            ],
        });
    }
}

fn decimal_to_u64(value: Decimal) -> u64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_u64().unwrap_or(0)
}

#[async_trait]
impl OrderClient for MangoOrderClient {
    async fn send_order(&self, mut order: Order) -> Result<Order> {
        let (price_lots, size_lots, max_quote) = self.lot_scaled(&order);
        if price_lots == 0 || size_lots == 0 {
            return Err(Error::InvalidArgument(format!(
                "order below lot size: price {} quantity {}",
                order.price, order.quantity
            )));
        }

        order.client_order_id = next_client_order_id();

        let blockhash = self
            .slot_tracker
            .recent_blockhash()
            .ok_or_else(|| Error::PreconditionFailed("no recent blockhash observed".into()))?;

        let (writable, readonly, account_indices, program_id_index) =
            self.order_accounts(order.pair_index);

        let place = instruction::place_spot_order(
            program_id_index,
            account_indices,
            order.side,
            price_lots,
            size_lots,
            max_quote,
            order.client_order_id,
        );

        let transaction = build_transaction(
            &blockhash.hash,
            &[&self.owner],
            &[],
            &writable,
            &readonly,
            &[place],
        )?;

        info!(
            pair_index = order.pair_index,
            side = %order.side,
            price_lots,
            size_lots,
            max_quote,
            client_order_id = order.client_order_id,
            "Sending margin spot order"
        );
        self.publish_order_stat(&order);

        let signature = match self.http.send_transaction(&transaction).await {
            Ok(signature) => signature,
            Err(e) => {
                error!(error = %e, "Margin order send failed");
                self.publish_order_stat(&order);
                return Err(e);
            }
        };

        // Observe the signature before declaring the order terminal.
        let mut subscription = self
            .ws
            .subscribe(
                "signatureSubscribe",
                signature_subscribe_params(&signature, Commitment::Processed),
                "signatureUnsubscribe",
            )
            .await?;
        let confirmation = subscription.next().await;
        if confirmation.is_none() {
            return Err(Error::TransportClosed(
                "signature subscription dropped before confirmation".into(),
            ));
        }

        order.transition(OrderState::Closed);
        info!(signature = %signature, client_order_id = order.client_order_id, "Margin order observed on chain");
        self.publish_order_stat(&order);

        Ok(order)
    }

    fn venue(&self) -> &'static str {
        "mango"
    }
}

impl MangoOrderClient {
    /// Cancel a resting order and settle freed funds in one transaction.
    pub async fn cancel_order(&self, order: &Order) -> Result<()> {
        let serum_pair = &self.serum.pairs[order.pair_index];
        let quote_decimals = self.serum.currencies[serum_pair.quote_currency_index].decimals;
        let price_lots = decimal_to_u64(
            (order.price * pow10(quote_decimals)
                / Decimal::from(serum_pair.market.quote_lot_size))
            .floor(),
        );

        let blockhash = self
            .slot_tracker
            .recent_blockhash()
            .ok_or_else(|| Error::PreconditionFailed("no recent blockhash observed".into()))?;

        let (writable, readonly, _, program_id_index) = self.order_accounts(order.pair_index);

        // Cancel references the market book and queue slots.
        let cancel = instruction::cancel_spot_order(
            program_id_index,
            vec![2, 3, 4, 13, 0, 6],
            order.side,
            order.order_id,
            price_lots,
        );
        // Settle walks the full bank graph.
        let settle = instruction::settle_funds(
            program_id_index,
            vec![14, 15, 0, 1, 16, 2, 13, 20, 7, 8, 17, 9, 18, 11, 10, 12, 21, 19],
        );

        let transaction = build_transaction(
            &blockhash.hash,
            &[&self.owner],
            &[],
            &writable,
            &readonly,
            &[cancel, settle],
        )?;

        let signature = self.http.send_transaction(&transaction).await?;
        info!(signature = %signature, order_id = order.order_id, "Sent cancel and settle");
        Ok(())
    }
}

fn spawn_account_tracking(
    ws: WsRpcClient,
    account_address: Pubkey,
    account: Arc<Mutex<MarginAccount>>,
) {
    tokio::spawn(async move {
        loop {
            let mut subscription = match ws
                .subscribe(
                    "accountSubscribe",
                    account_subscribe_params(&account_address, Commitment::Processed),
                    "accountUnsubscribe",
                )
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(error = %e, "Margin account tracking failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(payload) = subscription.next().await {
                match parse_account_notification(&payload)
                    .and_then(|data| MarginAccount::parse(&data.data))
                {
                    Ok(updated) => *account.lock() = updated,
                    Err(e) => error!(error = %e, "Bad margin account notification"),
                }
            }
            info!("Margin account tracking closed, re-subscribing");
        }
    });
}
