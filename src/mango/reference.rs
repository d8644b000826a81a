//! Margin-venue reference data.
//!
//! Loads the group, margin account, cache, and per-currency root/node
//! banks, then cross-indexes the group's token table against the serum
//! currency list by mint address. Everything here is immutable after the
//! load; mutable views (positions, open orders) live in the wallet client.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::core::Pubkey;
use crate::error::{Error, Result};
use crate::mango::layout::{
    CacheAccount, GroupAccount, MarginAccount, NodeBankAccount, RootBankAccount,
    QUOTE_TOKEN_INDEX,
};
use crate::serum::reference::{await_load_slot, SerumReferenceClient};
use crate::solana::AccountBatcher;

#[derive(Debug, Clone)]
pub struct MangoCurrency {
    /// Index into the group's token table.
    pub token_index: usize,
    pub root_bank_address: Pubkey,
    pub node_bank_address: Pubkey,
    pub node_bank: NodeBankAccount,
    pub root_bank: RootBankAccount,
}

#[derive(Debug, Clone)]
pub struct MangoPair {
    /// Index into the group's spot-market/oracle tables; equals the base
    /// currency's token index by construction.
    pub group_pair_index: usize,
    pub base_token_index: usize,
    pub quote_token_index: usize,
    pub open_orders_address: Pubkey,
}

#[derive(Debug, Clone)]
pub struct MangoReferenceData {
    pub program_id: Pubkey,
    pub group_address: Pubkey,
    pub account_address: Pubkey,
    pub group: GroupAccount,
    pub account: MarginAccount,
    pub cache: CacheAccount,
    pub pairs: Vec<MangoPair>,
    pub currencies: Vec<MangoCurrency>,
}

#[derive(Clone)]
pub struct MangoReferenceClient {
    slot: watch::Receiver<Option<Arc<MangoReferenceData>>>,
}

impl MangoReferenceClient {
    pub fn spawn(
        config: &Config,
        serum_reference: SerumReferenceClient,
        batcher: Arc<AccountBatcher>,
    ) -> Result<Self> {
        let program_id = Pubkey::from_base58(&config.mango.program_id)
            .map_err(|_| Error::Config("mango.program_id is not valid base58".into()))?;
        let group_address = Pubkey::from_base58(&config.mango.group_address)
            .map_err(|_| Error::Config("mango.group_address is not valid base58".into()))?;
        let account_address = Pubkey::from_base58(&config.mango.account_address)
            .map_err(|_| Error::Config("mango.account_address is not valid base58".into()))?;

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            match load(
                program_id,
                group_address,
                account_address,
                serum_reference,
                batcher,
            )
            .await
            {
                Ok(data) => {
                    info!(
                        pairs = data.pairs.len(),
                        currencies = data.currencies.len(),
                        "Loaded margin reference data"
                    );
                    let _ = tx.send(Some(Arc::new(data)));
                }
                Err(e) => {
                    error!(error = %e, "Margin reference load failed");
                }
            }
        });

        Ok(Self { slot: rx })
    }

    pub async fn reference_data(&self) -> Result<Arc<MangoReferenceData>> {
        await_load_slot(self.slot.clone(), "mango").await
    }
}

async fn load(
    program_id: Pubkey,
    group_address: Pubkey,
    account_address: Pubkey,
    serum_reference: SerumReferenceClient,
    batcher: Arc<AccountBatcher>,
) -> Result<MangoReferenceData> {
    let serum = serum_reference.reference_data().await?;

    // Group and margin account first; the cache address comes from the group.
    let accounts = batcher
        .get_multiple_accounts(&[group_address, account_address])
        .await?;
    let group_data = accounts[0]
        .as_ref()
        .ok_or_else(|| Error::NotFound(format!("margin group {}", group_address)))?;
    let account_data = accounts[1]
        .as_ref()
        .ok_or_else(|| Error::NotFound(format!("margin account {}", account_address)))?;

    let group = GroupAccount::parse(&group_data.data)?;
    let account = MarginAccount::parse(&account_data.data)?;

    if account.group != group_address {
        return Err(Error::IntegrityMismatch(
            "margin account does not belong to the configured group".into(),
        ));
    }

    // Cross-index configured currencies into the group's token table.
    let mut token_indices = Vec::with_capacity(serum.currencies.len());
    for currency in &serum.currencies {
        let token_index = if currency.name == "USD" {
            QUOTE_TOKEN_INDEX
        } else {
            group
                .tokens
                .iter()
                .position(|token| token.mint == currency.mint)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "currency {} is not listed in the margin group",
                        currency.name
                    ))
                })?
        };
        token_indices.push(token_index);
    }

    // Root banks for every configured currency, plus the cache, in one read.
    let mut keys = vec![group.cache];
    for token_index in &token_indices {
        keys.push(group.tokens[*token_index].root_bank);
    }
    let accounts = batcher.get_multiple_accounts(&keys).await?;

    let cache_data = accounts[0]
        .as_ref()
        .ok_or_else(|| Error::NotFound(format!("margin cache {}", group.cache)))?;
    let cache = CacheAccount::parse(&cache_data.data)?;

    let mut root_banks = Vec::with_capacity(token_indices.len());
    for (offset, token_index) in token_indices.iter().enumerate() {
        let data = accounts[offset + 1].as_ref().ok_or_else(|| {
            Error::NotFound(format!(
                "root bank {}",
                group.tokens[*token_index].root_bank
            ))
        })?;
        root_banks.push(RootBankAccount::parse(&data.data)?);
    }

    // First node bank per root bank.
    let node_bank_keys: Vec<Pubkey> = root_banks
        .iter()
        .map(|bank| {
            if bank.num_node_banks == 0 {
                Err(Error::IntegrityMismatch("root bank has no node banks".into()))
            } else {
                Ok(bank.node_banks[0])
            }
        })
        .collect::<Result<_>>()?;
    let node_bank_accounts = batcher.get_multiple_accounts(&node_bank_keys).await?;

    let mut currencies = Vec::with_capacity(token_indices.len());
    for (index, token_index) in token_indices.iter().enumerate() {
        let data = node_bank_accounts[index]
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("node bank {}", node_bank_keys[index])))?;
        currencies.push(MangoCurrency {
            token_index: *token_index,
            root_bank_address: group.tokens[*token_index].root_bank,
            node_bank_address: node_bank_keys[index],
            node_bank: NodeBankAccount::parse(&data.data)?,
            root_bank: root_banks[index].clone(),
        });
    }

    // Pairs: group pair index is the base currency's token index.
    let mut pairs = Vec::with_capacity(serum.pairs.len());
    for serum_pair in &serum.pairs {
        let base_token_index = currencies[serum_pair.base_currency_index].token_index;
        let quote_token_index = currencies[serum_pair.quote_currency_index].token_index;
        let group_pair_index = base_token_index;

        let spot_market = &group.spot_markets[group_pair_index];
        if spot_market.spot_market != serum_pair.market_address {
            return Err(Error::IntegrityMismatch(format!(
                "group spot market {} does not match configured market {}",
                spot_market.spot_market, serum_pair.market_address
            )));
        }

        pairs.push(MangoPair {
            group_pair_index,
            base_token_index,
            quote_token_index,
            open_orders_address: account.open_orders[group_pair_index],
        });
    }

    Ok(MangoReferenceData {
        program_id,
        group_address,
        account_address,
        group,
        account,
        cache,
        pairs,
        currencies,
    })
}
