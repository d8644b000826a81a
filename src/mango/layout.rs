//! Margin-program account layouts.
//!
//! All fields are packed little-endian. 128-bit quantities are 64-bit
//! aligned `{lower, upper}` pairs composing a two's-complement signed
//! value with a fixed 2^48 scale; arithmetic stays in `i128` and converts
//! to decimal only at presentation boundaries.

use rust_decimal::Decimal;

use crate::core::Pubkey;
use crate::error::{Error, Result};
use crate::solana::layout::Cursor;

pub const MAX_TOKENS: usize = 16;
pub const MAX_PAIRS: usize = MAX_TOKENS - 1;
/// The quote currency lives in the last token slot.
pub const QUOTE_TOKEN_INDEX: usize = MAX_TOKENS - 1;
pub const MAX_NODE_BANKS: usize = 8;
pub const MAX_PERP_OPEN_ORDERS: usize = 64;
pub const INFO_LEN: usize = 32;

pub const GROUP_SIZE: usize = 6032;
pub const ACCOUNT_SIZE: usize = 4296;
pub const CACHE_SIZE: usize = 1608;
pub const ROOT_BANK_SIZE: usize = 424;
pub const NODE_BANK_SIZE: usize = 72;

const FIXED_SCALE_BITS: u32 = 48;

/// `value / 2^48` as an exact-to-18-places decimal.
pub fn fixed_to_decimal(value: i128) -> Decimal {
    const DENOMINATOR: i128 = 1i128 << FIXED_SCALE_BITS;
    const FRACTION_SCALE: i128 = 1_000_000_000_000_000_000; // 10^18

    let integer = value.div_euclid(DENOMINATOR);
    let remainder = value.rem_euclid(DENOMINATOR);
    let fraction = remainder * FRACTION_SCALE / DENOMINATOR;

    Decimal::from_i128_with_scale(integer, 0) + Decimal::from_i128_with_scale(fraction, 18)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Group = 0,
    Account = 1,
    RootBank = 2,
    NodeBank = 3,
    Cache = 7,
}

#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub data_type: u8,
    pub version: u8,
    pub is_initialized: bool,
}

impl Metadata {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self> {
        let data_type = cursor.u8()?;
        let version = cursor.u8()?;
        let is_initialized = cursor.bool()?;
        cursor.skip(5)?; // extra info
        Ok(Self {
            data_type,
            version,
            is_initialized,
        })
    }

    fn expect(&self, expected: DataType) -> Result<()> {
        if self.data_type != expected as u8 || !self.is_initialized {
            return Err(Error::IntegrityMismatch(format!(
                "expected initialized account of type {:?}, got type {} (initialized: {})",
                expected, self.data_type, self.is_initialized
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenInfo {
    pub mint: Pubkey,
    pub root_bank: Pubkey,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn is_empty(&self) -> bool {
        self.mint.is_zero()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpotMarketInfo {
    pub spot_market: Pubkey,
    pub maint_asset_weight: i128,
    pub init_asset_weight: i128,
    pub maint_liab_weight: i128,
    pub init_liab_weight: i128,
    pub liquidation_fee: i128,
}

#[derive(Debug, Clone)]
pub struct GroupAccount {
    pub metadata: Metadata,
    pub num_oracles: u64,
    pub tokens: Vec<TokenInfo>,
    pub spot_markets: Vec<SpotMarketInfo>,
    pub oracles: Vec<Pubkey>,
    pub signer_nonce: u64,
    pub signer_key: Pubkey,
    pub admin: Pubkey,
    pub dex_program_id: Pubkey,
    pub cache: Pubkey,
    pub valid_interval: u64,
    pub msrm_vault: Pubkey,
}

impl GroupAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GROUP_SIZE {
            return Err(Error::Deserialize(format!(
                "margin group account is {} bytes, need {}",
                data.len(),
                GROUP_SIZE
            )));
        }
        let mut cursor = Cursor::new(data);

        let metadata = Metadata::parse(&mut cursor)?;
        metadata.expect(DataType::Group)?;

        let num_oracles = cursor.u64()?;

        let mut tokens = Vec::with_capacity(MAX_TOKENS);
        for _ in 0..MAX_TOKENS {
            let mint = cursor.pubkey()?;
            let root_bank = cursor.pubkey()?;
            let decimals = cursor.u8()?;
            cursor.skip(7)?;
            tokens.push(TokenInfo {
                mint,
                root_bank,
                decimals,
            });
        }

        let mut spot_markets = Vec::with_capacity(MAX_PAIRS);
        for _ in 0..MAX_PAIRS {
            spot_markets.push(SpotMarketInfo {
                spot_market: cursor.pubkey()?,
                maint_asset_weight: cursor.i128_pair()?,
                init_asset_weight: cursor.i128_pair()?,
                maint_liab_weight: cursor.i128_pair()?,
                init_liab_weight: cursor.i128_pair()?,
                liquidation_fee: cursor.i128_pair()?,
            });
        }

        // Perp markets are carried by the layout but unused here.
        cursor.skip(MAX_PAIRS * 160)?;

        let mut oracles = Vec::with_capacity(MAX_PAIRS);
        for _ in 0..MAX_PAIRS {
            oracles.push(cursor.pubkey()?);
        }

        let signer_nonce = cursor.u64()?;
        let signer_key = cursor.pubkey()?;
        let admin = cursor.pubkey()?;
        let dex_program_id = cursor.pubkey()?;
        let cache = cursor.pubkey()?;
        let valid_interval = cursor.u64()?;

        let _insurance_vault = cursor.pubkey()?;
        let _serum_vault = cursor.pubkey()?;
        let msrm_vault = cursor.pubkey()?;
        let _fees_vault = cursor.pubkey()?;

        Ok(Self {
            metadata,
            num_oracles,
            tokens,
            spot_markets,
            oracles,
            signer_nonce,
            signer_key,
            admin,
            dex_program_id,
            cache,
            valid_interval,
            msrm_vault,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MarginAccount {
    pub metadata: Metadata,
    pub group: Pubkey,
    pub owner: Pubkey,
    pub in_margin_basket: Vec<bool>,
    pub num_in_margin_basket: u8,
    pub deposits: Vec<i128>,
    pub borrows: Vec<i128>,
    pub open_orders: Vec<Pubkey>,
    pub being_liquidated: bool,
    pub is_bankrupt: bool,
}

impl MarginAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ACCOUNT_SIZE {
            return Err(Error::Deserialize(format!(
                "margin account is {} bytes, need {}",
                data.len(),
                ACCOUNT_SIZE
            )));
        }
        let mut cursor = Cursor::new(data);

        let metadata = Metadata::parse(&mut cursor)?;
        metadata.expect(DataType::Account)?;

        let group = cursor.pubkey()?;
        let owner = cursor.pubkey()?;

        let mut in_margin_basket = Vec::with_capacity(MAX_PAIRS);
        for _ in 0..MAX_PAIRS {
            in_margin_basket.push(cursor.bool()?);
        }
        let num_in_margin_basket = cursor.u8()?;

        let mut deposits = Vec::with_capacity(MAX_TOKENS);
        for _ in 0..MAX_TOKENS {
            deposits.push(cursor.i128_pair()?);
        }
        let mut borrows = Vec::with_capacity(MAX_TOKENS);
        for _ in 0..MAX_TOKENS {
            borrows.push(cursor.i128_pair()?);
        }

        let mut open_orders = Vec::with_capacity(MAX_PAIRS);
        for _ in 0..MAX_PAIRS {
            open_orders.push(cursor.pubkey()?);
        }

        // Perp bookkeeping: accounts, order markets/sides, order keys/ids.
        cursor.skip(MAX_PAIRS * 96)?;
        cursor.skip(MAX_PERP_OPEN_ORDERS * 2)?;
        cursor.skip(MAX_PERP_OPEN_ORDERS * 16)?;
        cursor.skip(MAX_PERP_OPEN_ORDERS * 8)?;

        let _msrm_amount = cursor.u64()?;
        let being_liquidated = cursor.bool()?;
        let is_bankrupt = cursor.bool()?;
        cursor.skip(INFO_LEN)?;

        Ok(Self {
            metadata,
            group,
            owner,
            in_margin_basket,
            num_in_margin_basket,
            deposits,
            borrows,
            open_orders,
            being_liquidated,
            is_bankrupt,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriceCacheEntry {
    /// Quote native units per base native unit, 2^48 fixed point.
    pub price: i128,
    pub last_update: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RootBankCacheEntry {
    pub deposit_index: i128,
    pub borrow_index: i128,
    pub last_update: u64,
}

#[derive(Debug, Clone)]
pub struct CacheAccount {
    pub metadata: Metadata,
    pub price_caches: Vec<PriceCacheEntry>,
    pub root_bank_caches: Vec<RootBankCacheEntry>,
}

impl CacheAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < CACHE_SIZE {
            return Err(Error::Deserialize(format!(
                "margin cache account is {} bytes, need {}",
                data.len(),
                CACHE_SIZE
            )));
        }
        let mut cursor = Cursor::new(data);

        let metadata = Metadata::parse(&mut cursor)?;
        metadata.expect(DataType::Cache)?;

        let mut price_caches = Vec::with_capacity(MAX_PAIRS);
        for _ in 0..MAX_PAIRS {
            price_caches.push(PriceCacheEntry {
                price: cursor.i128_pair()?,
                last_update: cursor.u64()?,
            });
        }

        let mut root_bank_caches = Vec::with_capacity(MAX_TOKENS);
        for _ in 0..MAX_TOKENS {
            root_bank_caches.push(RootBankCacheEntry {
                deposit_index: cursor.i128_pair()?,
                borrow_index: cursor.i128_pair()?,
                last_update: cursor.u64()?,
            });
        }

        Ok(Self {
            metadata,
            price_caches,
            root_bank_caches,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RootBankAccount {
    pub metadata: Metadata,
    pub num_node_banks: u64,
    pub node_banks: Vec<Pubkey>,
    pub deposit_index: i128,
    pub borrow_index: i128,
    pub last_updated: u64,
}

impl RootBankAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ROOT_BANK_SIZE {
            return Err(Error::Deserialize(format!(
                "root bank account is {} bytes, need {}",
                data.len(),
                ROOT_BANK_SIZE
            )));
        }
        let mut cursor = Cursor::new(data);

        let metadata = Metadata::parse(&mut cursor)?;
        metadata.expect(DataType::RootBank)?;

        let _optimal_utilization = cursor.i128_pair()?;
        let _optimal_rate = cursor.i128_pair()?;
        let _maximum_rate = cursor.i128_pair()?;

        let num_node_banks = cursor.u64()?;
        let mut node_banks = Vec::with_capacity(MAX_NODE_BANKS);
        for _ in 0..MAX_NODE_BANKS {
            node_banks.push(cursor.pubkey()?);
        }

        let deposit_index = cursor.i128_pair()?;
        let borrow_index = cursor.i128_pair()?;
        let last_updated = cursor.u64()?;

        Ok(Self {
            metadata,
            num_node_banks,
            node_banks,
            deposit_index,
            borrow_index,
            last_updated,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NodeBankAccount {
    pub metadata: Metadata,
    pub deposits: i128,
    pub borrows: i128,
    pub vault: Pubkey,
}

impl NodeBankAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < NODE_BANK_SIZE {
            return Err(Error::Deserialize(format!(
                "node bank account is {} bytes, need {}",
                data.len(),
                NODE_BANK_SIZE
            )));
        }
        let mut cursor = Cursor::new(data);

        let metadata = Metadata::parse(&mut cursor)?;
        metadata.expect(DataType::NodeBank)?;

        Ok(Self {
            metadata,
            deposits: cursor.i128_pair()?,
            borrows: cursor.i128_pair()?,
            vault: cursor.pubkey()?,
        })
    }
}
