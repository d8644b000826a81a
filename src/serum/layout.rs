//! Serum on-chain account layouts.
//!
//! Market, open-orders, slab and queue accounts are packed little-endian,
//! bracketed by a 5-byte `"serum"` prefix and a 7-byte `"padding"` suffix.
//! Slab accounts hold a tagged-node pool forming a binary tree; traversal
//! uses an explicit stack to bound call depth.

use crate::core::Pubkey;
use crate::error::{Error, Result};
use crate::solana::layout::Cursor;
use crate::trading::Side;

const BEGIN_PADDING: &[u8] = b"serum";
const END_PADDING: &[u8] = b"padding";

pub const SLAB_NODE_SIZE: usize = 72;
pub const EVENT_SIZE: usize = 88;
pub const REQUEST_SIZE: usize = 80;
pub const QUEUE_HEADER_SIZE: usize = 32;

/// Account-flag bit indices.
#[derive(Debug, Clone, Copy)]
pub enum AccountFlag {
    Initialized = 0,
    Market = 1,
    OpenOrders = 2,
    RequestQueue = 3,
    EventQueue = 4,
    Bids = 5,
    Asks = 6,
}

pub fn has_flag(flags: u64, flag: AccountFlag) -> bool {
    flags & (1u64 << flag as u64) != 0
}

/// Strip the serum begin/end padding bytes around an account payload.
fn strip_padding(data: &[u8]) -> Result<&[u8]> {
    if data.len() < BEGIN_PADDING.len() + END_PADDING.len() {
        return Err(Error::Deserialize("serum account too small".into()));
    }
    let (prefix, rest) = data.split_at(BEGIN_PADDING.len());
    let (payload, suffix) = rest.split_at(rest.len() - END_PADDING.len());
    if prefix != BEGIN_PADDING || suffix != END_PADDING {
        return Err(Error::IntegrityMismatch(
            "serum account padding bytes are wrong".into(),
        ));
    }
    Ok(payload)
}

#[derive(Debug, Clone)]
pub struct MarketAccount {
    pub account_flags: u64,
    pub own_address: Pubkey,
    pub vault_signer_nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub base_deposits_total: u64,
    pub base_fees_accrued: u64,
    pub quote_vault: Pubkey,
    pub quote_deposits_total: u64,
    pub quote_fees_accrued: u64,
    pub quote_dust_threshold: u64,
    pub request_queue: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub fee_rate_bps: u64,
    pub referrer_rebates_accrued: u64,
}

impl MarketAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let payload = strip_padding(data)?;
        let mut cursor = Cursor::new(payload);

        let account = Self {
            account_flags: cursor.u64()?,
            own_address: cursor.pubkey()?,
            vault_signer_nonce: cursor.u64()?,
            base_mint: cursor.pubkey()?,
            quote_mint: cursor.pubkey()?,
            base_vault: cursor.pubkey()?,
            base_deposits_total: cursor.u64()?,
            base_fees_accrued: cursor.u64()?,
            quote_vault: cursor.pubkey()?,
            quote_deposits_total: cursor.u64()?,
            quote_fees_accrued: cursor.u64()?,
            quote_dust_threshold: cursor.u64()?,
            request_queue: cursor.pubkey()?,
            event_queue: cursor.pubkey()?,
            bids: cursor.pubkey()?,
            asks: cursor.pubkey()?,
            base_lot_size: cursor.u64()?,
            quote_lot_size: cursor.u64()?,
            fee_rate_bps: cursor.u64()?,
            referrer_rebates_accrued: cursor.u64()?,
        };

        if !has_flag(account.account_flags, AccountFlag::Initialized)
            || !has_flag(account.account_flags, AccountFlag::Market)
        {
            return Err(Error::IntegrityMismatch(
                "account flags do not mark an initialized market".into(),
            ));
        }
        Ok(account)
    }
}

/// 128-bit slab key: order sequence number and limit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKey {
    pub sequence_number: u64,
    pub limit_price: u64,
}

/// A resting order from a bids or asks slab.
#[derive(Debug, Clone)]
pub struct SlabOrder {
    pub key: NodeKey,
    pub owner: Pubkey,
    pub quantity: u64,
    pub client_order_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeTag {
    Uninitialized,
    Inner,
    Leaf,
    Free,
    LastFree,
}

impl NodeTag {
    fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => NodeTag::Uninitialized,
            1 => NodeTag::Inner,
            2 => NodeTag::Leaf,
            3 => NodeTag::Free,
            4 => NodeTag::LastFree,
            other => {
                return Err(Error::Deserialize(format!("invalid slab node tag {}", other)))
            }
        })
    }
}

/// A bids or asks slab account: header plus a node pool.
#[derive(Debug)]
pub struct SlabAccount<'a> {
    pub account_flags: u64,
    pub side: Side,
    root: Option<u32>,
    pub leaf_count: u64,
    nodes: &'a [u8],
}

impl<'a> SlabAccount<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let payload = strip_padding(data)?;
        let mut cursor = Cursor::new(payload);

        let account_flags = cursor.u64()?;
        let _bump_index = cursor.u64()?;
        let _free_list_length = cursor.u64()?;
        let _free_list_head = cursor.u32()?;
        let root = cursor.u32()?;
        let leaf_count = cursor.u64()?;
        let nodes = cursor.take(cursor.remaining())?;

        let side = if has_flag(account_flags, AccountFlag::Bids) {
            Side::Bid
        } else if has_flag(account_flags, AccountFlag::Asks) {
            Side::Ask
        } else {
            return Err(Error::IntegrityMismatch(
                "slab account flags carry neither bids nor asks".into(),
            ));
        };

        Ok(Self {
            account_flags,
            side,
            root: (leaf_count > 0).then_some(root),
            leaf_count,
            nodes,
        })
    }

    fn node(&self, index: u32) -> Result<&'a [u8]> {
        let start = index as usize * SLAB_NODE_SIZE;
        let end = start + SLAB_NODE_SIZE;
        self.nodes.get(start..end).ok_or_else(|| {
            Error::Deserialize(format!("slab node index {} out of bounds", index))
        })
    }

    /// Collect all resting orders with an explicit traversal stack.
    pub fn orders(&self) -> Result<Vec<SlabOrder>> {
        let mut orders = Vec::with_capacity(self.leaf_count as usize);
        let Some(root) = self.root else {
            return Ok(orders);
        };

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let mut cursor = Cursor::new(self.node(index)?);
            match NodeTag::from_u32(cursor.u32()?)? {
                NodeTag::Inner => {
                    let _prefix_length = cursor.u32()?;
                    let _key_seq = cursor.u64()?;
                    let _key_price = cursor.u64()?;
                    let child0 = cursor.u32()?;
                    let child1 = cursor.u32()?;
                    stack.push(child1);
                    stack.push(child0);
                }
                NodeTag::Leaf => {
                    let _owner_slot = cursor.u8()?;
                    let _fee_tier = cursor.u8()?;
                    cursor.skip(2)?;
                    let key = NodeKey {
                        sequence_number: cursor.u64()?,
                        limit_price: cursor.u64()?,
                    };
                    let owner = cursor.pubkey()?;
                    let quantity = cursor.u64()?;
                    let client_order_id = cursor.u64()?;
                    orders.push(SlabOrder {
                        key,
                        owner,
                        quantity,
                        client_order_id,
                    });
                }
                NodeTag::Free | NodeTag::LastFree => {}
                NodeTag::Uninitialized => {
                    return Err(Error::IntegrityMismatch(
                        "slab traversal reached an uninitialized node".into(),
                    ));
                }
            }
        }
        Ok(orders)
    }
}

/// A fill/out event from the event queue.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub event_flags: u8,
    pub owner_slot: u8,
    pub fee_tier: u8,
    pub native_quantity_released: u64,
    pub native_quantity_paid: u64,
    pub native_fee_or_rebate: u64,
    pub order_id: NodeKey,
    pub owner: Pubkey,
    pub client_order_id: u64,
}

pub mod event_flag {
    pub const FILL: u8 = 0x01;
    pub const OUT: u8 = 0x02;
    pub const BID: u8 = 0x04;
    pub const MAKER: u8 = 0x08;
}

/// Circular event buffer with a monotonically increasing sequence number.
#[derive(Debug)]
pub struct EventQueueAccount {
    pub head: u64,
    pub count: u64,
    pub sequence_number: u64,
    events: Vec<QueueEvent>,
}

impl EventQueueAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let payload = strip_padding(data)?;
        let mut cursor = Cursor::new(payload);

        let _account_flags = cursor.u64()?;
        let head = cursor.u64()?;
        let count = cursor.u64()?;
        let sequence_number = cursor.u64()?;

        let capacity = cursor.remaining() / EVENT_SIZE;
        let mut events = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let event_flags = cursor.u8()?;
            let owner_slot = cursor.u8()?;
            let fee_tier = cursor.u8()?;
            cursor.skip(5)?;
            events.push(QueueEvent {
                event_flags,
                owner_slot,
                fee_tier,
                native_quantity_released: cursor.u64()?,
                native_quantity_paid: cursor.u64()?,
                native_fee_or_rebate: cursor.u64()?,
                order_id: NodeKey {
                    sequence_number: cursor.u64()?,
                    limit_price: cursor.u64()?,
                },
                owner: cursor.pubkey()?,
                client_order_id: cursor.u64()?,
            });
        }

        Ok(Self {
            head,
            count,
            sequence_number,
            events,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.events.len() as u64
    }

    /// The i-th entry counting from `head`, wrapping at capacity.
    pub fn event_at(&self, offset: u64) -> Option<&QueueEvent> {
        if self.events.is_empty() {
            return None;
        }
        let index = (self.head + offset) % self.capacity();
        self.events.get(index as usize)
    }
}

/// A pending request from the request queue. Shares the 32-byte queue
/// header with the event queue.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub request_flags: u8,
    pub owner_slot: u8,
    pub fee_tier: u8,
    pub self_trade_behavior: u8,
    pub max_base_or_cancel_id: u64,
    pub native_quote_locked: u64,
    pub order_id: NodeKey,
    pub owner: Pubkey,
    pub client_order_id: u64,
}

#[derive(Debug)]
pub struct RequestQueueAccount {
    pub head: u64,
    pub count: u64,
    pub sequence_number: u64,
    pub requests: Vec<QueueRequest>,
}

impl RequestQueueAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let payload = strip_padding(data)?;
        let mut cursor = Cursor::new(payload);

        let _account_flags = cursor.u64()?;
        let head = cursor.u64()?;
        let count = cursor.u64()?;
        let sequence_number = cursor.u64()?;

        let capacity = cursor.remaining() / REQUEST_SIZE;
        let mut requests = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let request_flags = cursor.u8()?;
            let owner_slot = cursor.u8()?;
            let fee_tier = cursor.u8()?;
            let self_trade_behavior = cursor.u8()?;
            cursor.skip(4)?;
            requests.push(QueueRequest {
                request_flags,
                owner_slot,
                fee_tier,
                self_trade_behavior,
                max_base_or_cancel_id: cursor.u64()?,
                native_quote_locked: cursor.u64()?,
                order_id: NodeKey {
                    sequence_number: cursor.u64()?,
                    limit_price: cursor.u64()?,
                },
                owner: cursor.pubkey()?,
                client_order_id: cursor.u64()?,
            });
        }

        Ok(Self {
            head,
            count,
            sequence_number,
            requests,
        })
    }
}

/// Open-orders account: per-market locked/free balances plus order slots.
#[derive(Debug, Clone)]
pub struct OpenOrdersAccount {
    pub account_flags: u64,
    pub market: Pubkey,
    pub owner: Pubkey,
    pub native_base_free: u64,
    pub native_base_total: u64,
    pub native_quote_free: u64,
    pub native_quote_total: u64,
    pub referrer_rebates_accrued: u64,
}

impl OpenOrdersAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let payload = strip_padding(data)?;
        let mut cursor = Cursor::new(payload);

        let account_flags = cursor.u64()?;
        let market = cursor.pubkey()?;
        let owner = cursor.pubkey()?;
        let native_base_free = cursor.u64()?;
        let native_base_total = cursor.u64()?;
        let native_quote_free = cursor.u64()?;
        let native_quote_total = cursor.u64()?;
        // free-slot and is-bid bitsets, 128 order keys, 128 client ids.
        cursor.skip(16 + 16 + 128 * 16 + 128 * 8)?;
        let referrer_rebates_accrued = cursor.u64()?;

        Ok(Self {
            account_flags,
            market,
            owner,
            native_base_free,
            native_base_total,
            native_quote_free,
            native_quote_total,
            referrer_rebates_accrued,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testdata::*;
    use super::*;

    #[test]
    fn slab_traversal_yields_all_leaves() {
        // Tree: inner root -> (leaf, inner -> (leaf, free)).
        let mut payload = slab_header(bids_flags(), 0, 2);
        payload.extend_from_slice(&inner_node(1, 2));
        payload.extend_from_slice(&leaf_node(100, 5, 11));
        payload.extend_from_slice(&inner_node(3, 4));
        payload.extend_from_slice(&leaf_node(99, 3, 12));
        payload.extend_from_slice(&free_node());

        let padded = pad(payload);
        let slab = SlabAccount::parse(&padded).unwrap();
        assert_eq!(slab.side, Side::Bid);
        let orders = slab.orders().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].key.limit_price, 100);
        assert_eq!(orders[1].key.limit_price, 99);
        assert_eq!(orders[1].client_order_id, 12);
    }

    #[test]
    fn empty_slab_has_no_orders() {
        let payload = slab_header(bids_flags(), 0, 0);
        let padded = pad(payload);
        let slab = SlabAccount::parse(&padded).unwrap();
        assert!(slab.orders().unwrap().is_empty());
    }

    #[test]
    fn slab_requires_side_flag() {
        let payload = slab_header(1 << AccountFlag::Initialized as u64, 0, 0);
        assert!(SlabAccount::parse(&pad(payload)).is_err());
    }

    #[test]
    fn padding_is_verified() {
        let mut data = pad(slab_header(bids_flags(), 0, 0));
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(SlabAccount::parse(&data).is_err());
    }

    #[test]
    fn event_queue_wraps_at_capacity() {
        let events = vec![
            event(event_flag::FILL, 10, 20, 1),
            event(event_flag::OUT, 0, 0, 2),
            event(event_flag::FILL, 30, 40, 3),
        ];
        let queue = EventQueueAccount::parse(&event_queue(2, 2, 17, &events)).unwrap();
        assert_eq!(queue.capacity(), 3);
        assert_eq!(queue.sequence_number, 17);
        // head=2, so offsets 0 and 1 are entries 2 and 0.
        assert_eq!(queue.event_at(0).unwrap().client_order_id, 3);
        assert_eq!(queue.event_at(1).unwrap().client_order_id, 1);
    }

    #[test]
    fn request_queue_shares_the_queue_header() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(1u64 << AccountFlag::RequestQueue as u64).to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes()); // head
        payload.extend_from_slice(&1u64.to_le_bytes()); // count
        payload.extend_from_slice(&5u64.to_le_bytes()); // seq
        // One 80-byte request.
        let mut request = vec![0x01u8, 0, 0, 0, 0, 0, 0, 0];
        request.extend_from_slice(&10u64.to_le_bytes()); // max base
        request.extend_from_slice(&20u64.to_le_bytes()); // quote locked
        request.extend_from_slice(&1u64.to_le_bytes()); // order id seq
        request.extend_from_slice(&2u64.to_le_bytes()); // order id price
        request.extend_from_slice(&[6u8; 32]); // owner
        request.extend_from_slice(&9u64.to_le_bytes()); // client id
        assert_eq!(request.len(), REQUEST_SIZE);
        payload.extend_from_slice(&request);

        let queue = RequestQueueAccount::parse(&pad(payload)).unwrap();
        assert_eq!(queue.sequence_number, 5);
        assert_eq!(queue.requests.len(), 1);
        assert_eq!(queue.requests[0].max_base_or_cancel_id, 10);
        assert_eq!(queue.requests[0].client_order_id, 9);
    }

    #[test]
    fn market_account_round_trips_fields() {
        let mut payload = Vec::new();
        let flags = (1u64 << AccountFlag::Initialized as u64) | (1 << AccountFlag::Market as u64);
        payload.extend_from_slice(&flags.to_le_bytes());
        payload.extend_from_slice(&[1u8; 32]); // own address
        payload.extend_from_slice(&3u64.to_le_bytes()); // vault signer nonce
        payload.extend_from_slice(&[2u8; 32]); // base mint
        payload.extend_from_slice(&[3u8; 32]); // quote mint
        payload.extend_from_slice(&[4u8; 32]); // base vault
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&[5u8; 32]); // quote vault
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&[6u8; 32]); // request queue
        payload.extend_from_slice(&[7u8; 32]); // event queue
        payload.extend_from_slice(&[8u8; 32]); // bids
        payload.extend_from_slice(&[9u8; 32]); // asks
        payload.extend_from_slice(&100u64.to_le_bytes()); // base lot
        payload.extend_from_slice(&10u64.to_le_bytes()); // quote lot
        payload.extend_from_slice(&4u64.to_le_bytes()); // fee bps
        payload.extend_from_slice(&0u64.to_le_bytes()); // rebates

        let market = MarketAccount::parse(&pad(payload)).unwrap();
        assert_eq!(market.vault_signer_nonce, 3);
        assert_eq!(market.base_lot_size, 100);
        assert_eq!(market.quote_lot_size, 10);
        assert_eq!(market.bids.as_bytes(), &[8u8; 32]);
    }

    #[test]
    fn open_orders_parses_balances() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(1u64 << AccountFlag::OpenOrders as u64).to_le_bytes());
        payload.extend_from_slice(&[1u8; 32]); // market
        payload.extend_from_slice(&[2u8; 32]); // owner
        payload.extend_from_slice(&10u64.to_le_bytes()); // base free
        payload.extend_from_slice(&30u64.to_le_bytes()); // base total
        payload.extend_from_slice(&100u64.to_le_bytes()); // quote free
        payload.extend_from_slice(&300u64.to_le_bytes()); // quote total
        payload.extend_from_slice(&[0u8; 16 + 16 + 128 * 16 + 128 * 8]);
        payload.extend_from_slice(&7u64.to_le_bytes()); // rebates

        let open_orders = OpenOrdersAccount::parse(&pad(payload)).unwrap();
        assert_eq!(open_orders.native_base_free, 10);
        assert_eq!(open_orders.native_base_total, 30);
        assert_eq!(open_orders.native_quote_total, 300);
        assert_eq!(open_orders.referrer_rebates_accrued, 7);
    }
}
