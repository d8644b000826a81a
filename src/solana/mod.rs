//! On-chain client stack: JSON-RPC transports, account batching, slot and
//! blockhash tracking, binary layouts, and the wire-exact transaction
//! builder.

pub mod batcher;
pub mod layout;
pub mod message;
pub mod rpc;
pub mod slot;
pub mod token;
pub mod tx;
pub mod ws;

pub use batcher::AccountBatcher;
pub use message::{AccountData, BlockhashInfo, Commitment, SlotNotification};
pub use rpc::HttpRpcClient;
pub use slot::{RecentBlockhash, SlotTracker};
pub use ws::{Subscription, WsRpcClient};
