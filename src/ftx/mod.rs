//! CEX venue: signed REST and authenticated WebSocket clients, checksum-
//! gated book engine, polled wallet and the IOC order client.

pub mod checksum;
pub mod market_data;
pub mod message;
pub mod order;
pub mod reference;
pub mod rest;
pub mod wallet;
pub mod ws;

pub use market_data::FtxMarketData;
pub use order::FtxOrderClient;
pub use reference::{taker_fee_rate, FtxReferenceClient, FtxReferenceData};
pub use rest::FtxRestClient;
pub use wallet::FtxWalletClient;
pub use ws::{Credentials, FtxWsClient};
