//! Margin venue: account layouts, reference data, health-aware wallet and
//! the on-chain order client.

pub mod instruction;
pub mod layout;
pub mod order;
pub mod reference;
pub mod wallet;

pub use order::MangoOrderClient;
pub use reference::{MangoReferenceClient, MangoReferenceData};
pub use wallet::MangoWalletClient;
