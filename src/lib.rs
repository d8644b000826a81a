//! basisbot - cross-venue take-and-hedge engine.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/      # Hashes, ed25519 keys, on-disk key store
//! ├── trading/   # Books, orders, wallets, venue-neutral types
//! ├── solana/    # JSON-RPC transports, batching, slot tracking, tx builder
//! ├── serum/     # DEX layouts, reference data, L2 book engine
//! ├── mango/     # Margin layouts, health-aware wallet, order client
//! ├── ftx/       # CEX REST/WS clients, checksum-gated books, orders
//! ├── stats/     # Line-protocol telemetry
//! └── strategy/  # Take-and-hedge state machine
//! ```
//!
//! Control flow, leaves first: transports feed the RPC layers, which feed
//! reference data and market data, which feed the wallets and order
//! clients, which feed the strategy. Telemetry is a side channel consumed
//! by every layer.

pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod ftx;
pub mod mango;
pub mod serum;
pub mod solana;
pub mod stats;
pub mod strategy;
pub mod trading;
