//! Venue order-client interface.

use async_trait::async_trait;

use crate::error::Result;
use crate::trading::Order;

/// Submits orders to one venue and tracks them to a terminal state.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Submit the order and resolve once it is CLOSED (or failed).
    async fn send_order(&self, order: Order) -> Result<Order>;

    fn venue(&self) -> &'static str;
}
