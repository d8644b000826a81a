//! CEX wire messages (WebSocket and REST).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trading::Side;

/// Outbound channel subscribe/unsubscribe.
#[derive(Debug, Serialize)]
pub struct ChannelRequest {
    pub op: &'static str,
    pub channel: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
}

/// Outbound login. `sign` is the hex HMAC tag over
/// `"<ms_epoch>websocket_login"`.
#[derive(Debug, Serialize)]
pub struct LoginMessage {
    pub op: &'static str,
    pub args: LoginArgs,
}

#[derive(Debug, Serialize)]
pub struct LoginArgs {
    pub key: String,
    pub sign: String,
    pub time: i64,
}

/// Inbound frame envelope.
#[derive(Debug, Deserialize)]
pub struct WsFrame {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

/// Orderbook channel payload, carried by both snapshots and deltas.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookData {
    /// Exchange timestamp, seconds with fractional part.
    pub time: f64,
    pub checksum: u32,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Private `orders` channel payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    pub id: u64,
    #[serde(default, deserialize_with = "deserialize_client_id")]
    pub client_id: Option<u64>,
    pub market: String,
    pub side: Side,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_size: Decimal,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Open,
    Closed,
}

/// Private `fills` channel payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillMessage {
    pub order_id: u64,
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// REST `POST /api/orders` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub market: String,
    pub side: &'static str,
    pub price: Decimal,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub size: Decimal,
    pub reduce_only: bool,
    pub ioc: bool,
    pub post_only: bool,
    pub client_id: String,
}

/// REST `GET /api/markets` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub name: String,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub price_increment: Decimal,
    pub size_increment: Decimal,
    #[serde(default)]
    pub enabled: bool,
}

/// REST `GET /api/wallet/balances` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub coin: String,
    pub free: Decimal,
    pub total: Decimal,
}

/// Client ids come back as a stringified integer (or null).
fn deserialize_client_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(number)) => number.as_u64(),
        Some(serde_json::Value::String(text)) => text.parse().ok(),
        Some(_) => None,
    })
}
