//! Signed CEX REST client.
//!
//! Every request carries `X-KEY`, `X-TS` (ms since epoch) and
//! `X-SIGN = hex(HMAC_SHA256(ts || METHOD || path [|| body]))`. Responses
//! use the venue's `{success, result}` envelope.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::core::sign_hmac_sha256;
use crate::error::{Error, Result};
use crate::ftx::message::{Balance, MarketInfo, OrderMessage, OrderRequest};

const REST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct FtxRestClient {
    http: reqwest::Client,
    host: String,
    api_key: String,
    api_secret: String,
}

impl FtxRestClient {
    pub fn new(host: String, api_key: String, api_secret: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            host,
            api_key,
            api_secret,
        })
    }

    fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: Option<&str>) -> String {
        let mut message = format!("{}{}{}", timestamp_ms, method, path);
        if let Some(body) = body {
            message.push_str(body);
        }
        hex::encode(sign_hmac_sha256(
            message.as_bytes(),
            self.api_secret.as_bytes(),
        ))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<T> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method.as_str(), path, body.as_deref());
        let url = format!("https://{}{}", self.host, path);

        trace!(method = %method, path, "Sending CEX REST request");
        let mut request = self
            .http
            .request(method, &url)
            .header("X-KEY", &self.api_key)
            .header("X-TS", timestamp_ms.to_string())
            .header("X-SIGN", signature);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("CEX REST {} timed out", path))
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::Deserialize(format!("CEX REST {} response ({}): {}", path, status, e))
        })?;

        if !envelope.success {
            let message = envelope.error.unwrap_or_else(|| "unknown".into());
            debug!(path, message = %message, "CEX REST request rejected");
            return Err(Error::Rpc {
                code: status.as_u16() as i64,
                message,
            });
        }
        envelope
            .result
            .ok_or_else(|| Error::Deserialize(format!("CEX REST {} missing result", path)))
    }

    pub async fn get_markets(&self) -> Result<Vec<MarketInfo>> {
        self.send(reqwest::Method::GET, "/api/markets", None).await
    }

    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.send(reqwest::Method::GET, "/api/wallet/balances", None)
            .await
    }

    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderMessage> {
        let body = serde_json::to_string(request)?;
        self.send(reqwest::Method::POST, "/api/orders", Some(body))
            .await
    }
}
