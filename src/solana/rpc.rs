//! JSON-RPC over persistent HTTPS.
//!
//! Requests carry monotonically increasing ids and a 30 s deadline. The
//! connection pool is persistent; correlation on this transport is by the
//! HTTP exchange itself, with the response id checked against the request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use crate::core::{Pubkey, Signature};
use crate::error::{Error, Result};
use crate::solana::message::{
    AccountData, BlockhashInfo, Commitment, RawAccount, RpcEnvelope,
};

pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(RPC_REQUEST_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "Sending RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{} request timed out", method))
                } else {
                    Error::Http(e)
                }
            })?;

        let body: serde_json::Value = response.json().await?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string();
            debug!(method, code, message = %message, "RPC error response");
            return Err(Error::Rpc { code, message });
        }

        let response_id = body.get("id").and_then(|v| v.as_u64());
        if response_id != Some(id) {
            return Err(Error::Internal(format!(
                "RPC response id mismatch: sent {}, got {:?}",
                id, response_id
            )));
        }

        let result = body
            .get("result")
            .ok_or_else(|| Error::Deserialize(format!("{} response missing result", method)))?;
        serde_json::from_value(result.clone())
            .map_err(|e| Error::Deserialize(format!("{} result: {}", method, e)))
    }

    pub async fn get_health(&self) -> Result<String> {
        self.call("getHealth", json!([])).await
    }

    pub async fn get_slot(&self) -> Result<u64> {
        self.call("getSlot", json!([])).await
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        self.call("getBlockHeight", json!([])).await
    }

    pub async fn get_latest_blockhash(&self, commitment: Commitment) -> Result<BlockhashInfo> {
        let envelope: RpcEnvelope<BlockhashInfo> = self
            .call("getLatestBlockhash", json!([{ "commitment": commitment }]))
            .await?;
        Ok(envelope.value)
    }

    /// Legacy form kept for nodes that predate `getLatestBlockhash`.
    pub async fn get_recent_blockhash(&self) -> Result<BlockhashInfo> {
        let envelope: RpcEnvelope<serde_json::Value> =
            self.call("getRecentBlockhash", json!([])).await?;
        serde_json::from_value(envelope.value)
            .map_err(|e| Error::Deserialize(format!("getRecentBlockhash result: {}", e)))
    }

    pub async fn get_minimum_balance_for_rent_exemption(&self, space: u64) -> Result<u64> {
        self.call("getMinimumBalanceForRentExemption", json!([space]))
            .await
    }

    pub async fn get_account_info(&self, key: &Pubkey) -> Result<Option<AccountData>> {
        let envelope: RpcEnvelope<Option<RawAccount>> = self
            .call(
                "getAccountInfo",
                json!([key.to_base58(), { "encoding": "base64" }]),
            )
            .await?;
        envelope.value.map(RawAccount::decode).transpose()
    }

    pub async fn get_multiple_accounts(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<Option<AccountData>>> {
        let encoded: Vec<String> = keys.iter().map(Pubkey::to_base58).collect();
        let envelope: RpcEnvelope<Vec<Option<RawAccount>>> = self
            .call(
                "getMultipleAccounts",
                json!([encoded, { "encoding": "base64" }]),
            )
            .await?;
        if envelope.value.len() != keys.len() {
            return Err(Error::Deserialize(format!(
                "getMultipleAccounts returned {} entries for {} keys",
                envelope.value.len(),
                keys.len()
            )));
        }
        envelope
            .value
            .into_iter()
            .map(|raw| raw.map(RawAccount::decode).transpose())
            .collect()
    }

    pub async fn send_transaction(&self, serialized: &[u8]) -> Result<Signature> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(serialized);
        let text: String = self
            .call("sendTransaction", json!([encoded, { "encoding": "base64" }]))
            .await?;
        Signature::from_base58(&text)
    }
}
