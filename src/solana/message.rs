//! JSON-RPC request/response shapes for the chain node.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{Hash32, Pubkey};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

/// Account payload as returned by `getAccountInfo` / `getMultipleAccounts`
/// with base64 encoding.
#[derive(Debug, Clone)]
pub struct AccountData {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
    pub executable: bool,
    pub rent_epoch: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAccount {
    pub lamports: u64,
    pub owner: String,
    /// `[base64_payload, "base64"]`
    pub data: (String, String),
    pub executable: bool,
    #[serde(rename = "rentEpoch", default)]
    pub rent_epoch: u64,
}

impl RawAccount {
    pub fn decode(self) -> Result<AccountData> {
        use base64::Engine;
        if self.data.1 != "base64" {
            return Err(Error::Deserialize(format!(
                "unexpected account encoding: {}",
                self.data.1
            )));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(&self.data.0)
            .map_err(|e| Error::Deserialize(format!("invalid account data base64: {}", e)))?;
        Ok(AccountData {
            lamports: self.lamports,
            owner: Hash32::from_base58(&self.owner)?,
            data,
            executable: self.executable,
            rent_epoch: self.rent_epoch,
        })
    }
}

/// `{ context: { slot }, value: ... }` envelope on account reads.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcEnvelope<T> {
    #[allow(dead_code)]
    pub context: RpcContext,
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcContext {
    #[allow(dead_code)]
    pub slot: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockhashInfo {
    #[serde(deserialize_with = "deserialize_base58_hash")]
    pub blockhash: Hash32,
    #[serde(rename = "lastValidBlockHeight")]
    pub last_valid_block_height: u64,
}

fn deserialize_base58_hash<'de, D>(deserializer: D) -> std::result::Result<Hash32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    Hash32::from_base58(&text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotNotification {
    pub slot: u64,
    pub parent: u64,
    pub root: u64,
}

/// Parameters for `accountSubscribe`.
pub fn account_subscribe_params(key: &Pubkey, commitment: Commitment) -> serde_json::Value {
    json!([
        key.to_base58(),
        { "commitment": commitment, "encoding": "base64" }
    ])
}

/// Parameters for `signatureSubscribe`.
pub fn signature_subscribe_params(
    signature: &crate::core::Signature,
    commitment: Commitment,
) -> serde_json::Value {
    json!([signature.to_base58(), { "commitment": commitment }])
}

/// Account notification payload under `params.result`.
pub(crate) fn parse_account_notification(value: &serde_json::Value) -> Result<AccountData> {
    let raw: RpcEnvelope<RawAccount> = serde_json::from_value(value.clone())
        .map_err(|e| Error::Deserialize(format!("invalid account notification: {}", e)))?;
    raw.value.decode()
}
