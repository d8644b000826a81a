//! Chunked multi-account reads.
//!
//! The node caps `getMultipleAccounts` at a per-request key count, so large
//! reads are split into chunks, fired concurrently, and reassembled into
//! the caller's key order. Any failed chunk fails the aggregate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::debug;

use crate::core::Pubkey;
use crate::error::Result;
use crate::solana::message::AccountData;
use crate::solana::rpc::HttpRpcClient;

pub const DEFAULT_MAX_MULTIPLE_ACCOUNTS: usize = 100;

pub struct AccountBatcher {
    rpc: Arc<HttpRpcClient>,
    max_batch_size: usize,
    next_batch_id: AtomicU64,
}

impl AccountBatcher {
    pub fn new(rpc: Arc<HttpRpcClient>) -> Self {
        Self::with_batch_size(rpc, DEFAULT_MAX_MULTIPLE_ACCOUNTS)
    }

    pub fn with_batch_size(rpc: Arc<HttpRpcClient>, max_batch_size: usize) -> Self {
        assert!(max_batch_size > 0, "batch size must be positive");
        Self {
            rpc,
            max_batch_size,
            next_batch_id: AtomicU64::new(1),
        }
    }

    pub async fn get_multiple_accounts(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<Option<AccountData>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let chunks: Vec<&[Pubkey]> = keys.chunks(self.max_batch_size).collect();
        debug!(
            batch_id,
            keys = keys.len(),
            requests = chunks.len(),
            "Batching multiple-account read"
        );

        let responses = try_join_all(
            chunks
                .into_iter()
                .map(|chunk| self.rpc.get_multiple_accounts(chunk)),
        )
        .await?;

        let mut out = Vec::with_capacity(keys.len());
        for chunk_response in responses {
            out.extend(chunk_response);
        }
        debug_assert_eq!(out.len(), keys.len());
        Ok(out)
    }
}
