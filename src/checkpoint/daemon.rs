//! Monerod JSON-RPC client used by the checkpoint producer.
//!
//! Headers are cached by id in memory so chain walks only hit the RPC for
//! blocks not seen before; requests are rate limited to stay friendly to
//! restricted public nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::BlockHash;
use crate::error::{HighwayError, Result};

/// Sanity bound on backwards chain walks, in blocks from tip.
pub const MAX_INCLUSION_DEPTH: u64 = 720;

/// Requests per second against the RPC endpoint.
const RATE_LIMIT_PER_SECOND: u32 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub id: BlockHash,
    pub previous_id: BlockHash,
}

#[derive(Deserialize)]
struct RpcBlockHeader {
    height: u64,
    hash: BlockHash,
    prev_hash: BlockHash,
}

impl From<RpcBlockHeader> for BlockHeader {
    fn from(h: RpcBlockHeader) -> Self {
        BlockHeader {
            height: h.height,
            id: h.hash,
            previous_id: h.prev_hash,
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct LastBlockHeaderResult {
    block_header: RpcBlockHeader,
}

#[derive(Deserialize)]
struct BlockHeaderByHashResult {
    block_header: RpcBlockHeader,
}

pub struct Daemon {
    client: reqwest::Client,
    rpc_url: String,
    blocks: RwLock<HashMap<BlockHash, Arc<BlockHeader>>>,
    rate_limit: Mutex<Interval>,
}

impl Daemon {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HighwayError::Rpc(e.to_string()))?;

        let mut rate_limit = interval(Duration::from_secs(1) / RATE_LIMIT_PER_SECOND);
        rate_limit.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Daemon {
            client,
            rpc_url: format!("{}/json_rpc", rpc_url.trim_end_matches('/')),
            blocks: RwLock::new(HashMap::new()),
            rate_limit: Mutex::new(rate_limit),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.rate_limit.lock().await.tick().await;

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(HighwayError::Rpc(format!(
                "{}: {} ({})",
                method, error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| HighwayError::Rpc(format!("{}: empty result", method)))
    }

    fn cached(&self, id: &BlockHash) -> Option<Arc<BlockHeader>> {
        self.blocks.read().get(id).cloned()
    }

    fn cache(&self, header: BlockHeader) -> Arc<BlockHeader> {
        let header = Arc::new(header);
        self.blocks.write().insert(header.id, header.clone());
        header
    }

    pub async fn header_tip(&self) -> Result<Arc<BlockHeader>> {
        let result: LastBlockHeaderResult =
            self.call("get_last_block_header", serde_json::json!({})).await?;

        let header = BlockHeader::from(result.block_header);
        if header.id.is_zero() {
            return Err(HighwayError::Rpc(
                "expected block header to have valid hash".into(),
            ));
        }
        Ok(self.cache(header))
    }

    pub async fn header_by_id(&self, id: BlockHash) -> Result<Arc<BlockHeader>> {
        if let Some(header) = self.cached(&id) {
            return Ok(header);
        }
        self.fetch_header_by_id(id).await
    }

    /// Fetch a header from the RPC, bypassing the cache. Used both for cache
    /// misses and as a freshness check before publishing a checkpoint.
    pub async fn fetch_header_by_id(&self, id: BlockHash) -> Result<Arc<BlockHeader>> {
        let result: BlockHeaderByHashResult = self
            .call(
                "get_block_header_by_hash",
                serde_json::json!({ "hash": id.to_string() }),
            )
            .await?;

        let header = BlockHeader::from(result.block_header);
        if header.id != id {
            return Err(HighwayError::Rpc(format!(
                "expected block header to have hash {}, got {}",
                id, header.id
            )));
        }
        Ok(self.cache(header))
    }

    /// Walk the chain backwards from `tip` via previous ids, up to `limit`
    /// parents. `each` returns false to stop early.
    pub async fn walk(
        &self,
        tip: &Arc<BlockHeader>,
        limit: u64,
        mut each: impl FnMut(&BlockHeader) -> bool,
    ) -> Result<()> {
        let mut cursor = tip.clone();
        let mut remaining = limit;

        while cursor.height > 0 && remaining > 0 {
            let parent = self.header_by_id(cursor.previous_id).await.map_err(|e| {
                HighwayError::Rpc(format!(
                    "while obtaining block {} @ {}: {}",
                    cursor.previous_id,
                    cursor.height - 1,
                    e
                ))
            })?;

            if parent.height != cursor.height - 1 {
                return Err(HighwayError::Rpc("parent height mismatch".into()));
            }

            if !each(&parent) {
                break;
            }
            remaining -= 1;
            cursor = parent;
        }

        Ok(())
    }

    /// Check whether `root` is part of the chain `tip` is on.
    ///
    /// `Ok(None)` means included; `Ok(Some(reason))` carries why it is not.
    pub async fn header_included(
        &self,
        tip: &Arc<BlockHeader>,
        root: &Arc<BlockHeader>,
    ) -> Result<Option<String>> {
        if root.height > tip.height {
            return Ok(Some("root height is greater than tip height".into()));
        }
        if root.height == tip.height {
            if root.id == tip.id {
                return Ok(None);
            }
            return Ok(Some(
                "root height is equal to tip height but ids are different".into(),
            ));
        }

        let inclusion_depth = (tip.height - root.height).min(MAX_INCLUSION_DEPTH);

        let mut found = false;
        self.walk(tip, inclusion_depth, |header| {
            if header.height == root.height && header.id == root.id {
                found = true;
                return false;
            }
            true
        })
        .await?;

        if found {
            Ok(None)
        } else {
            Ok(Some(
                "inclusion depth exceeds limits or reached genesis block".into(),
            ))
        }
    }

    /// Header exactly `depth` parents below `tip`.
    pub async fn header_at_depth(
        &self,
        tip: &Arc<BlockHeader>,
        depth: u64,
    ) -> Result<Arc<BlockHeader>> {
        if depth == 0 {
            return Ok(tip.clone());
        }

        let target = tip.height.saturating_sub(depth);
        let mut deep_header = None;
        self.walk(tip, depth, |header| {
            if header.height == target {
                deep_header = Some(Arc::new(header.clone()));
                return false;
            }
            true
        })
        .await?;

        deep_header.ok_or_else(|| HighwayError::Rpc("no header found at requested depth".into()))
    }

    /// Seed the header cache, e.g. with headers learned from notifications.
    pub fn insert_header(&self, header: BlockHeader) {
        self.cache(header);
    }
}
