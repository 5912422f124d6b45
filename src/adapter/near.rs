//! NEAR: core contract transactions found by walking blocks and their chunks.
//!
//! Heights with no produced block are skipped by the chain; they get no entry unless they are the
//! end of the range, whose key borrows the time of the nearest earlier produced block.

use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;
use serde_json::json;

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    error::AdapterError,
    key_codec::normalize_emitter,
    robust_provider::{HttpError, RobustHttpClient},
    types::{BlockKey, VaaKey, VaasByBlock},
};

const EVENT_PREFIX: &str = "EVENT_JSON:";
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
/// How far below a skipped end height to look for a block time.
const END_TIME_LOOKBACK: u64 = 16;

#[derive(Debug, Deserialize)]
struct NearBlock {
    header: NearHeader,
    #[serde(default)]
    chunks: Vec<ChunkHeader>,
}

#[derive(Debug, Deserialize)]
struct NearHeader {
    height: u64,
    /// Nanoseconds.
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkHeader {
    chunk_hash: String,
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    transactions: Vec<ChunkTransaction>,
}

#[derive(Debug, Deserialize)]
struct ChunkTransaction {
    hash: String,
    signer_id: String,
    receiver_id: String,
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    #[serde(default)]
    receipts_outcome: Vec<ReceiptOutcome>,
}

#[derive(Debug, Deserialize)]
struct ReceiptOutcome {
    outcome: Outcome,
}

#[derive(Debug, Deserialize)]
struct Outcome {
    #[serde(default)]
    logs: Vec<String>,
    executor_id: String,
}

#[derive(Debug, Deserialize)]
struct EventLog {
    standard: String,
    event: String,
    #[serde(default)]
    emitter: Option<String>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Debug)]
pub struct NearAdapter {
    chain: Chain,
    client: RobustHttpClient,
    contract: String,
    max_concurrent_fetches: usize,
}

impl NearAdapter {
    #[must_use]
    pub fn new(chain: Chain, client: RobustHttpClient, contract: &str) -> Self {
        Self {
            chain,
            client,
            contract: contract.to_owned(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    /// `None` for heights where no block was produced.
    async fn block(&self, height: u64) -> Result<Option<NearBlock>, AdapterError> {
        match self.client.json_rpc::<_, NearBlock>("block", json!({ "block_id": height })).await {
            Ok(block) => Ok(Some(block)),
            Err(HttpError::Rpc { message, .. }) if is_missing_block(&message) => {
                trace!(height = height, "No NEAR block at height");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn messages_in_block(&self, block: &NearBlock) -> Result<Vec<(String, String, u64)>, AdapterError> {
        let mut messages = Vec::new();
        for header in &block.chunks {
            let chunk: Chunk = self.client.json_rpc("chunk", json!({ "chunk_id": header.chunk_hash })).await?;
            for tx in chunk.transactions.iter().filter(|tx| tx.receiver_id == self.contract) {
                let status: TxStatus = self
                    .client
                    .json_rpc("EXPERIMENTAL_tx_status", json!([tx.hash, tx.signer_id]))
                    .await?;
                for (emitter, sequence) in publish_events(&status, &self.contract) {
                    messages.push((tx.hash.clone(), emitter, sequence));
                }
            }
        }
        Ok(messages)
    }

    /// Key for `to` timed by the nearest produced block below `below`.
    async fn end_key(&self, below: u64, to: u64) -> Result<BlockKey, AdapterError> {
        for height in (below.saturating_sub(END_TIME_LOOKBACK)..below).rev() {
            if let Some(block) = self.block(height).await? {
                return block_key(to, block.header.timestamp);
            }
        }
        Err(AdapterError::transient(format!("no NEAR block produced below height {below}")))
    }
}

impl ChainAdapter for NearAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let block: NearBlock = self.client.json_rpc("block", json!({ "finality": "final" })).await?;
        Ok(Some(block.header.height))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        let blocks: Vec<Option<NearBlock>> = stream::iter(from..=to)
            .map(|height| self.block(height))
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await?;

        let mut vaas_by_block = VaasByBlock::default();
        for block in blocks.iter().flatten() {
            let key = block_key(block.header.height, block.header.timestamp)?;
            vaas_by_block.insert_block(key.clone());
            for (tx_hash, emitter, sequence) in self.messages_in_block(block).await? {
                vaas_by_block.push(key.clone(), VaaKey::new(tx_hash, self.chain, emitter, sequence));
            }
        }
        if blocks.last().is_none_or(Option::is_none) {
            let end = match blocks.iter().flatten().last() {
                Some(block) => block_key(to, block.header.timestamp)?,
                None => self.end_key(from, to).await?,
            };
            vaas_by_block.insert_block(end);
        }
        debug!(
            chain = %self.chain,
            from = from,
            to = to,
            message_count = vaas_by_block.message_count(),
            "Fetched NEAR messages"
        );
        Ok(vaas_by_block)
    }
}

fn is_missing_block(message: &str) -> bool {
    message.contains("UNKNOWN_BLOCK") || message.contains("DB Not Found")
}

fn block_key(height: u64, timestamp_nanos: u64) -> Result<BlockKey, AdapterError> {
    i64::try_from(timestamp_nanos / 1_000_000)
        .ok()
        .and_then(|millis| BlockKey::from_unix_millis(height, millis))
        .ok_or_else(|| AdapterError::transient(format!("NEAR block {height} time out of range")))
}

/// `wormhole`/`publish` events logged by receipts the core contract executed.
fn publish_events(status: &TxStatus, contract: &str) -> Vec<(String, u64)> {
    status
        .receipts_outcome
        .iter()
        .filter(|receipt| receipt.outcome.executor_id == contract)
        .flat_map(|receipt| &receipt.outcome.logs)
        .filter_map(|log| log.strip_prefix(EVENT_PREFIX))
        .filter_map(|raw| serde_json::from_str::<EventLog>(raw).ok())
        .filter(|event| event.standard == "wormhole" && event.event == "publish")
        .filter_map(|event| {
            let emitter = normalize_emitter(event.emitter.as_deref()?).ok()?;
            Some((emitter, event.seq?))
        })
        .collect()
}
