//! Aptos: messages walked by the core event handle's sequence numbers.
//!
//! Heights on this chain are event sequence numbers, not block heights. Each block key still
//! names the real block height and time, and carries the event sequence as its `extra` part so
//! the watcher's cursor tracks sequences.

use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;

use crate::{
    adapter::{ChainAdapter, quoted_u64},
    chain::Chain,
    error::AdapterError,
    robust_provider::RobustHttpClient,
    types::{BlockKey, VaaKey, VaasByBlock},
};

const EVENT_FIELD: &str = "event";
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(deserialize_with = "quoted_u64")]
    version: u64,
    #[serde(deserialize_with = "quoted_u64")]
    sequence_number: u64,
    data: MessageData,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    /// Emitter capability id, in decimal.
    sender: String,
    #[serde(deserialize_with = "quoted_u64")]
    sequence: u64,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(deserialize_with = "quoted_u64")]
    block_height: u64,
    /// Microseconds.
    #[serde(deserialize_with = "quoted_u64")]
    block_timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    hash: String,
}

#[derive(Debug)]
pub struct AptosAdapter {
    chain: Chain,
    client: RobustHttpClient,
    core: String,
    event_handle: String,
    max_concurrent_fetches: usize,
}

impl AptosAdapter {
    #[must_use]
    pub fn new(chain: Chain, client: RobustHttpClient, core: &str) -> Self {
        Self {
            chain,
            client,
            core: core.to_owned(),
            event_handle: format!("{core}::state::WormholeMessageHandle"),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    #[must_use]
    pub fn event_handle(mut self, handle: String) -> Self {
        self.event_handle = handle;
        self
    }

    fn events_path(&self) -> String {
        format!("accounts/{}/events/{}/{EVENT_FIELD}", self.core, self.event_handle)
    }

    async fn block_key(&self, version: u64, sequence: u64) -> Result<(BlockKey, String), AdapterError> {
        let block_path = format!("blocks/by_version/{version}");
        let transaction_path = format!("transactions/by_version/{version}");
        let (block, transaction) = tokio::try_join!(
            self.client.get_json::<Block>(&block_path, &[]),
            self.client.get_json::<Transaction>(&transaction_path, &[]),
        )?;
        let millis = i64::try_from(block.block_timestamp / 1000)
            .map_err(|_| AdapterError::transient(format!("version {version} timestamp out of range")))?;
        let key = BlockKey::from_unix_millis(block.block_height, millis)
            .ok_or_else(|| AdapterError::transient(format!("version {version} timestamp out of range")))?
            .with_extra(sequence);
        Ok((key, transaction.hash))
    }
}

impl ChainAdapter for AptosAdapter {
    /// The newest event sequence number.
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let events: Vec<Event> = self.client.get_json(&self.events_path(), &[("limit", "1".to_owned())]).await?;
        Ok(events.iter().map(|event| event.sequence_number).max())
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        if from > to {
            return Err(AdapterError::unsupported(from, to, "empty sequence range"));
        }
        let limit = to - from + 1;
        let events: Vec<Event> = self
            .client
            .get_json(&self.events_path(), &[("start", from.to_string()), ("limit", limit.to_string())])
            .await?;

        let versions: Vec<(u64, u64)> =
            events.iter().map(|event| (event.version, event.sequence_number)).collect();
        let keys: Vec<(BlockKey, String)> = stream::iter(versions)
            .map(|(version, sequence)| self.block_key(version, sequence))
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await?;

        let mut vaas_by_block = VaasByBlock::default();
        for (event, (block, tx_hash)) in events.iter().zip(keys) {
            let emitter = emitter_hex(&event.data.sender)?;
            vaas_by_block.push(block, VaaKey::new(tx_hash, self.chain, emitter, event.data.sequence));
        }
        debug!(chain = %self.chain, from = from, to = to, event_count = events.len(), "Fetched Aptos events");
        Ok(vaas_by_block)
    }
}

/// Decimal emitter id to 64 hex digits.
fn emitter_hex(sender: &str) -> Result<String, AdapterError> {
    let id = sender
        .parse::<u128>()
        .map_err(|_| AdapterError::transient(format!("emitter {sender} is not a decimal id")))?;
    Ok(format!("{id:064x}"))
}
