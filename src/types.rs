use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::mpsc;

use crate::{
    chain::Chain,
    error::{KeyError, WatcherError},
    key_codec,
};

/// One unit of chain progress.
///
/// Ordering is by `(number, timestamp, extra)`, which is also the order of the encoded strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    /// Chain-specific disambiguator, e.g. the event sequence on chains that count progress in
    /// events rather than blocks.
    pub extra: Option<u64>,
}

impl BlockKey {
    /// Builds a key, truncating the timestamp to millisecond precision.
    #[must_use]
    pub fn new(number: u64, timestamp: DateTime<Utc>) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(timestamp.timestamp_millis())
            .single()
            .unwrap_or(timestamp);
        Self { number, timestamp, extra: None }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: u64) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Returns `None` when `seconds` is outside the representable range.
    #[must_use]
    pub fn from_unix_seconds(number: u64, seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(seconds, 0).map(|ts| Self::new(number, ts))
    }

    #[must_use]
    pub fn from_unix_millis(number: u64, millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(|ts| Self::new(number, ts))
    }

    /// The height a watcher resumes after, in the adapter's own progress unit.
    #[must_use]
    pub fn progress_height(&self) -> u64 {
        self.extra.unwrap_or(self.number)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&key_codec::encode_block_key(self.number, &self.timestamp, self.extra))
    }
}

impl FromStr for BlockKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_codec::decode_block_key(s)
    }
}

impl Serialize for BlockKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One protocol message, identified by `(chain, emitter, sequence)`.
///
/// `tx_hash` is carried only for traceability and does not take part in identity checks
/// performed by consumers, though it is part of the canonical string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaaKey {
    pub tx_hash: String,
    pub chain: Chain,
    /// 64 hex characters.
    pub emitter: String,
    pub sequence: u64,
}

impl VaaKey {
    #[must_use]
    pub fn new(tx_hash: impl Into<String>, chain: Chain, emitter: impl Into<String>, sequence: u64) -> Self {
        Self { tx_hash: tx_hash.into(), chain, emitter: emitter.into(), sequence }
    }
}

impl fmt::Display for VaaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&key_codec::encode_vaa_key(&self.tx_hash, self.chain, &self.emitter, self.sequence))
    }
}

impl FromStr for VaaKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_codec::decode_vaa_key(s)
    }
}

/// Messages discovered in a range, grouped by the unit of progress they were found in.
///
/// Every scanned unit has an entry, including units with no messages. Within a unit, messages keep
/// the order in which the adapter discovered them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaasByBlock {
    blocks: BTreeMap<BlockKey, Vec<VaaKey>>,
}

impl VaasByBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `block` was scanned, keeping any messages already recorded for it.
    pub fn insert_block(&mut self, block: BlockKey) -> &mut Vec<VaaKey> {
        self.blocks.entry(block).or_default()
    }

    /// Appends `vaa` to `block`, skipping exact duplicates.
    pub fn push(&mut self, block: BlockKey, vaa: VaaKey) {
        let vaas = self.insert_block(block);
        if !vaas.contains(&vaa) {
            vaas.push(vaa);
        }
    }

    #[must_use]
    pub fn get(&self, block: &BlockKey) -> Option<&[VaaKey]> {
        self.blocks.get(block).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockKey, &[VaaKey])> {
        self.blocks.iter().map(|(block, vaas)| (block, vaas.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &BlockKey> {
        self.blocks.keys()
    }

    #[must_use]
    pub fn last_key(&self) -> Option<&BlockKey> {
        self.blocks.keys().next_back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    /// Blocks that carry at least one message.
    pub fn non_empty(&self) -> impl Iterator<Item = (&BlockKey, &[VaaKey])> {
        self.iter().filter(|(_, vaas)| !vaas.is_empty())
    }
}

impl IntoIterator for VaasByBlock {
    type Item = (BlockKey, Vec<VaaKey>);
    type IntoIter = std::collections::btree_map::IntoIter<BlockKey, Vec<VaaKey>>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

impl FromIterator<(BlockKey, Vec<VaaKey>)> for VaasByBlock {
    fn from_iter<I: IntoIterator<Item = (BlockKey, Vec<VaaKey>)>>(iter: I) -> Self {
        let mut vaas_by_block = VaasByBlock::new();
        for (block, vaas) in iter {
            vaas_by_block.insert_block(block.clone());
            for vaa in vaas {
                vaas_by_block.push(block.clone(), vaa);
            }
        }
        vaas_by_block
    }
}

/// Summary of one batch a watcher or backfill wrote to its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub chain: Chain,
    pub from: u64,
    pub to: u64,
    pub blocks: usize,
    pub messages: usize,
    /// Last key of the batch; the new cursor for live watchers.
    pub last_key: Option<BlockKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Startup finished; `resume_from` is `None` when the watcher starts at the finalized tip.
    Bootstrapped { resume_from: Option<u64> },
    /// The finalized height is more than one batch ahead of the cursor.
    BackfillStarted { behind: u64 },
    /// The backlog is drained and the watcher is back to sleeping between polls.
    CaughtUp,
    /// The adapter rejected a range; the next request covers `from..=to`.
    RangeShrunk { from: u64, to: u64 },
    /// A transient failure; the same range is retried after `delay`.
    Retrying { attempt: usize, delay: Duration },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherMessage {
    Stored(StoredBatch),
    Notification(Notification),
}

impl From<Notification> for WatcherMessage {
    fn from(value: Notification) -> Self {
        WatcherMessage::Notification(value)
    }
}

impl From<StoredBatch> for WatcherMessage {
    fn from(value: StoredBatch) -> Self {
        WatcherMessage::Stored(value)
    }
}

impl PartialEq<Notification> for WatcherMessage {
    fn eq(&self, other: &Notification) -> bool {
        matches!(self, WatcherMessage::Notification(notification) if notification == other)
    }
}

pub type WatcherResult = Result<WatcherMessage, WatcherError>;

pub trait IntoWatcherResult {
    fn into_watcher_result(self) -> WatcherResult;
}

impl IntoWatcherResult for WatcherResult {
    fn into_watcher_result(self) -> WatcherResult {
        self
    }
}

impl IntoWatcherResult for WatcherMessage {
    fn into_watcher_result(self) -> WatcherResult {
        Ok(self)
    }
}

impl IntoWatcherResult for Notification {
    fn into_watcher_result(self) -> WatcherResult {
        Ok(WatcherMessage::Notification(self))
    }
}

impl IntoWatcherResult for StoredBatch {
    fn into_watcher_result(self) -> WatcherResult {
        Ok(WatcherMessage::Stored(self))
    }
}

impl IntoWatcherResult for WatcherError {
    fn into_watcher_result(self) -> WatcherResult {
        Err(self)
    }
}

pub(crate) trait TryStream {
    /// Sends `msg` downstream; `false` means the receiver is gone.
    async fn try_stream<M: IntoWatcherResult>(&self, msg: M) -> bool;
}

impl TryStream for mpsc::Sender<WatcherResult> {
    async fn try_stream<M: IntoWatcherResult>(&self, msg: M) -> bool {
        let item = msg.into_watcher_result();
        match &item {
            Ok(msg) => debug!(item = ?msg, "Sending message"),
            Err(err) => debug!(error = ?err, "Sending error"),
        }
        if let Err(err) = self.send(item).await {
            warn!(error = %err, "Downstream channel closed, stopping watcher");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64) -> BlockKey {
        BlockKey::from_unix_seconds(number, 1_600_000_000 + number as i64).unwrap()
    }

    fn vaa(sequence: u64) -> VaaKey {
        VaaKey::new("0xabc", Chain::Ethereum, "0".repeat(64), sequence)
    }

    #[test]
    fn keeps_empty_blocks_and_discovery_order() {
        let mut batch = VaasByBlock::new();
        batch.insert_block(block(3));
        batch.push(block(1), vaa(9));
        batch.push(block(1), vaa(2));
        batch.push(block(1), vaa(9));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.message_count(), 2);
        assert_eq!(batch.get(&block(1)).unwrap(), &[vaa(9), vaa(2)]);
        assert_eq!(batch.get(&block(3)).unwrap(), &[] as &[VaaKey]);
        assert_eq!(batch.last_key(), Some(&block(3)));
        assert_eq!(batch.non_empty().count(), 1);
    }

    #[test]
    fn new_truncates_to_milliseconds() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let key = BlockKey::new(7, ts);
        assert_eq!(key.timestamp.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(key.to_string().parse::<BlockKey>().unwrap(), key);
    }

    #[test]
    fn progress_height_prefers_extra() {
        assert_eq!(block(10).progress_height(), 10);
        assert_eq!(block(10).with_extra(3).progress_height(), 3);
    }

    #[test]
    fn block_key_serializes_as_string() {
        let key = block(5);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        assert_eq!(serde_json::from_str::<BlockKey>(&json).unwrap(), key);
    }
}
