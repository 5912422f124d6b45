//! The missing-VAA cache artifact read by alarm and dashboard jobs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    chain::Chain,
    error::SinkError,
    sink::{MessageRow, ScanRequest, Sink},
};

/// One observed message whose signed VAA has not been seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedMessage {
    /// The message row key.
    pub id: String,
    pub chain: Chain,
    pub block: u64,
    pub emitter: String,
    #[serde(serialize_with = "as_string", deserialize_with = "crate::adapter::quoted_u64")]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub has_signed_vaa: bool,
}

fn as_string<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

impl From<&MessageRow> for ObservedMessage {
    fn from(row: &MessageRow) -> Self {
        Self {
            id: row.row_key.clone(),
            chain: row.key.chain,
            block: row.key.block,
            emitter: row.key.emitter.clone(),
            seq: row.key.sequence,
            timestamp: row.timestamp,
            tx_hash: row.tx_hash.clone(),
            has_signed_vaa: row.has_signed_vaa,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMissingVaas {
    /// Newest first, in row key order.
    pub messages: Vec<ObservedMessage>,
    /// Where the next refresh stops scanning. Empty before the first refresh.
    pub last_row_key: String,
    /// Unix milliseconds of the last refresh.
    pub last_updated: i64,
}

/// Outstanding messages per chain, serialized as `{ "<chainId>": { "lastRowKey", "messages", .. } }`.
///
/// The chain key space is fixed at construction: [`MissingVaaCache::from_json`] drops chains
/// outside it and adds empty entries for the ones a document lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissingVaaCache {
    chains: BTreeMap<Chain, ChainMissingVaas>,
}

impl MissingVaaCache {
    #[must_use]
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self { chains: chains.into_iter().map(|chain| (chain, ChainMissingVaas::default())).collect() }
    }

    /// Loads a previously saved document into the key space of `chains`.
    ///
    /// # Errors
    ///
    /// [`SinkError::Serialization`] if `json` is not a cache document.
    pub fn from_json(json: &str, chains: impl IntoIterator<Item = Chain>) -> Result<Self, SinkError> {
        let mut saved: MissingVaaCache = serde_json::from_str(json)?;
        let mut cache = Self::new(chains);
        for (chain, entry) in &mut cache.chains {
            if let Some(previous) = saved.chains.remove(chain) {
                *entry = previous;
            }
        }
        Ok(cache)
    }

    /// # Errors
    ///
    /// [`SinkError::Serialization`] if the cache cannot be encoded.
    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn get(&self, chain: Chain) -> Option<&ChainMissingVaas> {
        self.chains.get(&chain)
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.chains.keys().copied()
    }

    /// Rescans every chain from its newest message row down to the previous `lastRowKey`.
    ///
    /// Rows below that key were all signed at the last refresh, so they are not read again. The new
    /// `lastRowKey` is the oldest still-unsigned row or, when everything is signed, the newest row.
    ///
    /// # Errors
    ///
    /// The first sink error; chains refreshed before it keep their new state.
    pub async fn refresh<S: Sink>(&mut self, sink: &S) -> Result<(), SinkError> {
        let now = Utc::now().timestamp_millis();
        for (chain, entry) in &mut self.chains {
            let rows = scan_newer(sink, *chain, &entry.last_row_key).await?;
            apply(entry, &rows, now);
            debug!(
                chain = %chain,
                scanned = rows.len(),
                missing = entry.messages.len(),
                last_row_key = %entry.last_row_key,
                "Refreshed missing VAAs"
            );
        }
        Ok(())
    }
}

async fn scan_newer<S: Sink>(sink: &S, chain: Chain, last_row_key: &str) -> Result<Vec<MessageRow>, SinkError> {
    let mut request = ScanRequest::new(chain);
    if !last_row_key.is_empty() {
        // Scan ends are exclusive; the row at `last_row_key` itself is still outstanding.
        request.end = Some(format!("{last_row_key}\0"));
    }
    let mut rows = Vec::new();
    loop {
        let page = sink.scan_messages(&request).await?;
        rows.extend(page.rows);
        match page.continuation {
            Some(token) => request = request.after(Some(token)),
            None => return Ok(rows),
        }
    }
}

fn apply(entry: &mut ChainMissingVaas, rows: &[MessageRow], now: i64) {
    let missing: Vec<ObservedMessage> =
        rows.iter().filter(|row| !row.has_signed_vaa).map(ObservedMessage::from).collect();
    if let Some(oldest) = missing.last() {
        entry.last_row_key = oldest.id.clone();
    } else if let Some(newest) = rows.first() {
        entry.last_row_key = newest.row_key.clone();
    }
    entry.messages = missing;
    entry.last_updated = now;
}
