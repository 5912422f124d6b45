use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::{Arc, PoisonError, RwLock as StdRwLock},
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    chain::Chain,
    error::SinkError,
    key_codec::{self, MessageRowKey},
    sink::{BlockRow, MessageRow, ScanPage, ScanRequest},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// Stored columns of a message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageColumns {
    timestamp: String,
    tx_hash: String,
    has_signed_vaa: bool,
}

/// Everything stored for one chain, keyed by row key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChainTables {
    blocks: BTreeMap<String, Vec<String>>,
    messages: BTreeMap<String, MessageColumns>,
    signed: BTreeSet<String>,
    vaas_by_tx_hash: BTreeMap<String, Vec<String>>,
    cursor: Option<String>,
}

fn merge(target: &mut Vec<String>, value: String) -> bool {
    if target.contains(&value) {
        return false;
    }
    target.push(value);
    true
}

impl ChainTables {
    /// Returns whether anything changed.
    pub(crate) fn store(&mut self, chain: Chain, vaas_by_block: &VaasByBlock) -> bool {
        let mut changed = false;
        for (block, vaas) in vaas_by_block.iter() {
            let row = self.blocks.entry(key_codec::block_row_key(chain, block)).or_insert_with(|| {
                changed = true;
                Vec::new()
            });
            for vaa in vaas {
                changed |= merge(row, vaa.to_string());
            }
            for vaa in vaas {
                changed |= self.index_message(chain, block, vaa);
            }
        }
        changed
    }

    fn index_message(&mut self, chain: Chain, block: &BlockKey, vaa: &VaaKey) -> bool {
        let mut changed = merge(
            self.vaas_by_tx_hash
                .entry(key_codec::vaas_by_tx_hash_row_key(&vaa.tx_hash, chain))
                .or_default(),
            vaa.to_string(),
        );

        let row_key = MessageRowKey {
            chain,
            block: block.number,
            emitter: vaa.emitter.clone(),
            sequence: vaa.sequence,
        }
        .encode();
        let signed =
            self.signed.contains(&key_codec::signed_vaa_row_key(chain, &vaa.emitter, vaa.sequence));
        let columns = MessageColumns {
            timestamp: block.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            tx_hash: vaa.tx_hash.clone(),
            has_signed_vaa: signed,
        };
        match self.messages.get_mut(&row_key) {
            Some(existing) if existing.has_signed_vaa || !signed => {}
            Some(existing) => {
                existing.has_signed_vaa = true;
                changed = true;
            }
            None => {
                self.messages.insert(row_key, columns);
                changed = true;
            }
        }
        changed
    }

    pub(crate) fn cursor(&self) -> Result<Option<BlockKey>, SinkError> {
        Ok(self.cursor.as_deref().map(str::parse::<BlockKey>).transpose()?)
    }

    pub(crate) fn set_cursor(&mut self, cursor: &BlockKey) -> bool {
        let encoded = cursor.to_string();
        if self.cursor.as_deref() == Some(encoded.as_str()) {
            return false;
        }
        self.cursor = Some(encoded);
        true
    }

    pub(crate) fn mark_signed(&mut self, chain: Chain, emitter: &str, sequence: u64) -> bool {
        let mut changed = self.signed.insert(key_codec::signed_vaa_row_key(chain, emitter, sequence));
        let suffix = format!("/{emitter}/{}", key_codec::pad_uint64(sequence));
        for (row_key, columns) in &mut self.messages {
            if row_key.ends_with(&suffix) && !columns.has_signed_vaa {
                columns.has_signed_vaa = true;
                changed = true;
            }
        }
        changed
    }

    pub(crate) fn vaas_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Vec<VaaKey>, SinkError> {
        self.vaas_by_tx_hash
            .get(&key_codec::vaas_by_tx_hash_row_key(tx_hash, chain))
            .map(|vaas| vaas.iter().map(|vaa| vaa.parse().map_err(SinkError::from)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub(crate) fn scan_blocks(&self, request: &ScanRequest) -> Result<ScanPage<BlockRow>, SinkError> {
        page(&self.blocks, request, |row_key, vaas| {
            let (chain, block) = key_codec::split_chain_prefix(row_key)?;
            Ok(BlockRow {
                chain,
                block: block.parse()?,
                vaas: vaas.iter().map(|vaa| vaa.parse()).collect::<Result<_, _>>()?,
                row_key: row_key.to_owned(),
            })
        })
    }

    pub(crate) fn scan_messages(
        &self,
        request: &ScanRequest,
    ) -> Result<ScanPage<MessageRow>, SinkError> {
        page(&self.messages, request, |row_key, columns| {
            let timestamp = chrono::DateTime::parse_from_rfc3339(&columns.timestamp)
                .map_err(|_| key_codec_error(&columns.timestamp))?
                .with_timezone(&chrono::Utc);
            Ok(MessageRow {
                key: MessageRowKey::parse(row_key)?,
                row_key: row_key.to_owned(),
                timestamp,
                tx_hash: columns.tx_hash.clone(),
                has_signed_vaa: columns.has_signed_vaa,
            })
        })
    }
}

fn key_codec_error(value: &str) -> SinkError {
    SinkError::MalformedKey(crate::error::KeyError::new(value, "stored timestamp is not ISO-8601"))
}

fn page<V, T>(
    table: &BTreeMap<String, V>,
    request: &ScanRequest,
    decode: impl Fn(&str, &V) -> Result<T, SinkError>,
) -> Result<ScanPage<T>, SinkError> {
    let page_size = request.page_size.max(1);
    let (lower, upper) = request.bounds();
    let empty = match (&lower, &upper) {
        (Bound::Included(start), Bound::Excluded(end)) => start > end,
        (Bound::Excluded(start), Bound::Excluded(end)) => start >= end,
        _ => false,
    };
    if empty {
        return Ok(ScanPage { rows: Vec::new(), continuation: None });
    }
    let mut entries = table.range((lower, upper));
    let mut rows = Vec::with_capacity(page_size.min(table.len()));
    let mut last_key = None;
    for (row_key, value) in entries.by_ref().take(page_size) {
        rows.push(decode(row_key, value)?);
        last_key = Some(row_key.clone());
    }
    let continuation = if entries.next().is_some() { last_key } else { None };
    Ok(ScanPage { rows, continuation })
}

/// Per-chain partitions; each chain's tables sit behind their own lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Partitions {
    inner: Arc<StdRwLock<BTreeMap<Chain, Arc<RwLock<ChainTables>>>>>,
}

impl Partitions {
    pub(crate) fn get(&self, chain: Chain) -> Option<Arc<RwLock<ChainTables>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(&chain).cloned()
    }

    /// Returns the existing partition, or installs `tables` if there is none yet.
    pub(crate) fn get_or_insert(&self, chain: Chain, tables: ChainTables) -> Arc<RwLock<ChainTables>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain)
            .or_insert_with(|| Arc::new(RwLock::new(tables)))
            .clone()
    }
}
