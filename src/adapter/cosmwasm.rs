//! Cosmos SDK chains with a CosmWasm core contract, read through a Tendermint RPC.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    adapter::{ChainAdapter, quoted_u64},
    chain::Chain,
    error::AdapterError,
    key_codec::normalize_emitter,
    robust_provider::{HttpError, RobustHttpClient},
    types::{BlockKey, VaaKey, VaasByBlock},
};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct AbciInfo {
    response: AbciResponse,
}

#[derive(Debug, Deserialize)]
struct AbciResponse {
    #[serde(deserialize_with = "quoted_u64")]
    last_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
    data: BlockData,
}

#[derive(Debug, Deserialize)]
struct Header {
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    /// Base64 encoded transactions.
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    tx_result: TxExecution,
}

#[derive(Debug, Deserialize)]
struct TxExecution {
    #[serde(default)]
    events: Vec<TxEvent>,
}

#[derive(Debug, Deserialize)]
struct TxEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug)]
pub struct CosmwasmAdapter {
    chain: Chain,
    client: RobustHttpClient,
    core: String,
}

impl CosmwasmAdapter {
    #[must_use]
    pub fn new(chain: Chain, client: RobustHttpClient, core: &str) -> Self {
        Self { chain, client, core: core.to_owned() }
    }

    async fn messages_in_tx(&self, hash: &str) -> Result<Vec<(String, u64)>, AdapterError> {
        let result = self
            .client
            .get_json::<Envelope<TxResult>>("tx", &[("hash", format!("0x{hash}"))])
            .await;
        match result {
            Ok(envelope) => Ok(envelope
                .result
                .tx_result
                .events
                .iter()
                .filter_map(|event| core_message(event, &self.core))
                .collect()),
            Err(HttpError::Status { status: 500, body }) if body.contains("error calling MarshalJSON") => {
                warn!(chain = %self.chain, tx_hash = hash, "Node cannot render transaction, skipping");
                Ok(vec![])
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ChainAdapter for CosmwasmAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let info: Envelope<AbciInfo> = self.client.get_json("abci_info", &[]).await?;
        Ok(Some(info.result.response.last_block_height))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        let mut vaas_by_block = VaasByBlock::default();
        for height in from..=to {
            let block: Envelope<BlockResult> =
                self.client.get_json("block", &[("height", height.to_string())]).await?;
            let block = block.result.block;
            let key = BlockKey::new(height, block.header.time);
            vaas_by_block.insert_block(key.clone());

            for tx in block.data.txs.iter().flatten() {
                let hash = tx_hash(tx)?;
                for (emitter, sequence) in self.messages_in_tx(&hash).await? {
                    vaas_by_block.push(key.clone(), VaaKey::new(hash.clone(), self.chain, emitter, sequence));
                }
            }
        }
        debug!(
            chain = %self.chain,
            from = from,
            to = to,
            message_count = vaas_by_block.message_count(),
            "Fetched CosmWasm messages"
        );
        Ok(vaas_by_block)
    }
}

/// Uppercase hex SHA-256 of the raw transaction bytes.
fn tx_hash(encoded: &str) -> Result<String, AdapterError> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| AdapterError::transient(format!("undecodable block transaction: {e}")))?;
    Ok(hex::encode_upper(Sha256::digest(raw)))
}

/// Attribute text; older nodes base64 encode keys and values.
fn attribute_text(raw: &str, encoded: bool) -> Option<String> {
    if !encoded {
        return Some(raw.to_owned());
    }
    STANDARD.decode(raw).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Emitter and sequence of a `wasm` event emitted by `core`.
fn core_message(event: &TxEvent, core: &str) -> Option<(String, u64)> {
    if event.kind != "wasm" {
        return None;
    }
    [false, true].into_iter().find_map(|encoded| {
        let mut emitter = None;
        let mut sequence = None;
        let mut from_core = false;
        for attribute in &event.attributes {
            let key = attribute_text(&attribute.key, encoded)?.to_lowercase();
            let value = attribute.value.as_deref().and_then(|value| attribute_text(value, encoded));
            match key.as_str() {
                "message.sender" => emitter = value,
                "message.sequence" => sequence = value,
                "_contract_address" | "contract_address" => {
                    from_core |= value.as_deref() == Some(core);
                }
                _ => {}
            }
        }
        if !from_core {
            return None;
        }
        let emitter = normalize_emitter(&emitter?).ok()?;
        Some((emitter, sequence?.parse().ok()?))
    })
}
