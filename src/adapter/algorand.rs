//! Algorand: core application calls found through the indexer, round times from algod.

use base64::{Engine, engine::general_purpose::STANDARD};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    error::AdapterError,
    robust_provider::RobustHttpClient,
    types::{BlockKey, VaaKey, VaasByBlock},
};

const INDEXER_PAGE_LIMIT: u64 = 1000;
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(rename = "last-round")]
    last_round: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    block: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    rnd: u64,
    /// Unix seconds.
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct TransactionsPage {
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(rename = "next-token")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Transaction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    confirmed_round: Option<u64>,
    #[serde(default)]
    round_time: Option<i64>,
    sender: String,
    #[serde(default)]
    application_transaction: Option<ApplicationTransaction>,
    /// Base64 encoded.
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    inner_txns: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ApplicationTransaction {
    application_id: u64,
}

/// Emitter and sequence of one core application call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    emitter: String,
    sequence: u64,
}

#[derive(Debug)]
pub struct AlgorandAdapter {
    chain: Chain,
    algod: RobustHttpClient,
    indexer: RobustHttpClient,
    app_id: u64,
    max_concurrent_fetches: usize,
}

impl AlgorandAdapter {
    #[must_use]
    pub fn new(chain: Chain, algod: RobustHttpClient, indexer: RobustHttpClient, app_id: u64) -> Self {
        Self { chain, algod, indexer, app_id, max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES }
    }

    async fn transactions(&self, from: u64, to: u64) -> Result<Vec<Transaction>, AdapterError> {
        let mut transactions = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let mut query = vec![
                ("application-id", self.app_id.to_string()),
                ("min-round", from.to_string()),
                ("max-round", to.to_string()),
                ("limit", INDEXER_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = next.take() {
                query.push(("next", token));
            }
            let page: TransactionsPage = self.indexer.get_json("v2/transactions", &query).await?;
            let done = page.transactions.is_empty() || page.next_token.is_none();
            transactions.extend(page.transactions);
            if done {
                return Ok(transactions);
            }
            next = page.next_token;
        }
    }

    async fn block_key(&self, round: u64) -> Result<BlockKey, AdapterError> {
        let response: BlockResponse =
            self.algod.get_json(&format!("v2/blocks/{round}"), &[("format", "json".to_owned())]).await?;
        BlockKey::from_unix_seconds(response.block.rnd, response.block.ts)
            .ok_or_else(|| AdapterError::transient(format!("round {round} time out of range")))
    }
}

impl ChainAdapter for AlgorandAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let status: NodeStatus = self.algod.get_json("v2/status", &[]).await?;
        Ok(Some(status.last_round))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        let blocks: Vec<BlockKey> = stream::iter(from..=to)
            .map(|round| self.block_key(round))
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await?;
        let mut vaas_by_block: VaasByBlock = blocks.iter().map(|key| (key.clone(), vec![])).collect();

        let transactions = self.transactions(from, to).await?;
        for transaction in &transactions {
            let (Some(id), Some(round)) = (&transaction.id, transaction.confirmed_round) else {
                warn!(sender = %transaction.sender, "Indexer transaction without id or round, skipping");
                continue;
            };
            let block = match blocks.iter().find(|key| key.number == round) {
                Some(block) => block.clone(),
                None => transaction
                    .round_time
                    .and_then(|seconds| BlockKey::from_unix_seconds(round, seconds))
                    .ok_or_else(|| AdapterError::transient(format!("transaction {id} outside {from}..={to}")))?,
            };
            let mut observations = Vec::new();
            scan_transaction(transaction, self.app_id, &mut observations);
            for observation in observations {
                vaas_by_block.push(
                    block.clone(),
                    VaaKey::new(id.clone(), self.chain, observation.emitter, observation.sequence),
                );
            }
        }
        debug!(chain = %self.chain, from = from, to = to, "Fetched Algorand messages");
        Ok(vaas_by_block)
    }
}

/// Collects observations from a transaction and all its inner transactions, depth first.
fn scan_transaction(transaction: &Transaction, app_id: u64, observations: &mut Vec<Observation>) {
    let is_core_call = transaction
        .application_transaction
        .as_ref()
        .is_some_and(|call| call.application_id == app_id);
    if is_core_call {
        match observe(transaction) {
            Some(observation) => observations.push(observation),
            None => warn!(
                sender = %transaction.sender,
                log_count = transaction.logs.len(),
                "Core application call without a single sequence log"
            ),
        }
    }
    for inner in &transaction.inner_txns {
        scan_transaction(inner, app_id, observations);
    }
}

fn observe(transaction: &Transaction) -> Option<Observation> {
    let [log] = transaction.logs.as_slice() else {
        return None;
    };
    let log = STANDARD.decode(log).ok()?;
    let sequence = u64::from_be_bytes(log.get(..8)?.try_into().ok()?);
    let emitter = hex::encode(address_public_key(&transaction.sender)?);
    Some(Observation { emitter, sequence })
}

/// The 32 byte public key of a 58 character address (key followed by a 4 byte checksum).
fn address_public_key(address: &str) -> Option<[u8; 32]> {
    let decoded = decode_base32(address)?;
    if decoded.len() != 36 {
        return None;
    }
    decoded[..32].try_into().ok()
}

/// RFC 4648 base32 without padding.
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let value = match byte {
            b'A'..=b'Z' => byte - b'A',
            b'2'..=b'7' => byte - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | u64::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const APP_ID: u64 = 842_125_965;
    const ZERO_ADDRESS: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ";

    fn sequence_log(sequence: u64) -> String {
        STANDARD.encode(sequence.to_be_bytes())
    }

    #[test]
    fn decodes_addresses() {
        assert_eq!(address_public_key(ZERO_ADDRESS), Some([0u8; 32]));
        assert_eq!(decode_base32("MZXW6YTBOI"), Some(b"foobar".to_vec()));
        assert_eq!(decode_base32("mzxw6"), None);
        assert_eq!(address_public_key("MZXW6YTBOI"), None);
    }

    #[test]
    fn scans_inner_transactions() {
        let transaction: Transaction = serde_json::from_value(json!({
            "id": "ROOTTX",
            "confirmed-round": 22_931_277,
            "round-time": 1_661_000_000,
            "sender": ZERO_ADDRESS,
            "tx-type": "appl",
            "application-transaction": { "application-id": 1 },
            "inner-txns": [
                {
                    "sender": ZERO_ADDRESS,
                    "application-transaction": { "application-id": APP_ID },
                    "logs": [sequence_log(7)]
                },
                {
                    "sender": ZERO_ADDRESS,
                    "application-transaction": { "application-id": APP_ID },
                    "logs": [sequence_log(8), sequence_log(9)]
                },
                {
                    "sender": ZERO_ADDRESS,
                    "tx-type": "pay",
                    "inner-txns": [{
                        "sender": ZERO_ADDRESS,
                        "application-transaction": { "application-id": APP_ID },
                        "logs": [sequence_log(10)]
                    }]
                }
            ]
        }))
        .unwrap();

        let mut observations = Vec::new();
        scan_transaction(&transaction, APP_ID, &mut observations);
        let sequences: Vec<u64> = observations.iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![7, 10]);
        assert_eq!(observations[0].emitter, "0".repeat(64));
    }
}
