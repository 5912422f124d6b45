//! Solana: core program transactions found through signature pagination.
//!
//! A range of slots is turned into a pair of exclusive signature bounds: the first signature of
//! the nearest valid block above `to` and the last signature of the nearest valid block below
//! `from`. Either bound is left open when no such block exists, at the finalized tip or at slot 0.
//! `getSignaturesForAddress` is paged between them and the results filtered to the range. Every
//! `PostMessage` instruction in a successful transaction names a message account whose contents
//! carry the emitter and sequence.

use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::STANDARD};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    error::AdapterError,
    robust_provider::{HttpError, RobustHttpClient},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// Page size of `getSignaturesForAddress`.
pub const SIGNATURES_PAGE_LIMIT: usize = 1000;

/// Blocks probed in each direction when a bound slot was skipped.
const BLOCK_SEARCH_RETRIES: u64 = 5;

/// Slot was skipped, or is missing in long-term storage.
const SKIPPED_SLOT_CODES: [i64; 2] = [-32007, -32009];

const POST_MESSAGE: u8 = 0x01;
const POST_MESSAGE_UNRELIABLE_V2: u8 = 0x08;

const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockSignatures {
    block_time: Option<i64>,
    #[serde(default)]
    signatures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmedTransaction {
    slot: u64,
    block_time: Option<i64>,
    transaction: TransactionBody,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    signatures: Vec<String>,
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMessage {
    account_keys: Vec<String>,
    instructions: Vec<CompiledInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompiledInstruction {
    program_id_index: usize,
    accounts: Vec<usize>,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    inner_instructions: Option<Vec<InnerInstructions>>,
    #[serde(default)]
    loaded_addresses: Option<LoadedAddresses>,
}

#[derive(Debug, Deserialize)]
struct InnerInstructions {
    instructions: Vec<CompiledInstruction>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    value: Option<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    /// `[payload, encoding]`
    data: (String, String),
}

/// Emitter and sequence read from a posted message account.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PostedMessage {
    emitter: String,
    sequence: u64,
}

/// Direction of a search for a usable bound block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    /// Toward newer slots, never past the finalized `ceiling`.
    Up { ceiling: u64 },
    /// Toward older slots, down to slot 0.
    Down,
}

impl Walk {
    fn contains(self, slot: u64) -> bool {
        match self {
            Walk::Up { ceiling } => slot <= ceiling,
            Walk::Down => true,
        }
    }

    fn step(self, slot: u64) -> Option<u64> {
        match self {
            Walk::Up { .. } => slot.checked_add(1),
            Walk::Down => slot.checked_sub(1),
        }
    }
}

#[derive(Debug)]
pub struct SolanaAdapter {
    chain: Chain,
    client: RobustHttpClient,
    program_id: String,
    signatures_page_limit: usize,
    max_concurrent_fetches: usize,
}

impl SolanaAdapter {
    /// # Errors
    ///
    /// Fatal when `program_id` is not a base58 public key.
    pub fn new(chain: Chain, client: RobustHttpClient, program_id: &str) -> Result<Self, AdapterError> {
        let decoded = bs58::decode(program_id)
            .into_vec()
            .map_err(|_| AdapterError::fatal(format!("{chain}: program id {program_id} is not base58")))?;
        if decoded.len() != 32 {
            return Err(AdapterError::fatal(format!("{chain}: program id {program_id} is not a public key")));
        }
        Ok(Self {
            chain,
            client,
            program_id: program_id.to_owned(),
            signatures_page_limit: SIGNATURES_PAGE_LIMIT,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        })
    }

    #[must_use]
    pub fn signatures_page_limit(mut self, limit: usize) -> Self {
        self.signatures_page_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    async fn block(&self, slot: u64) -> Result<Option<BlockSignatures>, AdapterError> {
        let params = json!([slot, {
            "commitment": "finalized",
            "transactionDetails": "signatures",
            "rewards": false,
            "maxSupportedTransactionVersion": 0,
        }]);
        match self.client.json_rpc::<_, Option<BlockSignatures>>("getBlock", params).await {
            Ok(block) => Ok(block),
            Err(HttpError::Rpc { code, .. }) if SKIPPED_SLOT_CODES.contains(&code) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The nearest block from `slot` in the direction of `walk` with a time and at least one
    /// transaction, or `None` once the walk leaves its range.
    async fn find_valid_block(&self, slot: u64, walk: Walk) -> Result<Option<BlockSignatures>, AdapterError> {
        let mut next = Some(slot);
        for _ in 0..BLOCK_SEARCH_RETRIES {
            let Some(slot) = next.filter(|slot| walk.contains(*slot)) else {
                return Ok(None);
            };
            if let Some(block) = self.block(slot).await? {
                if block.block_time.is_some() && !block.signatures.is_empty() {
                    return Ok(Some(block));
                }
            }
            trace!(slot = slot, "Skipping empty or missing Solana slot");
            next = walk.step(slot);
        }
        Err(AdapterError::transient(format!("no valid Solana block found near slot {slot}")))
    }

    async fn signatures(
        &self,
        before: Option<String>,
        until: Option<String>,
    ) -> Result<Vec<SignatureInfo>, AdapterError> {
        let mut collected = Vec::new();
        let mut before = before;
        loop {
            let mut config = json!({ "commitment": "finalized", "limit": self.signatures_page_limit });
            if let Some(before) = &before {
                config["before"] = json!(before);
            }
            if let Some(until) = &until {
                config["until"] = json!(until);
            }
            let page: Vec<SignatureInfo> =
                self.client.json_rpc("getSignaturesForAddress", json!([self.program_id, config])).await?;
            let full = page.len() == self.signatures_page_limit;
            if let Some(last) = page.last() {
                before = Some(last.signature.clone());
            }
            collected.extend(page);
            if !full {
                return Ok(collected);
            }
        }
    }

    async fn transaction(&self, signature: &str) -> Result<ConfirmedTransaction, AdapterError> {
        let params = json!([signature, {
            "commitment": "finalized",
            "encoding": "json",
            "maxSupportedTransactionVersion": 0,
        }]);
        self.client
            .json_rpc::<_, Option<ConfirmedTransaction>>("getTransaction", params)
            .await?
            .ok_or_else(|| AdapterError::transient(format!("Solana transaction {signature} not found")))
    }

    async fn posted_message(&self, account: &str) -> Result<PostedMessage, AdapterError> {
        let params = json!([account, { "commitment": "finalized", "encoding": "base64" }]);
        let response: AccountInfoResponse = self.client.json_rpc("getAccountInfo", params).await?;
        let info = response
            .value
            .ok_or_else(|| AdapterError::transient(format!("message account {account} not found")))?;
        let data = STANDARD
            .decode(&info.data.0)
            .map_err(|e| AdapterError::transient(format!("message account {account}: {e}")))?;
        parse_posted_message(&data)
            .ok_or_else(|| AdapterError::transient(format!("message account {account} is not a posted message")))
    }
}

impl ChainAdapter for SolanaAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let slot: u64 = self.client.json_rpc("getSlot", json!([{ "commitment": "finalized" }])).await?;
        Ok(Some(slot))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        if from > to {
            return Err(AdapterError::unsupported(from, to, "empty slot range"));
        }
        let finalized: u64 = self.client.json_rpc("getSlot", json!([{ "commitment": "finalized" }])).await?;
        // Both bounds are exclusive, so each must come from a block strictly outside the range.
        let upper = self.find_valid_block(to.saturating_add(1), Walk::Up { ceiling: finalized }).await?;
        let lower = match from.checked_sub(1) {
            Some(slot) => self.find_valid_block(slot, Walk::Down).await?,
            None => None,
        };
        let end_time = match &upper {
            Some(block) => block.block_time,
            None => self.find_valid_block(to, Walk::Down).await?.and_then(|block| block.block_time),
        };
        let before = upper.and_then(|block| block.signatures.first().cloned());
        let until = lower.and_then(|block| block.signatures.last().cloned());

        let signatures: Vec<SignatureInfo> = self
            .signatures(before, until)
            .await?
            .into_iter()
            .filter(|info| info.err.is_none() && (from..=to).contains(&info.slot))
            .collect();
        debug!(chain = %self.chain, from = from, to = to, count = signatures.len(), "Fetched Solana signatures");

        let signatures: Vec<String> = signatures.into_iter().map(|info| info.signature).collect();
        let transactions: Vec<ConfirmedTransaction> = stream::iter(signatures)
            .map(|signature| async move { self.transaction(&signature).await })
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await?;

        let mut found = Vec::new();
        for transaction in &transactions {
            if transaction.meta.as_ref().is_some_and(|meta| meta.err.is_some()) {
                continue;
            }
            let seconds = transaction.block_time.ok_or_else(|| {
                AdapterError::transient(format!("Solana transaction in slot {} has no block time", transaction.slot))
            })?;
            let block = BlockKey::from_unix_seconds(transaction.slot, seconds)
                .ok_or_else(|| AdapterError::transient("block time out of range"))?;
            let signature = transaction.transaction.signatures.first().cloned().unwrap_or_default();
            for account in post_message_accounts(transaction, &self.program_id) {
                found.push((block.clone(), signature.clone(), account));
            }
        }

        let accounts: Vec<String> = found.iter().map(|(_, _, account)| account.clone()).collect();
        let messages: Vec<PostedMessage> = stream::iter(accounts)
            .map(|account| async move { self.posted_message(&account).await })
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await?;

        let end_time = end_time
            .and_then(|seconds| BlockKey::from_unix_seconds(to, seconds))
            .ok_or_else(|| AdapterError::transient(format!("no block time for Solana slot {to}")))?;
        let mut vaas_by_block = VaasByBlock::default();
        vaas_by_block.insert_block(end_time);
        // Signatures arrive newest first.
        for ((block, signature, _), message) in found.into_iter().zip(messages).rev() {
            let vaa = VaaKey::new(signature, self.chain, message.emitter, message.sequence);
            vaas_by_block.push(block, vaa);
        }
        Ok(vaas_by_block)
    }
}

/// Message accounts of every `PostMessage` instruction, inner instructions first.
fn post_message_accounts(transaction: &ConfirmedTransaction, program_id: &str) -> Vec<String> {
    let message = &transaction.transaction.message;
    let mut account_keys: Vec<&str> = message.account_keys.iter().map(String::as_str).collect();
    let meta = transaction.meta.as_ref();
    if let Some(loaded) = meta.and_then(|meta| meta.loaded_addresses.as_ref()) {
        account_keys.extend(loaded.writable.iter().map(String::as_str));
        account_keys.extend(loaded.readonly.iter().map(String::as_str));
    }
    let Some(program_index) = account_keys.iter().position(|key| *key == program_id) else {
        return vec![];
    };

    let inner = meta
        .and_then(|meta| meta.inner_instructions.as_ref())
        .into_iter()
        .flatten()
        .flat_map(|group| &group.instructions);

    let mut seen = HashSet::new();
    inner
        .chain(&message.instructions)
        .filter(|instruction| instruction.program_id_index == program_index)
        .filter(|instruction| {
            bs58::decode(&instruction.data)
                .into_vec()
                .ok()
                .and_then(|data| data.first().copied())
                .is_some_and(|id| id == POST_MESSAGE || id == POST_MESSAGE_UNRELIABLE_V2)
        })
        .filter_map(|instruction| instruction.accounts.get(1))
        .filter_map(|index| account_keys.get(*index))
        .filter(|account| seen.insert(**account))
        .map(|account| (*account).to_owned())
        .collect()
}

/// Reads a `msg`/`msu` posted message account.
///
/// Layout after the 3 byte prefix: version, consistency, vaa time, signature account, submission
/// time, nonce, then the little-endian sequence at 49, emitter chain at 57 and emitter at 59.
fn parse_posted_message(data: &[u8]) -> Option<PostedMessage> {
    let prefix = data.get(..3)?;
    if prefix != b"msg" && prefix != b"msu" {
        return None;
    }
    let sequence = u64::from_le_bytes(data.get(49..57)?.try_into().ok()?);
    let emitter = hex::encode(data.get(59..91)?);
    Some(PostedMessage { emitter, sequence })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth";

    fn transaction(value: Value) -> ConfirmedTransaction {
        serde_json::from_value(value).unwrap()
    }

    fn post_message_data(id: u8) -> String {
        bs58::encode([id, 0, 0, 0, 0]).into_string()
    }

    #[test]
    fn finds_post_message_accounts_in_outer_and_inner_instructions() {
        let tx = transaction(json!({
            "slot": 94401321,
            "blockTime": 1626803853,
            "transaction": {
                "signatures": ["sig"],
                "message": {
                    "accountKeys": ["payer", "msgOuter", PROGRAM, "other"],
                    "instructions": [
                        { "programIdIndex": 2, "accounts": [0, 1], "data": post_message_data(POST_MESSAGE) },
                        { "programIdIndex": 2, "accounts": [0, 3], "data": post_message_data(0x02) },
                        { "programIdIndex": 3, "accounts": [0, 1], "data": post_message_data(POST_MESSAGE) }
                    ]
                }
            },
            "meta": {
                "err": null,
                "innerInstructions": [
                    { "index": 0, "instructions": [
                        { "programIdIndex": 2, "accounts": [0, 4], "data": post_message_data(POST_MESSAGE_UNRELIABLE_V2) }
                    ]}
                ],
                "loadedAddresses": { "writable": ["msgLoaded"], "readonly": [] }
            }
        }));
        assert_eq!(post_message_accounts(&tx, PROGRAM), vec!["msgLoaded", "msgOuter"]);
    }

    #[test]
    fn ignores_transactions_without_the_program() {
        let tx = transaction(json!({
            "slot": 1,
            "blockTime": null,
            "transaction": {
                "signatures": ["sig"],
                "message": {
                    "accountKeys": ["payer", "msg"],
                    "instructions": [{ "programIdIndex": 0, "accounts": [0, 1], "data": post_message_data(1) }]
                }
            },
            "meta": null
        }));
        assert!(post_message_accounts(&tx, PROGRAM).is_empty());
    }

    #[test]
    fn parses_posted_message_accounts() {
        let mut data = b"msg".to_vec();
        data.resize(49, 0);
        data.extend_from_slice(&12_345u64.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&[0xab; 32]);
        data.extend_from_slice(b"payload");

        assert_eq!(
            parse_posted_message(&data),
            Some(PostedMessage { emitter: "ab".repeat(32), sequence: 12_345 })
        );
        assert_eq!(parse_posted_message(&data[..80]), None);
        data[..3].copy_from_slice(b"xyz");
        assert_eq!(parse_posted_message(&data), None);
    }

    #[test]
    fn bound_walks_stay_outside_the_range() {
        let up = Walk::Up { ceiling: 101 };
        assert_eq!(up.step(100), Some(101));
        assert!(up.contains(101));
        assert!(!up.contains(102));
        assert_eq!(Walk::Up { ceiling: u64::MAX }.step(u64::MAX), None);

        assert_eq!(Walk::Down.step(50), Some(49));
        assert_eq!(Walk::Down.step(0), None);
        assert!(Walk::Down.contains(0));
    }

    #[test]
    fn rejects_bad_program_ids() {
        let client = crate::robust_provider::RobustHttpClientBuilder::new("https://solana.example")
            .build()
            .unwrap();
        assert!(SolanaAdapter::new(Chain::Solana, client.clone(), PROGRAM).is_ok());
        assert!(matches!(
            SolanaAdapter::new(Chain::Solana, client, "0xnotbase58"),
            Err(AdapterError::FatalConfiguration(_))
        ));
    }
}
