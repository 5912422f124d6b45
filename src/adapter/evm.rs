//! Account-model EVM chains: core-contract logs plus one block key per height.

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::BlockResponse,
    primitives::Address,
    rpc::types::{Filter, Log},
    sol,
    sol_types::SolEvent,
};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::{
    adapter::{
        ChainAdapter,
        rollup::{ArbitrumFinality, PolygonRootChain},
    },
    chain::Chain,
    error::AdapterError,
    robust_provider::RobustProvider,
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// Default number of block headers fetched concurrently per range.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 24;

sol! {
    /// Emitted by the core contract for every published message.
    event LogMessagePublished(
        address indexed sender,
        uint64 sequence,
        uint32 nonce,
        bytes payload,
        uint8 consistencyLevel
    );
}

/// Block tag an EVM node is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalityTag {
    Finalized,
    Safe,
    Latest,
}

impl From<FinalityTag> for BlockNumberOrTag {
    fn from(tag: FinalityTag) -> Self {
        match tag {
            FinalityTag::Finalized => BlockNumberOrTag::Finalized,
            FinalityTag::Safe => BlockNumberOrTag::Safe,
            FinalityTag::Latest => BlockNumberOrTag::Latest,
        }
    }
}

/// How an EVM chain decides which height is final.
#[derive(Debug)]
pub enum EvmFinality {
    Tag(FinalityTag),
    /// The latest block minus a fixed depth.
    Confirmations(u64),
    PolygonRootChain(PolygonRootChain),
    ArbitrumL1(ArbitrumFinality),
}

#[derive(Debug)]
pub struct EvmAdapter {
    chain: Chain,
    provider: RobustProvider,
    contract: Address,
    finality: EvmFinality,
    max_concurrent_fetches: usize,
}

impl EvmAdapter {
    #[must_use]
    pub fn new(chain: Chain, provider: RobustProvider, contract: Address, finality: EvmFinality) -> Self {
        Self {
            chain,
            provider,
            contract,
            finality,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    #[must_use]
    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    /// Upper bound on block headers requested at once.
    #[must_use]
    pub fn fetch_concurrency(&self) -> usize {
        self.max_concurrent_fetches
    }

    async fn tag_height(&self, tag: BlockNumberOrTag) -> Result<u64, AdapterError> {
        let block = self.provider.get_block_by_number(tag).await?;
        Ok(block.header().number())
    }

    async fn block_keys(&self, from: u64, to: u64) -> Result<Vec<BlockKey>, AdapterError> {
        stream::iter(from..=to)
            .map(|number| async move {
                let block = self.provider.get_block_by_number(number.into()).await?;
                let header = block.header();
                let seconds = i64::try_from(header.timestamp())
                    .map_err(|_| AdapterError::transient(format!("block {number} timestamp out of range")))?;
                BlockKey::from_unix_seconds(header.number(), seconds).ok_or_else(|| {
                    AdapterError::transient(format!("block {number} timestamp out of range"))
                })
            })
            .buffered(self.max_concurrent_fetches)
            .try_collect()
            .await
    }

    fn vaa_key(&self, log: &Log) -> Result<(u64, VaaKey), AdapterError> {
        let (Some(block), Some(tx_hash)) = (log.block_number, log.transaction_hash) else {
            return Err(AdapterError::transient("log is missing its block number or transaction hash"));
        };
        let decoded = log
            .log_decode::<LogMessagePublished>()
            .map_err(|e| AdapterError::transient(format!("undecodable core log in block {block}: {e}")))?;
        let event = decoded.inner.data;
        let emitter = hex::encode(event.sender.into_word());
        Ok((block, VaaKey::new(tx_hash.to_string(), self.chain, emitter, event.sequence)))
    }
}

impl ChainAdapter for EvmAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let height = match &self.finality {
            EvmFinality::Tag(tag) => self.tag_height((*tag).into()).await?,
            EvmFinality::Confirmations(depth) => {
                self.provider.get_block_number().await?.saturating_sub(*depth)
            }
            EvmFinality::PolygonRootChain(root_chain) => return root_chain.finalized_height().await,
            EvmFinality::ArbitrumL1(arbitrum) => return arbitrum.finalized_height(&self.provider).await,
        };
        Ok(Some(height))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(LogMessagePublished::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);
        let logs =
            self.provider.get_logs(&filter).await.map_err(|e| e.into_adapter_error(from, to))?;

        let blocks = self.block_keys(from, to).await?;
        let mut vaas_by_block: VaasByBlock = blocks.iter().map(|key| (key.clone(), vec![])).collect();

        for log in &logs {
            let (number, vaa) = self.vaa_key(log)?;
            let block = blocks
                .iter()
                .find(|key| key.number == number)
                .ok_or_else(|| AdapterError::transient(format!("log from block {number} outside {from}..={to}")))?;
            vaas_by_block.push(block.clone(), vaa);
        }

        debug!(
            chain = %self.chain,
            from = from,
            to = to,
            log_count = logs.len(),
            "Fetched EVM messages"
        );
        Ok(vaas_by_block)
    }
}
