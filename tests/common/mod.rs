#![allow(dead_code)]

use alloy::{
    consensus,
    network::Ethereum,
    primitives::{Address, B256, Bytes},
    providers::{RootProvider, mock::Asserter},
    rpc::{
        client::RpcClient,
        types::{Block, Header, Log},
    },
    sol_types::SolEvent,
};
use tracing_subscriber::EnvFilter;
use vaa_watcher::{
    AdapterError, BlockKey, Chain, VaaKey, VaasByBlock,
    adapter::{ChainAdapter, evm::LogMessagePublished},
    robust_provider::{RobustProvider, RobustProviderBuilder},
};

pub const TOKEN_BRIDGE_EMITTER: &str =
    "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585";

pub const GENESIS_TIME: i64 = 1_600_000_000;

/// Installs a subscriber once; `RUST_LOG` picks what is shown.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

pub fn block_key(number: u64) -> BlockKey {
    BlockKey::from_unix_seconds(number, GENESIS_TIME + i64::try_from(number).unwrap()).unwrap()
}

pub fn vaa(chain: Chain, number: u64, sequence: u64) -> VaaKey {
    VaaKey::new(format!("0x{number:064x}"), chain, TOKEN_BRIDGE_EMITTER, sequence)
}

/// Empty rows for `heights`, plus the given `(height, sequence)` messages.
pub fn batch(chain: Chain, heights: impl IntoIterator<Item = u64>, messages: &[(u64, u64)]) -> VaasByBlock {
    let mut vaas: VaasByBlock = heights.into_iter().map(|height| (block_key(height), vec![])).collect();
    for (height, sequence) in messages {
        vaas.push(block_key(*height), vaa(chain, *height, *sequence));
    }
    vaas
}

pub async fn mocked_provider(asserter: &Asserter) -> anyhow::Result<RobustProvider> {
    let provider = RootProvider::<Ethereum>::new(RpcClient::mocked(asserter.clone()));
    Ok(RobustProviderBuilder::fragile(provider).build().await?)
}

pub fn rpc_block(number: u64, timestamp: u64) -> Block {
    Block::empty(Header::new(consensus::Header { number, timestamp, ..Default::default() }))
}

/// A core contract log as returned by `eth_getLogs`.
pub fn core_log(contract: Address, sender: Address, block: u64, tx_hash: B256, sequence: u64) -> Log {
    let event = LogMessagePublished {
        sender,
        sequence,
        nonce: 0,
        payload: Bytes::from_static(b"payload"),
        consistencyLevel: 1,
    };
    Log {
        inner: alloy::primitives::Log { address: contract, data: event.encode_log_data() },
        block_number: Some(block),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

/// Serves a fixed chain history: every height up to `finalized` exists and carries the messages
/// given for it.
#[derive(Debug, Clone)]
pub struct ReplayAdapter {
    pub chain: Chain,
    pub finalized: u64,
    pub messages: Vec<(u64, u64)>,
}

impl ReplayAdapter {
    pub fn new(chain: Chain, finalized: u64, messages: &[(u64, u64)]) -> Self {
        Self { chain, finalized, messages: messages.to_vec() }
    }
}

impl ChainAdapter for ReplayAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        Ok(Some(self.finalized))
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        if to > self.finalized {
            return Err(AdapterError::UnsupportedRange {
                from,
                to,
                reason: "beyond the finalized height".into(),
            });
        }
        let in_range: Vec<(u64, u64)> =
            self.messages.iter().copied().filter(|(height, _)| (from..=to).contains(height)).collect();
        Ok(batch(self.chain, from..=to, &in_range))
    }
}
