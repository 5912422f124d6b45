//! Finality for rollups whose local blocks only become final once committed to their L1.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::{BlockResponse, TransactionBuilder},
    primitives::{Address, U256},
    rpc::types::TransactionRequest,
    sol,
    sol_types::SolCall,
};
use serde::Deserialize;

use crate::{error::AdapterError, robust_provider::RobustProvider};

sol! {
    interface IRootChain {
        function getLastChildBlock() external view returns (uint256);
    }
}

/// Polygon PoS: the highest child block checkpointed on the L1 root-chain contract.
#[derive(Debug)]
pub struct PolygonRootChain {
    l1: RobustProvider,
    root_chain: Address,
}

impl PolygonRootChain {
    #[must_use]
    pub fn new(l1: RobustProvider, root_chain: Address) -> Self {
        Self { l1, root_chain }
    }

    /// `None` until the first checkpoint is visible at the L1 finalized block.
    pub async fn finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let request = TransactionRequest::default()
            .with_to(self.root_chain)
            .with_input(IRootChain::getLastChildBlockCall {}.abi_encode());
        let output = self.l1.call(request, BlockNumberOrTag::Finalized).await?;
        let height = decode_uint(&output)?;
        trace!(height = height, "Polygon root chain checkpoint");
        Ok((height > 0).then_some(height))
    }
}

fn decode_uint(output: &[u8]) -> Result<u64, AdapterError> {
    let word = output
        .get(..32)
        .ok_or_else(|| AdapterError::transient(format!("short eth_call output: {} bytes", output.len())))?;
    u64::try_from(U256::from_be_slice(word))
        .map_err(|_| AdapterError::transient("root chain returned a height above u64"))
}

/// The subset of an Arbitrum block that carries its L1 anchor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArbitrumBlock {
    number: alloy::primitives::U64,
    l1_block_number: alloy::primitives::U64,
}

#[derive(Debug, Default)]
struct Observations {
    /// L1 block number -> highest L2 block seen anchored at it.
    pending: BTreeMap<u64, u64>,
    finalized: Option<u64>,
}

impl Observations {
    fn observe(&mut self, l1: u64, l2: u64) {
        let entry = self.pending.entry(l1).or_insert(l2);
        *entry = (*entry).max(l2);
    }

    /// Moves every observation anchored at or below `l1_finalized` into the finalized height.
    fn settle(&mut self, l1_finalized: u64) -> Option<u64> {
        let still_pending = self.pending.split_off(&(l1_finalized.saturating_add(1)));
        let settled = std::mem::replace(&mut self.pending, still_pending);
        if let Some(l2) = settled.into_values().max() {
            self.finalized = Some(self.finalized.map_or(l2, |current| current.max(l2)));
        }
        self.finalized
    }
}

/// Arbitrum: an L2 block is final once the L1 block it was posted in is final.
///
/// Each poll records the L2 tip against its L1 anchor, then reports the highest recorded L2 block
/// whose anchor the L1 now considers final.
#[derive(Debug)]
pub struct ArbitrumFinality {
    l1: RobustProvider,
    observations: Mutex<Observations>,
}

impl ArbitrumFinality {
    #[must_use]
    pub fn new(l1: RobustProvider) -> Self {
        Self { l1, observations: Mutex::new(Observations::default()) }
    }

    /// `None` while no observed L2 block is anchored in a finalized L1 block.
    pub async fn finalized_height(&self, l2: &RobustProvider) -> Result<Option<u64>, AdapterError> {
        let tip: ArbitrumBlock =
            l2.raw_request("eth_getBlockByNumber", (BlockNumberOrTag::Latest, false)).await?;
        let l1_finalized =
            self.l1.get_block_by_number(BlockNumberOrTag::Finalized).await?.header().number();

        let mut observations = self.observations.lock().unwrap_or_else(PoisonError::into_inner);
        observations.observe(tip.l1_block_number.to(), tip.number.to());
        let finalized = observations.settle(l1_finalized);
        trace!(
            l2_tip = tip.number.to::<u64>(),
            l1_anchor = tip.l1_block_number.to::<u64>(),
            l1_finalized = l1_finalized,
            pending = observations.pending.len(),
            "Arbitrum finality observation"
        );
        Ok(finalized)
    }
}
