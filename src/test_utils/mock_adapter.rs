//! A scripted [`ChainAdapter`] for driving watchers without a node.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    error::AdapterError,
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// Base unix time of block 0; block `n` is `n` seconds later.
pub const MOCK_GENESIS_TIME: i64 = 1_600_000_000;

#[derive(Debug, Default)]
struct Script {
    finalized: Option<u64>,
    finalized_queue: VecDeque<Result<Option<u64>, AdapterError>>,
    range_queue: VecDeque<AdapterError>,
    max_range: Option<u64>,
    messages: BTreeMap<u64, Vec<VaaKey>>,
    skipped: Vec<u64>,
    calls: Vec<(u64, u64)>,
}

/// Answers from a script shared with the test through clones.
///
/// Heights up to the finalized height exist; each gets a key timed [`MOCK_GENESIS_TIME`] plus its
/// number in seconds. Queued results are served first, then the steady state applies.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    chain: Chain,
    script: Arc<Mutex<Script>>,
}

impl MockAdapter {
    #[must_use]
    pub fn new(chain: Chain) -> Self {
        Self { chain, script: Arc::default() }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn with_finalized(self, height: u64) -> Self {
        self.set_finalized(Some(height));
        self
    }

    #[must_use]
    pub fn with_message(self, height: u64, emitter: &str, sequence: u64) -> Self {
        self.add_message(height, emitter, sequence);
        self
    }

    /// Ranges wider than `max` fail with [`AdapterError::UnsupportedRange`].
    #[must_use]
    pub fn with_max_range(self, max: u64) -> Self {
        self.script().max_range = Some(max);
        self
    }

    /// Heights that produce no block key.
    #[must_use]
    pub fn with_skipped(self, heights: &[u64]) -> Self {
        self.script().skipped.extend_from_slice(heights);
        self
    }

    pub fn set_finalized(&self, height: Option<u64>) {
        self.script().finalized = height;
    }

    pub fn add_message(&self, height: u64, emitter: &str, sequence: u64) {
        let vaa = VaaKey::new(format!("0x{height:064x}"), self.chain, emitter, sequence);
        self.script().messages.entry(height).or_default().push(vaa);
    }

    /// Served by the next `get_finalized_height` calls before the steady state.
    pub fn push_finalized(&self, result: Result<Option<u64>, AdapterError>) {
        self.script().finalized_queue.push_back(result);
    }

    /// Failure served by the next `get_messages_for_range` call.
    pub fn push_range_error(&self, error: AdapterError) {
        self.script().range_queue.push_back(error);
    }

    /// Every `(from, to)` requested so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.script().calls.clone()
    }

    #[must_use]
    pub fn block_key(height: u64) -> BlockKey {
        // Heights past chrono's range share the genesis time.
        let seconds = MOCK_GENESIS_TIME.saturating_add_unsigned(height);
        BlockKey::from_unix_seconds(height, seconds)
            .or_else(|| BlockKey::from_unix_seconds(height, MOCK_GENESIS_TIME))
            .expect("genesis time is representable")
    }
}

impl ChainAdapter for MockAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        let mut script = self.script();
        match script.finalized_queue.pop_front() {
            Some(result) => result,
            None => Ok(script.finalized),
        }
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        let mut script = self.script();
        script.calls.push((from, to));
        if let Some(error) = script.range_queue.pop_front() {
            return Err(error);
        }
        if let Some(max) = script.max_range {
            if to - from + 1 > max {
                return Err(AdapterError::unsupported(from, to, format!("at most {max} heights per call")));
            }
        }
        let mut vaas_by_block = VaasByBlock::new();
        for height in (from..=to).filter(|height| !script.skipped.contains(height)) {
            let block = Self::block_key(height);
            vaas_by_block.insert_block(block.clone());
            for vaa in script.messages.get(&height).into_iter().flatten() {
                vaas_by_block.push(block.clone(), vaa.clone());
            }
        }
        Ok(vaas_by_block)
    }
}
