use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    chain::Chain,
    error::SinkError,
    sink::{BlockRow, MessageRow, ScanPage, ScanRequest, Sink, tables::{ChainTables, Partitions}},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// A process-local sink. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    partitions: Partitions,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, chain: Chain) -> Arc<RwLock<ChainTables>> {
        self.partitions
            .get(chain)
            .unwrap_or_else(|| self.partitions.get_or_insert(chain, ChainTables::default()))
    }
}

impl Sink for InMemorySink {
    async fn store_vaas_by_block(&self, chain: Chain, vaas: &VaasByBlock) -> Result<(), SinkError> {
        let changed = self.partition(chain).write().await.store(chain, vaas);
        trace!(chain = %chain, blocks = vaas.len(), changed = changed, "Stored batch in memory");
        Ok(())
    }

    async fn get_cursor(&self, chain: Chain) -> Result<Option<BlockKey>, SinkError> {
        self.partition(chain).read().await.cursor()
    }

    async fn set_cursor(&self, chain: Chain, cursor: &BlockKey) -> Result<(), SinkError> {
        self.partition(chain).write().await.set_cursor(cursor);
        Ok(())
    }

    async fn scan_blocks(&self, request: &ScanRequest) -> Result<ScanPage<BlockRow>, SinkError> {
        self.partition(request.chain).read().await.scan_blocks(request)
    }

    async fn scan_messages(&self, request: &ScanRequest) -> Result<ScanPage<MessageRow>, SinkError> {
        self.partition(request.chain).read().await.scan_messages(request)
    }

    async fn mark_signed(&self, chain: Chain, emitter: &str, sequence: u64) -> Result<(), SinkError> {
        self.partition(chain).write().await.mark_signed(chain, emitter, sequence);
        Ok(())
    }

    async fn vaas_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Vec<VaaKey>, SinkError> {
        self.partition(chain).read().await.vaas_by_tx_hash(chain, tx_hash)
    }

    async fn reset_chain(&self, chain: Chain) -> Result<(), SinkError> {
        *self.partition(chain).write().await = ChainTables::default();
        Ok(())
    }
}
