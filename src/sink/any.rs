use crate::{
    chain::Chain,
    config::SinkConfig,
    error::SinkError,
    sink::{BlockRow, InMemorySink, JsonFileSink, MessageRow, ScanPage, ScanRequest, Sink},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// The sink selected by configuration.
#[derive(Debug, Clone)]
pub enum AnySink {
    Memory(InMemorySink),
    Json(JsonFileSink),
}

impl AnySink {
    /// # Errors
    ///
    /// [`SinkError::Io`] if a file sink's directory cannot be created.
    pub async fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        Ok(match config {
            SinkConfig::Memory => AnySink::Memory(InMemorySink::new()),
            SinkConfig::Json { path } => AnySink::Json(JsonFileSink::open(path).await?),
        })
    }
}

macro_rules! dispatch {
    ($self:ident, $sink:ident => $call:expr) => {
        match $self {
            AnySink::Memory($sink) => $call.await,
            AnySink::Json($sink) => $call.await,
        }
    };
}

impl Sink for AnySink {
    async fn store_vaas_by_block(&self, chain: Chain, vaas: &VaasByBlock) -> Result<(), SinkError> {
        dispatch!(self, sink => sink.store_vaas_by_block(chain, vaas))
    }

    async fn get_cursor(&self, chain: Chain) -> Result<Option<BlockKey>, SinkError> {
        dispatch!(self, sink => sink.get_cursor(chain))
    }

    async fn set_cursor(&self, chain: Chain, cursor: &BlockKey) -> Result<(), SinkError> {
        dispatch!(self, sink => sink.set_cursor(chain, cursor))
    }

    async fn scan_blocks(&self, request: &ScanRequest) -> Result<ScanPage<BlockRow>, SinkError> {
        dispatch!(self, sink => sink.scan_blocks(request))
    }

    async fn scan_messages(&self, request: &ScanRequest) -> Result<ScanPage<MessageRow>, SinkError> {
        dispatch!(self, sink => sink.scan_messages(request))
    }

    async fn mark_signed(&self, chain: Chain, emitter: &str, sequence: u64) -> Result<(), SinkError> {
        dispatch!(self, sink => sink.mark_signed(chain, emitter, sequence))
    }

    async fn vaas_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Vec<VaaKey>, SinkError> {
        dispatch!(self, sink => sink.vaas_by_tx_hash(chain, tx_hash))
    }

    async fn reset_chain(&self, chain: Chain) -> Result<(), SinkError> {
        dispatch!(self, sink => sink.reset_chain(chain))
    }
}
