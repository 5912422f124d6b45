use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{fs, sync::RwLock};

use crate::{
    chain::Chain,
    error::SinkError,
    key_codec::pad_uint16,
    sink::{BlockRow, MessageRow, ScanPage, ScanRequest, Sink, tables::{ChainTables, Partitions}},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// A sink persisted as one JSON document per chain (`<dir>/<chainId>.json`).
///
/// Every mutating call rewrites the chain's document through a temporary file and a rename before
/// returning, so a successful return means the write is on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
    partitions: Partitions,
}

impl JsonFileSink {
    /// Opens (creating if needed) the directory holding the chain documents.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory cannot be created.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Opened JSON file sink");
        Ok(Self { dir, partitions: Partitions::default() })
    }

    fn path_for(&self, chain: Chain) -> PathBuf {
        self.dir.join(format!("{}.json", pad_uint16(chain.into())))
    }

    async fn partition(&self, chain: Chain) -> Result<Arc<RwLock<ChainTables>>, SinkError> {
        if let Some(partition) = self.partitions.get(chain) {
            return Ok(partition);
        }
        let tables = match fs::read(self.path_for(chain)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => ChainTables::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(self.partitions.get_or_insert(chain, tables))
    }

    async fn persist(&self, chain: Chain, tables: &ChainTables) -> Result<(), SinkError> {
        let path = self.path_for(chain);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(tables)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn mutate(
        &self,
        chain: Chain,
        apply: impl FnOnce(&mut ChainTables) -> bool,
    ) -> Result<(), SinkError> {
        let partition = self.partition(chain).await?;
        let mut tables = partition.write().await;
        let before = tables.clone();
        if apply(&mut tables) {
            if let Err(e) = self.persist(chain, &tables).await {
                *tables = before;
                error!(chain = %chain, error = %e, "Failed to persist sink document");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Sink for JsonFileSink {
    async fn store_vaas_by_block(&self, chain: Chain, vaas: &VaasByBlock) -> Result<(), SinkError> {
        self.mutate(chain, |tables| tables.store(chain, vaas)).await
    }

    async fn get_cursor(&self, chain: Chain) -> Result<Option<BlockKey>, SinkError> {
        self.partition(chain).await?.read().await.cursor()
    }

    async fn set_cursor(&self, chain: Chain, cursor: &BlockKey) -> Result<(), SinkError> {
        self.mutate(chain, |tables| tables.set_cursor(cursor)).await
    }

    async fn scan_blocks(&self, request: &ScanRequest) -> Result<ScanPage<BlockRow>, SinkError> {
        self.partition(request.chain).await?.read().await.scan_blocks(request)
    }

    async fn scan_messages(&self, request: &ScanRequest) -> Result<ScanPage<MessageRow>, SinkError> {
        self.partition(request.chain).await?.read().await.scan_messages(request)
    }

    async fn mark_signed(&self, chain: Chain, emitter: &str, sequence: u64) -> Result<(), SinkError> {
        self.mutate(chain, |tables| tables.mark_signed(chain, emitter, sequence)).await
    }

    async fn vaas_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Vec<VaaKey>, SinkError> {
        self.partition(chain).await?.read().await.vaas_by_tx_hash(chain, tx_hash)
    }

    async fn reset_chain(&self, chain: Chain) -> Result<(), SinkError> {
        self.mutate(chain, |tables| {
            *tables = ChainTables::default();
            true
        })
        .await
    }
}
