mod common;

use vaa_watcher::{
    Chain,
    key_codec::MessageRowKey,
    sink::{InMemorySink, JsonFileSink, ScanRequest, Sink},
};

use crate::common::{TOKEN_BRIDGE_EMITTER, batch, block_key, vaa};

async fn idempotent_and_merging<S: Sink>(sink: &S) -> anyhow::Result<()> {
    let chain = Chain::Ethereum;
    let first = batch(chain, 10..=12, &[(11, 1)]);
    sink.store_vaas_by_block(chain, &first).await?;
    sink.store_vaas_by_block(chain, &first).await?;

    let rows = sink.scan_blocks(&ScanRequest::new(chain)).await?.rows;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].vaas, vec![vaa(chain, 11, 1)]);

    // a later pass finds a second message in block 11 but reports nothing for block 10
    let second = batch(chain, 11..=11, &[(11, 1), (11, 2)]);
    sink.store_vaas_by_block(chain, &second).await?;
    let rows = sink.scan_blocks(&ScanRequest::new(chain)).await?.rows;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].vaas, vec![vaa(chain, 11, 1), vaa(chain, 11, 2)]);

    let partial = batch(chain, 11..=11, &[(11, 2)]);
    sink.store_vaas_by_block(chain, &partial).await?;
    let rows = sink.scan_blocks(&ScanRequest::block_heights(chain, 11, 11)).await?.rows;
    assert_eq!(rows[0].vaas, vec![vaa(chain, 11, 1), vaa(chain, 11, 2)]);
    Ok(())
}

async fn cursor_and_reset<S: Sink>(sink: &S) -> anyhow::Result<()> {
    assert_eq!(sink.get_cursor(Chain::Solana).await?, None);
    sink.set_cursor(Chain::Solana, &block_key(5)).await?;
    sink.set_cursor(Chain::Solana, &block_key(9).with_extra(3)).await?;
    assert_eq!(sink.get_cursor(Chain::Solana).await?, Some(block_key(9).with_extra(3)));

    sink.store_vaas_by_block(Chain::Solana, &batch(Chain::Solana, 1..=3, &[(2, 7)])).await?;
    sink.store_vaas_by_block(Chain::Bsc, &batch(Chain::Bsc, 1..=3, &[])).await?;
    sink.reset_chain(Chain::Solana).await?;

    assert_eq!(sink.get_cursor(Chain::Solana).await?, None);
    assert!(sink.scan_blocks(&ScanRequest::new(Chain::Solana)).await?.rows.is_empty());
    assert!(sink.scan_messages(&ScanRequest::new(Chain::Solana)).await?.rows.is_empty());
    assert_eq!(sink.scan_blocks(&ScanRequest::new(Chain::Bsc)).await?.rows.len(), 3);
    Ok(())
}

async fn paged_scans<S: Sink>(sink: &S) -> anyhow::Result<()> {
    let chain = Chain::Polygon;
    sink.store_vaas_by_block(chain, &batch(chain, 1..=25, &[])).await?;

    let mut seen = Vec::new();
    let mut request = ScanRequest::block_heights(chain, 3, 22).page_size(7);
    loop {
        let page = sink.scan_blocks(&request).await?;
        assert!(page.rows.len() <= 7);
        seen.extend(page.rows.iter().map(|row| row.block.number));
        if page.is_last() {
            break;
        }
        request = request.after(page.continuation);
    }
    assert_eq!(seen, (3..=22).collect::<Vec<_>>());
    Ok(())
}

async fn message_rows<S: Sink>(sink: &S) -> anyhow::Result<()> {
    let chain = Chain::Avalanche;
    sink.store_vaas_by_block(chain, &batch(chain, 100..=105, &[(101, 1), (104, 2), (104, 3)])).await?;
    sink.mark_signed(chain, TOKEN_BRIDGE_EMITTER, 2).await?;

    let rows = sink.scan_messages(&ScanRequest::new(chain)).await?.rows;
    let keys: Vec<(u64, u64)> = rows.iter().map(|row| (row.key.block, row.key.sequence)).collect();
    assert_eq!(keys, vec![(104, 2), (104, 3), (101, 1)]);
    assert_eq!(rows.iter().map(|row| row.has_signed_vaa).collect::<Vec<_>>(), vec![true, false, false]);
    assert_eq!(MessageRowKey::parse(&rows[2].row_key)?.block, 101);
    assert_eq!(rows[2].tx_hash, vaa(chain, 101, 1).tx_hash);

    let older = sink.scan_messages(&ScanRequest::message_blocks(chain, 103, 100)).await?.rows;
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].key.sequence, 1);

    let by_tx = sink.vaas_by_tx_hash(chain, &vaa(chain, 104, 2).tx_hash).await?;
    assert_eq!(by_tx, vec![vaa(chain, 104, 2), vaa(chain, 104, 3)]);
    assert!(sink.vaas_by_tx_hash(chain, "0xdead").await?.is_empty());
    Ok(())
}

async fn contract<S: Sink>(sink: &S) -> anyhow::Result<()> {
    idempotent_and_merging(sink).await?;
    cursor_and_reset(sink).await?;
    paged_scans(sink).await?;
    message_rows(sink).await?;
    Ok(())
}

#[tokio::test]
async fn in_memory_sink_honors_the_contract() -> anyhow::Result<()> {
    contract(&InMemorySink::new()).await
}

#[tokio::test]
async fn json_file_sink_honors_the_contract() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    contract(&JsonFileSink::open(dir.path()).await?).await
}

#[tokio::test]
async fn json_file_sink_survives_a_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let chain = Chain::Ethereum;
    {
        let sink = JsonFileSink::open(dir.path()).await?;
        sink.store_vaas_by_block(chain, &batch(chain, 1..=4, &[(3, 9)])).await?;
        sink.set_cursor(chain, &block_key(4)).await?;
    }

    let reopened = JsonFileSink::open(dir.path()).await?;
    assert_eq!(reopened.get_cursor(chain).await?, Some(block_key(4)));
    let rows = reopened.scan_blocks(&ScanRequest::new(chain)).await?.rows;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2].vaas, vec![vaa(chain, 3, 9)]);
    assert!(!dir.path().join("00002.json.tmp").exists());
    Ok(())
}
