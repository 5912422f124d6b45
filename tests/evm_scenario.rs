mod common;

use alloy::{
    primitives::{address, b256},
    providers::mock::Asserter,
};
use vaa_watcher::{
    Chain,
    adapter::{ChainAdapter, EvmAdapter, EvmFinality, FinalityTag},
    key_codec,
    sink::{InMemorySink, ScanRequest, Sink},
};

use crate::common::{core_log, init_tracing, mocked_provider, rpc_block};

const FROM: u64 = 46_997_500;
const TO: u64 = 46_997_599;
const MESSAGE_BLOCK: u64 = 46_997_506;
const BLOCK_TIME: u64 = 1_672_000_000;

#[tokio::test]
async fn one_message_in_a_hundred_blocks() -> anyhow::Result<()> {
    init_tracing();
    let contract = address!("98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B");
    let sender = address!("45f1d1e4c1c7e4e4ff2c7b2a1a2cb3b8b4e6f052");
    let tx_hash = b256!("e112000000000000000000000000000000000000000000000000000000000197");

    let asserter = Asserter::new();
    asserter.push_success(&vec![core_log(contract, sender, MESSAGE_BLOCK, tx_hash, 219_960)]);
    for number in FROM..=TO {
        asserter.push_success(&rpc_block(number, BLOCK_TIME + (number - FROM) * 12));
    }

    let adapter = EvmAdapter::new(
        Chain::Ethereum,
        mocked_provider(&asserter).await?,
        contract,
        EvmFinality::Tag(FinalityTag::Finalized),
    )
    .max_concurrent_fetches(1);

    let vaas = adapter.get_messages_for_range(FROM, TO).await?;

    assert_eq!(vaas.len(), 100);
    let with_messages: Vec<_> = vaas.non_empty().collect();
    assert_eq!(with_messages.len(), 1);
    let (block, messages) = with_messages[0];
    assert_eq!(block.number, MESSAGE_BLOCK);
    assert_eq!(block.timestamp.timestamp(), i64::try_from(BLOCK_TIME + 6 * 12)?);
    assert_eq!(
        messages[0].to_string(),
        format!(
            "0x{}:2/000000000000000000000000{}/219960",
            hex::encode(tx_hash),
            hex::encode(sender)
        )
    );
    assert!(messages[0].to_string().starts_with("0xe112"));
    assert!(messages[0].to_string().contains("197:2/000000000000000000000000"));
    assert_eq!(vaas.last_key().map(|key| key.number), Some(TO));

    let sink = InMemorySink::new();
    sink.store_vaas_by_block(Chain::Ethereum, &vaas).await?;
    let rows = sink.scan_blocks(&ScanRequest::block_heights(Chain::Ethereum, FROM, TO)).await?.rows;
    assert_eq!(rows.len(), 100);
    assert_eq!(rows.iter().filter(|row| !row.vaas.is_empty()).count(), 1);
    let prefix = format!("{}{}/", key_codec::chain_prefix(Chain::Ethereum), key_codec::pad_uint64(MESSAGE_BLOCK));
    assert!(rows[6].row_key.starts_with(&prefix));
    Ok(())
}

#[tokio::test]
async fn range_limit_errors_become_unsupported_ranges() -> anyhow::Result<()> {
    let asserter = Asserter::new();
    asserter.push_failure(alloy::rpc::json_rpc::ErrorPayload {
        code: -32005,
        message: "query returned more than 10000 results".into(),
        data: None,
    });
    let adapter = EvmAdapter::new(
        Chain::Bsc,
        mocked_provider(&asserter).await?,
        address!("98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"),
        EvmFinality::Confirmations(15),
    );

    let err = adapter.get_messages_for_range(1, 5_000).await.unwrap_err();
    assert!(matches!(err, vaa_watcher::AdapterError::UnsupportedRange { from: 1, to: 5_000, .. }));
    Ok(())
}

#[tokio::test]
async fn confirmations_finality_trails_the_tip() -> anyhow::Result<()> {
    let asserter = Asserter::new();
    asserter.push_success(&alloy::primitives::U64::from(1_000u64));
    let adapter = EvmAdapter::new(
        Chain::Bsc,
        mocked_provider(&asserter).await?,
        address!("98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"),
        EvmFinality::Confirmations(15),
    );

    assert_eq!(adapter.get_finalized_height().await?, Some(985));
    Ok(())
}
