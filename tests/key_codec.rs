use chrono::{DateTime, Utc};
use vaa_watcher::{BlockKey, Chain, KeyError, VaaKey, key_codec};

fn timestamps() -> Vec<DateTime<Utc>> {
    [0, 1_000, 1_672_531_199_999, 1_700_000_000_123, 4_102_444_800_000]
        .into_iter()
        .map(|millis| DateTime::from_timestamp_millis(millis).unwrap())
        .collect()
}

#[test]
fn block_keys_round_trip() -> Result<(), KeyError> {
    for number in [0, 1, 46_997_506, u64::MAX / 2, u64::MAX] {
        for timestamp in timestamps() {
            let key = BlockKey::new(number, timestamp);
            assert_eq!(key.to_string().parse::<BlockKey>()?, key);
            let with_extra = key.clone().with_extra(number / 3);
            assert_eq!(with_extra.to_string().parse::<BlockKey>()?, with_extra);
        }
    }
    Ok(())
}

#[test]
fn block_key_order_matches_string_order() {
    let mut keys = Vec::new();
    for number in [0u64, 9, 10, 99, 100, 1_000_000, u64::MAX] {
        for timestamp in timestamps() {
            keys.push(BlockKey::new(number, timestamp));
        }
    }
    for a in &keys {
        for b in &keys {
            if a.number < b.number {
                assert!(a.to_string() < b.to_string(), "{a} should sort before {b}");
            }
        }
    }
}

#[test]
fn message_rows_sort_newest_first() {
    let row = |block| key_codec::MessageRowKey {
        chain: Chain::Ethereum,
        block,
        emitter: "0".repeat(64),
        sequence: 1,
    }
    .encode();
    assert!(row(200) < row(100));
    assert!(row(u64::MAX) < row(0));
    assert_eq!(key_codec::MessageRowKey::parse(&row(46_997_506)).map(|key| key.block), Ok(46_997_506));
}

#[test]
fn vaa_keys_round_trip() -> Result<(), KeyError> {
    let key = VaaKey::new(
        "0xe112000000000000000000000000000000000000000000000000000000000197",
        Chain::Ethereum,
        "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585",
        219_960,
    );
    let encoded = key.to_string();
    assert!(encoded.ends_with(":2/0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585/219960"));
    assert_eq!(encoded.parse::<VaaKey>()?, key);

    let solana = VaaKey::new(
        "5j7s6NiJS3JAkvgkoc18WVAsiSaci2pxB2A6ueCJP4tprA2TFg9wSyTLeYouxPBJEMzJinENTkpA52YStRW5Dia7",
        Chain::Solana,
        "ec7372995d5cc8732397fb0ad35c0121e0eaa90d26f828a534cab54391b3a4f5",
        1,
    );
    assert_eq!(solana.to_string().parse::<VaaKey>()?, solana);
    Ok(())
}

#[test]
fn malformed_keys_are_reported() {
    for bad in ["", "12", "abc/2023-01-01T00:00:00.000Z", "00000000000000000001"] {
        assert!(bad.parse::<BlockKey>().is_err(), "{bad:?} should not parse");
    }
    let emitter = "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585";
    let missing_hash = format!(":2/{emitter}/1");
    let bad_chain = format!("0xabc:70000/{emitter}/1");
    for bad in ["no-colon", "0xabc:2/short/1", "0xabc:2/0000/1/extra", &missing_hash, &bad_chain] {
        assert!(bad.parse::<VaaKey>().is_err(), "{bad:?} should not parse");
    }
}
