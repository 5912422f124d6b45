//! Canonical, order-preserving string keys.
//!
//! Every numeric component that ends up inside a stored key is zero-padded to a fixed width, so
//! plain byte-wise comparison of two keys agrees with comparison of the numbers they carry. The
//! row keys produced here are read by consumers outside this crate and must not change shape.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    chain::Chain,
    error::KeyError,
    types::{BlockKey, VaaKey},
};

/// Width of a padded `u16` (`65535`).
pub const UINT16_WIDTH: usize = 5;
/// Width of a padded `u64` (`18446744073709551615`).
pub const UINT64_WIDTH: usize = 20;
/// Hex characters in a normalized 32-byte emitter address.
pub const EMITTER_HEX_LEN: usize = 64;

/// Left-pads a decimal string with `'0'` up to `width` characters.
///
/// Strings already at least `width` long are returned unchanged.
#[must_use]
pub fn pad_for_sort(number: &str, width: usize) -> String {
    format!("{number:0>width$}")
}

#[must_use]
pub fn pad_uint16(value: u16) -> String {
    format!("{value:0UINT16_WIDTH$}")
}

#[must_use]
pub fn pad_uint64(value: u64) -> String {
    format!("{value:0UINT64_WIDTH$}")
}

/// Pads `u64::MAX - value`, so that ascending scans visit larger values first.
#[must_use]
pub fn pad_inverted_uint64(value: u64) -> String {
    pad_uint64(u64::MAX - value)
}

/// Recovers the value written by [`pad_inverted_uint64`].
pub fn parse_inverted_uint64(component: &str) -> Result<u64, KeyError> {
    parse_fixed_width::<u64>(component, UINT64_WIDTH).map(|inverse| u64::MAX - inverse)
}

fn parse_fixed_width<T: std::str::FromStr>(component: &str, width: usize) -> Result<T, KeyError> {
    if component.len() != width || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::new(component, "expected a zero-padded decimal component"));
    }
    component.parse().map_err(|_| KeyError::new(component, "padded component out of range"))
}

fn parse_canonical_u64(component: &str) -> Result<u64, KeyError> {
    let canonical = !component.is_empty()
        && component.bytes().all(|b| b.is_ascii_digit())
        && (component == "0" || !component.starts_with('0'));
    if !canonical {
        return Err(KeyError::new(component, "expected a decimal number without padding"));
    }
    component.parse().map_err(|_| KeyError::new(component, "number out of range"))
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(component: &str) -> Result<DateTime<Utc>, KeyError> {
    let parsed = DateTime::parse_from_rfc3339(component)
        .map_err(|_| KeyError::new(component, "expected an ISO-8601 timestamp"))?
        .with_timezone(&Utc);
    if format_timestamp(&parsed) != component {
        return Err(KeyError::new(component, "timestamp is not in canonical UTC millisecond form"));
    }
    Ok(parsed)
}

/// `number/timestamp[/extra]`, with `number` and `extra` padded to 20 digits.
#[must_use]
pub fn encode_block_key(number: u64, timestamp: &DateTime<Utc>, extra: Option<u64>) -> String {
    let mut key = format!("{}/{}", pad_uint64(number), format_timestamp(timestamp));
    if let Some(extra) = extra {
        key.push('/');
        key.push_str(&pad_uint64(extra));
    }
    key
}

pub fn decode_block_key(key: &str) -> Result<BlockKey, KeyError> {
    let parts: Vec<&str> = key.split('/').collect();
    let (number, timestamp, extra) = match parts.as_slice() {
        [number, timestamp] => (number, timestamp, None),
        [number, timestamp, extra] => (number, timestamp, Some(*extra)),
        _ => return Err(KeyError::new(key, "block key must have two or three fields")),
    };
    let extra = extra.map(|extra| parse_fixed_width(extra, UINT64_WIDTH)).transpose()?;
    Ok(BlockKey {
        number: parse_fixed_width(number, UINT64_WIDTH)?,
        timestamp: parse_timestamp(timestamp)?,
        extra,
    })
}

/// `txHash:chain/emitterHex/sequence`.
#[must_use]
pub fn encode_vaa_key(tx_hash: &str, chain: Chain, emitter: &str, sequence: u64) -> String {
    format!("{tx_hash}:{}/{emitter}/{sequence}", u16::from(chain))
}

pub fn decode_vaa_key(key: &str) -> Result<VaaKey, KeyError> {
    let (tx_hash, id) =
        key.split_once(':').ok_or_else(|| KeyError::new(key, "vaa key has no transaction hash"))?;
    if tx_hash.is_empty() || tx_hash.contains('/') {
        return Err(KeyError::new(key, "invalid transaction hash"));
    }
    let parts: Vec<&str> = id.split('/').collect();
    let [chain, emitter, sequence] = parts.as_slice() else {
        return Err(KeyError::new(key, "vaa key must be chain/emitter/sequence"));
    };
    let chain = parse_canonical_u64(chain)
        .ok()
        .and_then(|id| u16::try_from(id).ok())
        .ok_or_else(|| KeyError::new(key, "invalid chain id"))?;
    validate_emitter(emitter)?;
    Ok(VaaKey {
        tx_hash: tx_hash.to_owned(),
        chain: Chain::from(chain),
        emitter: (*emitter).to_owned(),
        sequence: parse_canonical_u64(sequence)?,
    })
}

fn validate_emitter(emitter: &str) -> Result<(), KeyError> {
    if emitter.len() != EMITTER_HEX_LEN || !emitter.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyError::new(emitter, "emitter must be 64 hex characters"));
    }
    Ok(())
}

/// Normalizes a hex address of up to 32 bytes into a lowercase, 64-character emitter.
pub fn normalize_emitter(address: &str) -> Result<String, KeyError> {
    let trimmed = address.strip_prefix("0x").unwrap_or(address);
    if trimmed.len() > EMITTER_HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyError::new(address, "emitter must be at most 32 hex-encoded bytes"));
    }
    Ok(pad_for_sort(&trimmed.to_ascii_lowercase(), EMITTER_HEX_LEN))
}

/// Row key of a block row: `chain/encodedBlockKey`.
#[must_use]
pub fn block_row_key(chain: Chain, block: &BlockKey) -> String {
    format!("{}/{block}", pad_uint16(chain.into()))
}

/// Scan bound that sorts before every block row of `chain` at `number` or above.
#[must_use]
pub fn block_row_bound(chain: Chain, number: u64) -> String {
    format!("{}/{}", pad_uint16(chain.into()), pad_uint64(number))
}

/// Prefix shared by all rows of one chain.
#[must_use]
pub fn chain_prefix(chain: Chain) -> String {
    format!("{}/", pad_uint16(chain.into()))
}

/// Splits `chain/rest` into its chain and the remaining components.
pub fn split_chain_prefix(row_key: &str) -> Result<(Chain, &str), KeyError> {
    let (chain, rest) =
        row_key.split_once('/').ok_or_else(|| KeyError::new(row_key, "row key has no chain"))?;
    Ok((Chain::from(parse_fixed_width::<u16>(chain, UINT16_WIDTH)?), rest))
}

/// Identity of a message row: one observed message at one block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageRowKey {
    pub chain: Chain,
    pub block: u64,
    pub emitter: String,
    pub sequence: u64,
}

impl MessageRowKey {
    /// `chain/invertedBlock/emitter/sequence`; newer blocks sort first.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            pad_uint16(self.chain.into()),
            pad_inverted_uint64(self.block),
            self.emitter,
            pad_uint64(self.sequence)
        )
    }

    pub fn parse(row_key: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = row_key.split('/').collect();
        let [chain, block, emitter, sequence] = parts.as_slice() else {
            return Err(KeyError::new(row_key, "message row key must have four fields"));
        };
        validate_emitter(emitter)?;
        Ok(Self {
            chain: Chain::from(parse_fixed_width::<u16>(chain, UINT16_WIDTH)?),
            block: parse_inverted_uint64(block)?,
            emitter: (*emitter).to_owned(),
            sequence: parse_fixed_width(sequence, UINT64_WIDTH)?,
        })
    }

    /// Scan bound sorting before every message row of `chain` at `block` or below.
    #[must_use]
    pub fn bound(chain: Chain, block: u64) -> String {
        format!("{}/{}", pad_uint16(chain.into()), pad_inverted_uint64(block))
    }
}

/// Row key of the signed-VAA index: `chain/emitter/sequence`.
#[must_use]
pub fn signed_vaa_row_key(chain: Chain, emitter: &str, sequence: u64) -> String {
    format!("{}/{emitter}/{}", pad_uint16(chain.into()), pad_uint64(sequence))
}

/// Row key of the transaction index: `txHash/chain`.
#[must_use]
pub fn vaas_by_tx_hash_row_key(tx_hash: &str, chain: Chain) -> String {
    format!("{tx_hash}/{}", pad_uint16(chain.into()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const EMITTER: &str = "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585";

    fn ts(secs: i64, millis: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
    }

    #[test]
    fn pads() {
        assert_eq!(pad_for_sort("42", 5), "00042");
        assert_eq!(pad_for_sort("123456", 5), "123456");
        assert_eq!(pad_uint16(2), "00002");
        assert_eq!(pad_uint16(u16::MAX), "65535");
        assert_eq!(pad_uint64(u64::MAX), "18446744073709551615");
        assert_eq!(pad_inverted_uint64(0), "18446744073709551615");
        assert_eq!(pad_inverted_uint64(u64::MAX), "00000000000000000000");
        assert_eq!(parse_inverted_uint64(&pad_inverted_uint64(46_997_506)).unwrap(), 46_997_506);
    }

    #[test]
    fn block_key_round_trip() {
        let cases = [
            (0, ts(0, 0), None),
            (46_997_506, ts(1_642_528_773, 0), None),
            (1_094_390, ts(1_666_000_000, 123), Some(71)),
            (u64::MAX, ts(253_402_300_799, 999), Some(u64::MAX)),
        ];
        for (number, timestamp, extra) in cases {
            let encoded = encode_block_key(number, &timestamp, extra);
            let decoded = decode_block_key(&encoded).unwrap();
            assert_eq!((decoded.number, decoded.timestamp, decoded.extra), (number, timestamp, extra));
        }
        assert_eq!(
            encode_block_key(46_997_506, &ts(1_642_528_773, 0), None),
            "00000000000046997506/2022-01-18T17:59:33.000Z"
        );
    }

    #[test]
    fn block_key_order_matches_numeric_order() {
        let heights = [0u64, 9, 10, 99, 100, 101, 999_999, 1_000_000, u64::MAX - 1, u64::MAX];
        for pair in heights.windows(2) {
            let a = encode_block_key(pair[0], &ts(1, 0), None);
            let b = encode_block_key(pair[1], &ts(1, 0), None);
            assert!(a < b, "{a} should sort before {b}");
        }
    }

    #[test]
    fn message_row_key_sorts_newest_first() {
        let older = MessageRowKey { chain: Chain::Ethereum, block: 100, emitter: EMITTER.into(), sequence: 1 };
        let newer = MessageRowKey { block: 101, ..older.clone() };
        assert!(newer.encode() < older.encode());
        assert_eq!(MessageRowKey::parse(&older.encode()).unwrap(), older);
    }

    #[test]
    fn malformed_block_keys() {
        let bad = [
            "",
            "46997506/2022-01-18T17:59:33.000Z",
            "00000000000046997506",
            "00000000000046997506/2022-01-18T17:59:33Z",
            "00000000000046997506/2022-01-18T17:59:33.000+01:00",
            "00000000000046997506/not-a-date",
            "00000000000046997506/2022-01-18T17:59:33.000Z/7",
            "00000000000046997506/2022-01-18T17:59:33.000Z/00000000000000000007/x",
            "0000000000004699750a/2022-01-18T17:59:33.000Z",
            "99999999999999999999/2022-01-18T17:59:33.000Z",
        ];
        for key in bad {
            assert!(decode_block_key(key).is_err(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn vaa_key_round_trip() {
        let tx = "0xe1121d9a6e4a7e5d7e2f8e1a8a2d3f2fb5f1d5c0a4de6c7b1a6e6f1e1b0d7197";
        let key = encode_vaa_key(tx, Chain::Ethereum, EMITTER, 219_960);
        assert_eq!(key, format!("{tx}:2/{EMITTER}/219960"));
        let decoded = decode_vaa_key(&key).unwrap();
        assert_eq!(decoded.tx_hash, tx);
        assert_eq!(decoded.chain, Chain::Ethereum);
        assert_eq!(decoded.emitter, EMITTER);
        assert_eq!(decoded.sequence, 219_960);
        assert_eq!(decoded.to_string(), key);
    }

    #[test]
    fn malformed_vaa_keys() {
        let bad = [
            format!("2/{EMITTER}/1"),
            format!(":2/{EMITTER}/1"),
            format!("tx:2/{EMITTER}"),
            format!("tx:70000/{EMITTER}/1"),
            format!("tx:2/{EMITTER}/01"),
            format!("tx:2/{EMITTER}/-1"),
            "tx:2/abc/1".to_owned(),
            format!("tx:2/{EMITTER}/1/2"),
        ];
        for key in bad {
            assert!(decode_vaa_key(&key).is_err(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn emitter_normalization() {
        assert_eq!(
            normalize_emitter("0x3EE18B2214AFF97000D974CF647E7C347E8FA585").unwrap(),
            EMITTER
        );
        assert!(normalize_emitter("0xzz").is_err());
        assert!(normalize_emitter(&"1".repeat(65)).is_err());
    }

    #[test]
    fn index_row_keys() {
        assert_eq!(
            signed_vaa_row_key(Chain::Solana, EMITTER, 5),
            format!("00001/{EMITTER}/00000000000000000005")
        );
        assert_eq!(vaas_by_tx_hash_row_key("abc", Chain::Wormchain), "abc/03104");
        let (chain, rest) = split_chain_prefix("00002/xyz").unwrap();
        assert_eq!((chain, rest), (Chain::Ethereum, "xyz"));
        assert!(split_chain_prefix("2/xyz").is_err());
    }
}
