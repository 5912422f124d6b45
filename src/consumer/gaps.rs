use std::{collections::BTreeMap, ops::RangeInclusive};

use crate::{
    chain::Chain,
    error::WatcherError,
    sink::{MessageRow, ScanRequest, Sink},
};

/// Heights in `from..=to` that have no block row for `chain`, ascending.
///
/// Heights are compared by block number, so chains that key progress by event sequence report a
/// block as present as soon as any of its events is stored.
///
/// # Errors
///
/// * [`WatcherError::InvalidRange`] - if `from > to`.
/// * [`WatcherError::Sink`] - if a scan fails or returns an undecodable row.
pub async fn find_missing_blocks<S: Sink>(
    sink: &S,
    chain: Chain,
    from: u64,
    to: u64,
) -> Result<Vec<u64>, WatcherError> {
    if from > to {
        return Err(WatcherError::InvalidRange { from, to });
    }

    let mut missing = Vec::new();
    // `None` once every height up to u64::MAX is accounted for.
    let mut expected = Some(from);
    let mut continuation = None;
    loop {
        let request = ScanRequest::block_heights(chain, from, to).after(continuation.take());
        let page = sink.scan_blocks(&request).await?;
        for row in &page.rows {
            let number = row.block.number;
            let Some(next) = expected else { break };
            if number < next {
                continue;
            }
            missing.extend(next..number);
            expected = number.checked_add(1);
        }
        if page.is_last() {
            break;
        }
        continuation = page.continuation;
    }
    if let Some(next) = expected {
        missing.extend(next..=to);
    }

    debug!(chain = %chain, from = from, to = to, missing = missing.len(), "Scanned for missing blocks");
    Ok(missing)
}

/// A run of sequence numbers never observed for one emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub chain: Chain,
    pub emitter: String,
    pub missing: RangeInclusive<u64>,
}

/// Sequence holes between the messages each `(chain, emitter)` pair has published.
///
/// Only holes strictly between observed sequences are reported; nothing is assumed about
/// sequences below the lowest or above the highest one seen. Rows may come in any order.
#[must_use]
pub fn find_sequence_gaps(rows: &[MessageRow]) -> Vec<SequenceGap> {
    let mut sequences: BTreeMap<(Chain, &str), Vec<u64>> = BTreeMap::new();
    for row in rows {
        sequences.entry((row.key.chain, row.key.emitter.as_str())).or_default().push(row.key.sequence);
    }

    let mut gaps = Vec::new();
    for ((chain, emitter), mut seen) in sequences {
        seen.sort_unstable();
        seen.dedup();
        for pair in seen.windows(2) {
            let (low, high) = (pair[0], pair[1]);
            if high - low > 1 {
                gaps.push(SequenceGap { chain, emitter: emitter.to_owned(), missing: low + 1..=high - 1 });
            }
        }
    }
    gaps
}
