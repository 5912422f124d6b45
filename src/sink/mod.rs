//! Ordered, idempotent storage for watcher output.
//!
//! Rows are keyed by the strings produced in [`crate::key_codec`] and partitioned by chain, so
//! writers for different chains never contend. Block rows merge on rewrite: storing a block again
//! can only add messages to it. Only [`Sink::reset_chain`] removes data.

mod any;
mod json;
mod memory;
mod row;
mod tables;

use std::ops::Bound;

pub use any::AnySink;
pub use json::JsonFileSink;
pub use memory::InMemorySink;
pub use row::{BlockRow, MessageRow};

use crate::{
    chain::Chain,
    error::SinkError,
    key_codec::{self, MessageRowKey, pad_uint16},
    types::{BlockKey, VaaKey, VaasByBlock},
};

/// Default number of rows returned per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Storage contract shared by the watcher, backfills and downstream consumers.
pub trait Sink: Send + Sync {
    /// Upserts one block row per key, merging with what is already stored, and indexes every
    /// message it carries.
    fn store_vaas_by_block(
        &self,
        chain: Chain,
        vaas: &VaasByBlock,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn get_cursor(
        &self,
        chain: Chain,
    ) -> impl Future<Output = Result<Option<BlockKey>, SinkError>> + Send;

    fn set_cursor(
        &self,
        chain: Chain,
        cursor: &BlockKey,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Block rows in ascending key order.
    fn scan_blocks(
        &self,
        request: &ScanRequest,
    ) -> impl Future<Output = Result<ScanPage<BlockRow>, SinkError>> + Send;

    /// Message rows in ascending key order, which is newest block first.
    fn scan_messages(
        &self,
        request: &ScanRequest,
    ) -> impl Future<Output = Result<ScanPage<MessageRow>, SinkError>> + Send;

    /// Records that the signed VAA for `(chain, emitter, sequence)` exists.
    fn mark_signed(
        &self,
        chain: Chain,
        emitter: &str,
        sequence: u64,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn vaas_by_tx_hash(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Vec<VaaKey>, SinkError>> + Send;

    /// Drops every row and the cursor of `chain`.
    fn reset_chain(&self, chain: Chain) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// An ascending range scan over one chain's rows.
///
/// `start` is inclusive and `end` exclusive; both are full row keys. A scan resumed from a
/// continuation token starts strictly after the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub chain: Chain,
    pub start: Option<String>,
    pub end: Option<String>,
    pub page_size: usize,
    pub continuation: Option<String>,
}

impl ScanRequest {
    /// Every row of `chain`.
    #[must_use]
    pub fn new(chain: Chain) -> Self {
        Self { chain, start: None, end: None, page_size: DEFAULT_PAGE_SIZE, continuation: None }
    }

    /// Block rows with heights in `from..=to`.
    #[must_use]
    pub fn block_heights(chain: Chain, from: u64, to: u64) -> Self {
        let end = to.checked_add(1).map(|next| key_codec::block_row_bound(chain, next));
        Self { start: Some(key_codec::block_row_bound(chain, from)), end, ..Self::new(chain) }
    }

    /// Message rows from blocks `newest` down to `oldest`, newest first.
    #[must_use]
    pub fn message_blocks(chain: Chain, newest: u64, oldest: u64) -> Self {
        let end = oldest.checked_sub(1).map(|older| MessageRowKey::bound(chain, older));
        Self { start: Some(MessageRowKey::bound(chain, newest)), end, ..Self::new(chain) }
    }

    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn after(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    /// Lower and upper bounds clamped to this chain's key space.
    pub(crate) fn bounds(&self) -> (Bound<String>, Bound<String>) {
        let chain_start = key_codec::chain_prefix(self.chain);
        // '0' is the byte after '/', so this sorts after every key of the chain.
        let chain_end = format!("{}0", pad_uint16(self.chain.into()));

        let mut lower = Bound::Included(chain_start.clone());
        if let Some(start) = &self.start {
            lower = Bound::Included(start.clone().max(chain_start));
        }
        if let Some(token) = &self.continuation {
            let after_token = match &lower {
                Bound::Included(start) => token >= start,
                _ => true,
            };
            if after_token {
                lower = Bound::Excluded(token.clone());
            }
        }
        let upper = match &self.end {
            Some(end) => end.clone().min(chain_end),
            None => chain_end,
        };
        (lower, Bound::Excluded(upper))
    }
}

/// One page of scan results.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    pub rows: Vec<T>,
    /// Pass back through [`ScanRequest::after`] to fetch the next page; `None` on the last page.
    pub continuation: Option<String>,
}

impl<T> ScanPage<T> {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_height_bounds_cover_inclusive_range() {
        let request = ScanRequest::block_heights(Chain::Ethereum, 100, 105);
        let (lower, upper) = request.bounds();
        assert_eq!(lower, Bound::Included("00002/00000000000000000100".to_owned()));
        assert_eq!(upper, Bound::Excluded("00002/00000000000000000106".to_owned()));
    }

    #[test]
    fn open_ended_scan_stays_inside_chain() {
        let (lower, upper) = ScanRequest::block_heights(Chain::Solana, 0, u64::MAX).bounds();
        assert_eq!(lower, Bound::Included("00001/00000000000000000000".to_owned()));
        assert_eq!(upper, Bound::Excluded("000010".to_owned()));
    }

    #[test]
    fn continuation_resumes_after_token() {
        let request = ScanRequest::new(Chain::Ethereum).after(Some("00002/abc".to_owned()));
        let (lower, _) = request.bounds();
        assert_eq!(lower, Bound::Excluded("00002/abc".to_owned()));
    }

    #[test]
    fn message_bounds_are_inverted() {
        let request = ScanRequest::message_blocks(Chain::Ethereum, 105, 100);
        let (lower, upper) = request.bounds();
        assert_eq!(lower, Bound::Included(MessageRowKey::bound(Chain::Ethereum, 105)));
        assert_eq!(upper, Bound::Excluded(MessageRowKey::bound(Chain::Ethereum, 99)));
    }
}
