use chrono::{DateTime, Utc};

use crate::{
    chain::Chain,
    key_codec::MessageRowKey,
    types::{BlockKey, VaaKey},
};

/// One scanned unit of progress and the messages found in it.
///
/// An empty `vaas` means the unit was scanned and had no messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub chain: Chain,
    pub block: BlockKey,
    pub vaas: Vec<VaaKey>,
    /// Full row key, usable as a scan continuation token.
    pub row_key: String,
}

/// One observed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub key: MessageRowKey,
    pub row_key: String,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub has_signed_vaa: bool,
}
