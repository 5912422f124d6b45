//! vaa-watcher discovers cross-chain protocol messages on many chains and stores them under
//! sortable keys.
//!
//! For each configured chain a [`Watcher`] polls a [`ChainAdapter`](adapter::ChainAdapter) for the
//! finalized height, asks it for the messages published in the next range of heights and writes
//! them, grouped by block, to a [`Sink`](sink::Sink). The [`Supervisor`] runs one watcher per chain
//! over a shared sink.
//!
//! # Keys
//!
//! Blocks and messages are identified by the strings of [`key_codec`]. Block keys sort by height
//! under plain string comparison; message rows sort newest block first. These strings are a durable
//! contract with downstream readers and never change shape.
//!
//! # Delivery
//!
//! Ingestion is at-least-once. A range is written before the chain's cursor moves past it, and a
//! failed range is retried rather than skipped. Sink writes are idempotent and merging, so
//! repeating a range is harmless.
//!
//! # Errors
//!
//! Adapters classify every failure as transient, unsupported range or fatal configuration. A
//! watcher retries transient failures with capped exponential backoff, halves rejected ranges and
//! stops only on a fatal configuration error, which it reports on its stream as
//! [`WatcherError::FatalConfiguration`].
//!
//! # Consumers
//!
//! The [`consumer`] module reads the sink back: heights with no stored row, sequence gaps per
//! emitter and the missing-VAA cache document. [`Backfill`] closes the gaps it finds.

#[macro_use]
mod logging;

pub mod adapter;
pub mod chain;
pub mod config;
pub mod consumer;
pub mod key_codec;
pub mod robust_provider;
pub mod sink;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod watcher;

mod error;
mod types;

pub use chain::{Chain, ChainFamily, InvalidChainError};
pub use config::{ConfigError, WatcherConfig};
pub use error::{AdapterError, KeyError, SinkError, WatcherError};
pub use types::{
    BlockKey, Notification, StoredBatch, VaaKey, VaasByBlock, WatcherMessage, WatcherResult,
};
pub use watcher::{
    Backfill, ChainReport, DEFAULT_POLL_INTERVAL, DEFAULT_STREAM_BUFFER_CAPACITY, Supervisor,
    Watcher, WatcherBuilder, WatcherHandle,
};
