//! Per-chain ingestion: the live watcher, one-shot backfills and the multi-chain supervisor.
//!
//! A [`Watcher`] owns one adapter and reads and writes one chain's cursor. Every cycle it asks for
//! the finalized height, requests the heights after the cursor (at most `max_batch_size` of them),
//! writes the result to the sink and only then moves the cursor. A crash between the two simply
//! repeats an idempotent write on restart.
//!
//! ```rust,no_run
//! use vaa_watcher::{Chain, WatcherBuilder, WatcherMessage, sink::InMemorySink};
//! use vaa_watcher::adapter::{EvmAdapter, EvmFinality, FinalityTag};
//! use vaa_watcher::robust_provider::RobustProviderBuilder;
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = RobustProviderBuilder::new("https://ethereum-rpc.publicnode.com").build().await?;
//! let contract = "0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B".parse()?;
//! let adapter = EvmAdapter::new(Chain::Ethereum, provider, contract, EvmFinality::Tag(FinalityTag::Finalized));
//!
//! let mut handle = WatcherBuilder::new(Chain::Ethereum).build(adapter, InMemorySink::new())?.start();
//! while let Some(message) = handle.stream().next().await {
//!     if let WatcherMessage::Stored(batch) = message? {
//!         println!("{}..={}: {} messages", batch.from, batch.to, batch.messages);
//!     }
//! }
//! # Ok(()) }
//! ```

use std::time::Duration;

mod backfill;
mod builder;
mod engine;
mod policy;
mod range_iterator;
mod supervisor;

pub use backfill::{Backfill, DEFAULT_BACKFILL_RETRIES};
pub use builder::WatcherBuilder;
pub use engine::{Watcher, WatcherHandle, WatcherTask, join};
pub use range_iterator::RangeIterator;
pub use supervisor::{ChainReport, Supervisor};

/// Idle time between cycles once caught up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// First delay after a transient failure.
pub const DEFAULT_BACKOFF_MIN_DELAY: Duration = Duration::from_millis(500);

/// Ceiling for the delay between retries of the same range.
pub const DEFAULT_BACKOFF_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default capacity of a watcher's progress stream.
pub const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 50_000;
