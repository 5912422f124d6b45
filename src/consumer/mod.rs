//! Read-side tools over a sink's rows.
//!
//! Consumers only read through [`crate::sink::Sink`]'s scan primitives and never touch a
//! watcher's cursor. An empty block row means "scanned, nothing found"; only a missing row means
//! a height was never scanned.

mod gaps;
mod missing_vaas;

pub use gaps::{SequenceGap, find_missing_blocks, find_sequence_gaps};
pub use missing_vaas::{ChainMissingVaas, MissingVaaCache, ObservedMessage};
