//! Helpers for testing watchers: stream assertions and a scripted adapter.

#[macro_use]
pub mod macros;
mod mock_adapter;

pub use mock_adapter::{MOCK_GENESIS_TIME, MockAdapter};
