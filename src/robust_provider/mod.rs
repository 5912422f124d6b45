//! Retrying, time-bounded access to chain RPC endpoints.
//!
//! Two clients live here:
//! * [`RobustProvider`], a wrapper around Alloy's [`RootProvider`](alloy::providers::RootProvider)
//!   used by the EVM adapters.
//! * [`RobustHttpClient`], a wrapper around `reqwest` used by the REST and JSON-RPC adapters
//!   (Solana, Algorand, Aptos, Cosmwasm, Near).
//!
//! Both bound every call with a total timeout, retry retryable failures with exponential backoff up
//! to `max_retries`, and fail over to fallback endpoints in the order they were added. Failures that
//! retrying cannot fix, such as a node refusing a block range as too large, are returned right away
//! so the watcher can narrow the range instead.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vaa_watcher::robust_provider::{RobustProvider, RobustProviderBuilder};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let robust: RobustProvider = RobustProviderBuilder::new("https://ethereum-rpc.publicnode.com")
//!     .fallback("https://rpc.ankr.com/eth")
//!     .call_timeout(Duration::from_secs(30))
//!     .build()
//!     .await?;
//!
//! let tip = robust.get_block_number().await?;
//! println!("Current block: {tip}");
//! # Ok(()) }
//! ```

pub mod builder;
pub mod http_client;
pub mod provider;
pub mod provider_conversion;

pub use builder::*;
pub use http_client::{HttpError, RobustHttpClient, RobustHttpClientBuilder};
pub use provider::{Error, RobustProvider};
pub use provider_conversion::{IntoRobustProvider, IntoRootProvider};
