//! TOML configuration for a fleet of watchers.
//!
//! ```toml
//! network = "mainnet"
//!
//! [defaults]
//! poll_interval_ms = 500
//!
//! [sink]
//! kind = "json"
//! path = "./vaa-db"
//!
//! [[chains]]
//! chain = "ethereum"
//! rpc = "https://ethereum-rpc.publicnode.com"
//! contract = "0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"
//! finality = { mode = "tag", tag = "finalized" }
//!
//! [[chains]]
//! chain = "arbitrum"
//! contract = "0xa5f208e072434bC67592E4C49C1B991BA79BCA46"
//! finality = { mode = "arbitrum_l1", l1_rpc = "https://ethereum-rpc.publicnode.com" }
//! ```
//!
//! A chain's `rpc` may be left out when `<CHAIN>_RPC` is set in the environment. Everything a
//! chain needs but lacks is reported as a fatal configuration error when its adapter is built.

use std::{path::{Path, PathBuf}, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    adapter::evm::FinalityTag,
    chain::{Chain, ChainFamily},
    error::{AdapterError, WatcherError},
};

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("could not read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Parse(String),
}

impl From<ConfigError> for WatcherError {
    fn from(error: ConfigError) -> Self {
        WatcherError::FatalConfiguration(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Devnet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatcherConfig {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl WatcherConfig {
    /// # Errors
    ///
    /// [`ConfigError::Parse`] when the document is not valid TOML for this schema.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, [`ConfigError::Parse`] otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io { path: path.to_path_buf(), message: e.to_string() })?;
        Self::from_toml_str(&raw)
    }
}

/// Fleet-wide settings; every field can be overridden per chain where it makes sense.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_concurrent_requests: usize,
    pub min_call_interval_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            call_timeout_ms: 60_000,
            max_retries: 3,
            min_delay_ms: 1_000,
            max_concurrent_requests: 8,
            min_call_interval_ms: 0,
            backoff_min_ms: 500,
            backoff_max_ms: 60_000,
        }
    }
}

impl Defaults {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    #[default]
    Memory,
    Json { path: PathBuf },
}

/// Finality policy for EVM chains.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FinalityConfig {
    Tag { tag: FinalityTag },
    Confirmations { depth: u64 },
    PolygonRootChain { l1_rpc: String, root_chain: String },
    ArbitrumL1 { l1_rpc: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub family: Option<ChainFamily>,
    pub rpc: Option<String>,
    #[serde(default)]
    pub fallback_rpcs: Vec<String>,
    /// Core contract: an address, program id, application id or account, depending on family.
    pub contract: Option<String>,
    pub finality: Option<FinalityConfig>,
    pub max_batch_size: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub genesis_height: Option<u64>,
    /// Algorand indexer endpoint.
    pub indexer: Option<String>,
    /// Aptos event handle struct, defaults to `<contract>::state::WormholeMessageHandle`.
    pub event_handle: Option<String>,
    pub max_concurrent_requests: Option<usize>,
    pub min_call_interval_ms: Option<u64>,
}

impl ChainConfig {
    #[must_use]
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            family: None,
            rpc: None,
            fallback_rpcs: Vec::new(),
            contract: None,
            finality: None,
            max_batch_size: None,
            poll_interval_ms: None,
            genesis_height: None,
            indexer: None,
            event_handle: None,
            max_concurrent_requests: None,
            min_call_interval_ms: None,
        }
    }

    /// # Errors
    ///
    /// Fatal when neither configuration nor the family default names a family.
    pub fn family(&self) -> Result<ChainFamily, AdapterError> {
        self.family
            .or_else(|| self.chain.default_family())
            .ok_or_else(|| AdapterError::fatal(format!("no watcher family for chain {}", self.chain)))
    }

    /// The configured endpoint, or the one in `<CHAIN>_RPC`.
    ///
    /// # Errors
    ///
    /// Fatal when neither is set.
    pub fn rpc(&self) -> Result<String, AdapterError> {
        if let Some(rpc) = self.rpc.as_ref().filter(|rpc| !rpc.is_empty()) {
            return Ok(rpc.clone());
        }
        let var = self.chain.rpc_env_var();
        std::env::var(&var)
            .ok()
            .filter(|rpc| !rpc.is_empty())
            .ok_or_else(|| AdapterError::fatal(format!("{} RPC is not defined (set rpc or {var})", self.chain)))
    }

    /// # Errors
    ///
    /// Fatal when no contract is configured.
    pub fn contract(&self) -> Result<&str, AdapterError> {
        self.contract
            .as_deref()
            .filter(|contract| !contract.is_empty())
            .ok_or_else(|| AdapterError::fatal(format!("core contract for {} is not defined", self.chain)))
    }

    #[must_use]
    pub fn max_batch_size(&self) -> u64 {
        self.max_batch_size.unwrap_or_else(|| self.chain.default_max_batch_size())
    }

    #[must_use]
    pub fn poll_interval(&self, defaults: &Defaults) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms))
    }

    /// Where a watcher without a stored cursor starts.
    #[must_use]
    pub fn genesis_height(&self, network: Network) -> Option<u64> {
        self.genesis_height.or_else(|| match network {
            Network::Mainnet => self.chain.mainnet_deployment_height(),
            Network::Testnet | Network::Devnet => None,
        })
    }

    /// The configured finality, or the chain's customary one.
    ///
    /// # Errors
    ///
    /// Fatal for chains whose finality needs an anchor endpoint that was not configured.
    pub fn finality(&self) -> Result<FinalityConfig, AdapterError> {
        if let Some(finality) = &self.finality {
            return Ok(finality.clone());
        }
        let finality = match self.chain {
            Chain::Ethereum | Chain::Sepolia | Chain::Holesky | Chain::Karura | Chain::Acala => {
                FinalityConfig::Tag { tag: FinalityTag::Finalized }
            }
            Chain::Bsc => FinalityConfig::Confirmations { depth: 15 },
            Chain::Arbitrum | Chain::ArbitrumSepolia => {
                return Err(AdapterError::fatal(format!(
                    "{} needs finality = {{ mode = \"arbitrum_l1\", l1_rpc = ... }}",
                    self.chain
                )));
            }
            _ => FinalityConfig::Tag { tag: FinalityTag::Latest },
        };
        Ok(finality)
    }

    #[must_use]
    pub fn max_concurrent_requests(&self, defaults: &Defaults) -> usize {
        self.max_concurrent_requests.unwrap_or(defaults.max_concurrent_requests)
    }

    #[must_use]
    pub fn min_call_interval(&self, defaults: &Defaults) -> Duration {
        Duration::from_millis(self.min_call_interval_ms.unwrap_or(defaults.min_call_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        network = "mainnet"

        [defaults]
        poll_interval_ms = 1000

        [sink]
        kind = "json"
        path = "/var/lib/vaa"

        [[chains]]
        chain = "ethereum"
        rpc = "https://eth.example"
        contract = "0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"

        [[chains]]
        chain = 23
        contract = "0xa5f208e072434bC67592E4C49C1B991BA79BCA46"
        max_batch_size = 20
        poll_interval_ms = 250
        finality = { mode = "arbitrum_l1", l1_rpc = "https://eth.example" }

        [[chains]]
        chain = "algorand"
        rpc = "https://algod.example"
        indexer = "https://indexer.example"
        contract = "842125965"
        genesis_height = 5
    "#;

    #[test]
    fn parses_full_document() {
        let config = WatcherConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.sink, SinkConfig::Json { path: PathBuf::from("/var/lib/vaa") });
        assert_eq!(config.defaults.poll_interval_ms, 1000);
        assert_eq!(config.defaults.max_retries, 3);
        assert_eq!(config.chains.len(), 3);

        let ethereum = &config.chains[0];
        assert_eq!(ethereum.family().unwrap(), ChainFamily::Evm);
        assert_eq!(ethereum.max_batch_size(), 100);
        assert_eq!(ethereum.poll_interval(&config.defaults), Duration::from_millis(1000));
        assert_eq!(ethereum.genesis_height(config.network), Some(12_959_638));
        assert_eq!(ethereum.finality().unwrap(), FinalityConfig::Tag { tag: FinalityTag::Finalized });

        let arbitrum = &config.chains[1];
        assert_eq!(arbitrum.chain, Chain::Arbitrum);
        assert_eq!(arbitrum.max_batch_size(), 20);
        assert_eq!(arbitrum.poll_interval(&config.defaults), Duration::from_millis(250));
        assert!(matches!(arbitrum.finality().unwrap(), FinalityConfig::ArbitrumL1 { .. }));

        let algorand = &config.chains[2];
        assert_eq!(algorand.family().unwrap(), ChainFamily::Algorand);
        assert_eq!(algorand.genesis_height(Network::Testnet), Some(5));
    }

    #[test]
    fn missing_values_are_fatal() {
        let mut config = ChainConfig::new(Chain::Unknown(4242));
        assert!(matches!(config.family(), Err(AdapterError::FatalConfiguration(_))));
        assert!(matches!(config.contract(), Err(AdapterError::FatalConfiguration(_))));
        assert!(matches!(config.rpc(), Err(AdapterError::FatalConfiguration(_))));

        config.chain = Chain::Arbitrum;
        assert!(matches!(config.finality(), Err(AdapterError::FatalConfiguration(_))));
        config.chain = Chain::Bsc;
        assert_eq!(config.finality().unwrap(), FinalityConfig::Confirmations { depth: 15 });
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = WatcherConfig::from_toml_str("").unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.sink, SinkConfig::Memory);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(
            WatcherConfig::from_toml_str("[[chains]]\nchain = \"nowhere\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(WatcherConfig::from_file("/does/not/exist.toml"), Err(ConfigError::Io { .. })));
    }
}
