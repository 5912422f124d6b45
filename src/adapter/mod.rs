//! Chain adapters: one per chain family, all answering the same two questions.
//!
//! An adapter knows how to ask a chain for its finalized height and how to list the core
//! messages published in an inclusive height range. Everything else (cursors, retries across
//! cycles, batching) belongs to the watcher that drives it.
//!
//! A [`ChainAdapter::get_messages_for_range`] result may cover less than the requested range:
//! event-sequence chains can return fewer events than asked for, and block chains skip heights
//! that produced no block. The watcher resumes after the last returned key, or after `to` when
//! the result is empty.

use alloy::primitives::Address;

use crate::{
    chain::{Chain, ChainFamily},
    config::{ChainConfig, Defaults, FinalityConfig},
    error::AdapterError,
    robust_provider::{RobustHttpClient, RobustHttpClientBuilder, RobustProvider, RobustProviderBuilder},
    types::VaasByBlock,
};

pub mod algorand;
pub mod aptos;
pub mod cosmwasm;
pub mod evm;
pub mod near;
pub mod rollup;
pub mod solana;

pub use algorand::AlgorandAdapter;
pub use aptos::AptosAdapter;
pub use cosmwasm::CosmwasmAdapter;
pub use evm::{EvmAdapter, EvmFinality, FinalityTag};
pub use near::NearAdapter;
pub use rollup::{ArbitrumFinality, PolygonRootChain};
pub use solana::SolanaAdapter;

/// Read-only view of one chain.
pub trait ChainAdapter: Send + Sync {
    /// The highest height this adapter considers final, or `None` when nothing is final yet.
    fn get_finalized_height(&self) -> impl Future<Output = Result<Option<u64>, AdapterError>> + Send;

    /// All core messages published in `from..=to`, grouped by block.
    fn get_messages_for_range(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<VaasByBlock, AdapterError>> + Send;
}

impl<A: ChainAdapter> ChainAdapter for std::sync::Arc<A> {
    fn get_finalized_height(&self) -> impl Future<Output = Result<Option<u64>, AdapterError>> + Send {
        (**self).get_finalized_height()
    }

    fn get_messages_for_range(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<VaasByBlock, AdapterError>> + Send {
        (**self).get_messages_for_range(from, to)
    }
}

/// Any adapter this crate ships, selected from configuration.
#[derive(Debug)]
pub enum AnyAdapter {
    Evm(EvmAdapter),
    Solana(SolanaAdapter),
    Algorand(AlgorandAdapter),
    Aptos(AptosAdapter),
    Cosmwasm(CosmwasmAdapter),
    Near(NearAdapter),
}

impl AnyAdapter {
    /// Builds the adapter for one configured chain.
    ///
    /// # Errors
    ///
    /// [`AdapterError::FatalConfiguration`] for missing or malformed settings; a transient error
    /// if an EVM endpoint cannot be reached while connecting.
    pub async fn connect(config: &ChainConfig, defaults: &Defaults) -> Result<Self, AdapterError> {
        let family = config.family()?;
        let chain = config.chain;
        info!(chain = %chain, family = ?family, "Connecting chain adapter");
        let adapter = match family {
            ChainFamily::Evm => AnyAdapter::Evm(connect_evm(config, defaults).await?),
            ChainFamily::Solana => {
                let client = http_client(&config.rpc()?, config, defaults)?;
                AnyAdapter::Solana(SolanaAdapter::new(chain, client, config.contract()?)?)
            }
            ChainFamily::Algorand => {
                let indexer = config
                    .indexer
                    .as_deref()
                    .ok_or_else(|| AdapterError::fatal(format!("{chain} needs an indexer endpoint")))?;
                let app_id = config
                    .contract()?
                    .parse::<u64>()
                    .map_err(|_| AdapterError::fatal(format!("{chain} contract must be an application id")))?;
                AnyAdapter::Algorand(AlgorandAdapter::new(
                    chain,
                    http_client(&config.rpc()?, config, defaults)?,
                    http_client(indexer, config, defaults)?,
                    app_id,
                ))
            }
            ChainFamily::Aptos => {
                let mut adapter =
                    AptosAdapter::new(chain, http_client(&config.rpc()?, config, defaults)?, config.contract()?);
                if let Some(handle) = &config.event_handle {
                    adapter = adapter.event_handle(handle.clone());
                }
                AnyAdapter::Aptos(adapter)
            }
            ChainFamily::Cosmwasm => AnyAdapter::Cosmwasm(CosmwasmAdapter::new(
                chain,
                http_client(&config.rpc()?, config, defaults)?,
                config.contract()?,
            )),
            ChainFamily::Near => AnyAdapter::Near(NearAdapter::new(
                chain,
                http_client(&config.rpc()?, config, defaults)?,
                config.contract()?,
            )),
        };
        Ok(adapter)
    }
}

impl ChainAdapter for AnyAdapter {
    async fn get_finalized_height(&self) -> Result<Option<u64>, AdapterError> {
        match self {
            AnyAdapter::Evm(adapter) => adapter.get_finalized_height().await,
            AnyAdapter::Solana(adapter) => adapter.get_finalized_height().await,
            AnyAdapter::Algorand(adapter) => adapter.get_finalized_height().await,
            AnyAdapter::Aptos(adapter) => adapter.get_finalized_height().await,
            AnyAdapter::Cosmwasm(adapter) => adapter.get_finalized_height().await,
            AnyAdapter::Near(adapter) => adapter.get_finalized_height().await,
        }
    }

    async fn get_messages_for_range(&self, from: u64, to: u64) -> Result<VaasByBlock, AdapterError> {
        match self {
            AnyAdapter::Evm(adapter) => adapter.get_messages_for_range(from, to).await,
            AnyAdapter::Solana(adapter) => adapter.get_messages_for_range(from, to).await,
            AnyAdapter::Algorand(adapter) => adapter.get_messages_for_range(from, to).await,
            AnyAdapter::Aptos(adapter) => adapter.get_messages_for_range(from, to).await,
            AnyAdapter::Cosmwasm(adapter) => adapter.get_messages_for_range(from, to).await,
            AnyAdapter::Near(adapter) => adapter.get_messages_for_range(from, to).await,
        }
    }
}

async fn connect_evm(config: &ChainConfig, defaults: &Defaults) -> Result<EvmAdapter, AdapterError> {
    let chain = config.chain;
    let contract = parse_address(chain, config.contract()?)?;
    let provider = robust_provider(config.rpc()?, &config.fallback_rpcs, defaults).await?;
    let finality = match config.finality()? {
        FinalityConfig::Tag { tag } => EvmFinality::Tag(tag),
        FinalityConfig::Confirmations { depth } => EvmFinality::Confirmations(depth),
        FinalityConfig::PolygonRootChain { l1_rpc, root_chain } => {
            let l1 = robust_provider(l1_rpc, &[], defaults).await?;
            EvmFinality::PolygonRootChain(PolygonRootChain::new(l1, parse_address(chain, &root_chain)?))
        }
        FinalityConfig::ArbitrumL1 { l1_rpc } => {
            EvmFinality::ArbitrumL1(ArbitrumFinality::new(robust_provider(l1_rpc, &[], defaults).await?))
        }
    };
    Ok(EvmAdapter::new(chain, provider, contract, finality)
        .max_concurrent_fetches(config.max_concurrent_requests(defaults)))
}

async fn robust_provider(
    rpc: String,
    fallbacks: &[String],
    defaults: &Defaults,
) -> Result<RobustProvider, AdapterError> {
    let mut builder = RobustProviderBuilder::new(rpc)
        .call_timeout(defaults.call_timeout())
        .max_retries(defaults.max_retries)
        .min_delay(defaults.min_delay());
    for fallback in fallbacks {
        builder = builder.fallback(fallback.clone());
    }
    Ok(builder.build().await?)
}

fn http_client(endpoint: &str, config: &ChainConfig, defaults: &Defaults) -> Result<RobustHttpClient, AdapterError> {
    let mut builder = RobustHttpClientBuilder::new(endpoint)
        .call_timeout(defaults.call_timeout())
        .max_retries(defaults.max_retries)
        .min_delay(defaults.min_delay())
        .max_concurrent_requests(config.max_concurrent_requests(defaults))
        .min_call_interval(config.min_call_interval(defaults));
    for fallback in &config.fallback_rpcs {
        builder = builder.fallback(fallback.clone());
    }
    builder.build().map_err(|e| AdapterError::fatal(format!("{}: {e}", config.chain)))
}

/// Nodes that quote their integers: accepts `"42"` as well as `42`.
pub(crate) fn quoted_u64<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Quoted {
        Number(u64),
        Text(String),
    }
    match <Quoted as serde::Deserialize>::deserialize(deserializer)? {
        Quoted::Number(value) => Ok(value),
        Quoted::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

fn parse_address(chain: Chain, raw: &str) -> Result<Address, AdapterError> {
    raw.parse::<Address>().map_err(|_| AdapterError::fatal(format!("{chain}: invalid address {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_integers() {
        #[derive(serde::Deserialize)]
        struct Height {
            #[serde(deserialize_with = "quoted_u64")]
            height: u64,
        }
        let quoted: Height = serde_json::from_str(r#"{"height":"17"}"#).unwrap();
        let bare: Height = serde_json::from_str(r#"{"height":17}"#).unwrap();
        assert_eq!((quoted.height, bare.height), (17, 17));
        assert!(serde_json::from_str::<Height>(r#"{"height":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn connect_reports_missing_settings_as_fatal() -> anyhow::Result<()> {
        let defaults = Defaults::default();

        let mut config = ChainConfig::new(Chain::Algorand);
        config.rpc = Some("https://algod.example".into());
        config.contract = Some("842125965".into());
        assert!(matches!(
            AnyAdapter::connect(&config, &defaults).await,
            Err(AdapterError::FatalConfiguration(_))
        ));

        let mut config = ChainConfig::new(Chain::Ethereum);
        config.rpc = Some("https://eth.example".into());
        config.contract = Some("not-an-address".into());
        assert!(matches!(
            AnyAdapter::connect(&config, &defaults).await,
            Err(AdapterError::FatalConfiguration(_))
        ));

        let config = ChainConfig::new(Chain::Sui);
        assert!(matches!(
            AnyAdapter::connect(&config, &defaults).await,
            Err(AdapterError::FatalConfiguration(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn connect_builds_http_adapters() -> anyhow::Result<()> {
        let defaults = Defaults::default();
        let mut config = ChainConfig::new(Chain::Aptos);
        config.rpc = Some("https://fullnode.example/v1".into());
        config.contract = Some("0x5bc11445584a763c1fa7ed39081f1b920954da14e04b32440cba863d03e19625".into());
        assert!(matches!(AnyAdapter::connect(&config, &defaults).await?, AnyAdapter::Aptos(_)));

        let mut config = ChainConfig::new(Chain::Wormchain);
        config.rpc = Some("https://tendermint.example".into());
        config.contract = Some("wormhole1ufs3tlq4umljk0qfe8k5ya0x6hpavn897u2cnf9k0en9jr7qarqqaqfk2j".into());
        assert!(matches!(AnyAdapter::connect(&config, &defaults).await?, AnyAdapter::Cosmwasm(_)));
        Ok(())
    }

    #[tokio::test]
    async fn evm_fetches_stay_under_the_configured_ceiling() -> anyhow::Result<()> {
        let mut defaults = Defaults::default();
        let mut config = ChainConfig::new(Chain::Ethereum);
        config.rpc = Some("http://127.0.0.1:8545".into());
        config.contract = Some("0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B".into());

        config.max_concurrent_requests = Some(2);
        let AnyAdapter::Evm(adapter) = AnyAdapter::connect(&config, &defaults).await? else {
            anyhow::bail!("expected an EVM adapter");
        };
        assert_eq!(adapter.fetch_concurrency(), 2);

        config.max_concurrent_requests = None;
        defaults.max_concurrent_requests = 5;
        let AnyAdapter::Evm(adapter) = AnyAdapter::connect(&config, &defaults).await? else {
            anyhow::bail!("expected an EVM adapter");
        };
        assert_eq!(adapter.fetch_concurrency(), 5);
        Ok(())
    }
}
