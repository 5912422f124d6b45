//! Protocol chain identifiers and their per-chain defaults.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

macro_rules! chains {
    ($($variant:ident = $id:literal => $name:literal),* $(,)?) => {
        /// A protocol chain id.
        ///
        /// Ids are stable for the protocol's lifetime. Ids this crate has no name for are kept
        /// verbatim in [`Chain::Unknown`] so they still round-trip through storage.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Chain {
            $($variant,)*
            Unknown(u16),
        }

        impl From<u16> for Chain {
            fn from(id: u16) -> Self {
                match id {
                    $($id => Chain::$variant,)*
                    other => Chain::Unknown(other),
                }
            }
        }

        impl From<Chain> for u16 {
            fn from(chain: Chain) -> u16 {
                match chain {
                    $(Chain::$variant => $id,)*
                    Chain::Unknown(id) => id,
                }
            }
        }

        impl Chain {
            /// Lowercase name used in configuration files and logs.
            #[must_use]
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Chain::$variant => Some($name),)*
                    Chain::Unknown(_) => None,
                }
            }

            fn from_name(name: &str) -> Option<Chain> {
                match name {
                    $($name => Some(Chain::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

chains! {
    Solana = 1 => "solana",
    Ethereum = 2 => "ethereum",
    Terra = 3 => "terra",
    Bsc = 4 => "bsc",
    Polygon = 5 => "polygon",
    Avalanche = 6 => "avalanche",
    Oasis = 7 => "oasis",
    Algorand = 8 => "algorand",
    Aurora = 9 => "aurora",
    Fantom = 10 => "fantom",
    Karura = 11 => "karura",
    Acala = 12 => "acala",
    Klaytn = 13 => "klaytn",
    Celo = 14 => "celo",
    Near = 15 => "near",
    Moonbeam = 16 => "moonbeam",
    Terra2 = 18 => "terra2",
    Injective = 19 => "injective",
    Sui = 21 => "sui",
    Aptos = 22 => "aptos",
    Arbitrum = 23 => "arbitrum",
    Optimism = 24 => "optimism",
    Xpla = 28 => "xpla",
    Base = 30 => "base",
    Sei = 32 => "sei",
    Wormchain = 3104 => "wormchain",
    Sepolia = 10002 => "sepolia",
    ArbitrumSepolia = 10003 => "arbitrum_sepolia",
    BaseSepolia = 10004 => "base_sepolia",
    OptimismSepolia = 10005 => "optimism_sepolia",
    Holesky = 10006 => "holesky",
    PolygonSepolia = 10007 => "polygon_sepolia",
}

/// The adapter family that knows how to observe a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Algorand,
    Aptos,
    Cosmwasm,
    Near,
}

impl Chain {
    /// The family a chain is watched with unless configuration says otherwise.
    #[must_use]
    pub fn default_family(self) -> Option<ChainFamily> {
        use Chain::*;
        match self {
            Solana => Some(ChainFamily::Solana),
            Algorand => Some(ChainFamily::Algorand),
            Aptos => Some(ChainFamily::Aptos),
            Near => Some(ChainFamily::Near),
            Terra | Terra2 | Injective | Xpla | Sei | Wormchain => Some(ChainFamily::Cosmwasm),
            Sui | Unknown(_) => None,
            _ => Some(ChainFamily::Evm),
        }
    }

    /// Default ceiling on the number of progress units requested per cycle.
    #[must_use]
    pub fn default_max_batch_size(self) -> u64 {
        match self {
            Chain::Acala | Chain::Karura => 50,
            Chain::Aptos => 25,
            Chain::Algorand => 10,
            Chain::Solana => 100_000,
            _ => 100,
        }
    }

    /// Height at or before the first core-contract message on mainnet.
    #[must_use]
    pub fn mainnet_deployment_height(self) -> Option<u64> {
        use Chain::*;
        let height = match self {
            Ethereum => 12_959_638,
            Terra => 4_810_000,
            Bsc => 9_745_450,
            Polygon => 20_629_146,
            Avalanche => 8_237_163,
            Oasis => 1_757,
            Algorand => 22_931_277,
            Fantom => 31_817_467,
            Karura => 1_824_665,
            Acala => 1_144_161,
            Klaytn => 90_563_824,
            Celo => 12_947_144,
            Moonbeam => 1_486_591,
            Terra2 => 399_813,
            Injective => 20_908_376,
            Arbitrum => 18_128_584,
            Optimism => 69_401_779,
            Aptos => 0,
            Near => 72_767_136,
            Xpla => 777_549,
            Solana => 94_396_403,
            Sui => 1_485_552,
            Base => 1_422_314,
            Sei => 238_594,
            Wormchain => 4_510_119,
            _ => return None,
        };
        Some(height)
    }

    /// Name of the environment variable that may carry this chain's RPC endpoint.
    #[must_use]
    pub fn rpc_env_var(self) -> String {
        match self.name() {
            Some(name) => format!("{}_RPC", name.to_ascii_uppercase()),
            None => format!("CHAIN_{}_RPC", u16::from(self)),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", u16::from(*self)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid chain: {0}")]
pub struct InvalidChainError(String);

impl FromStr for Chain {
    type Err = InvalidChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u16>() {
            return Ok(Chain::from(id));
        }
        Chain::from_name(&s.to_ascii_lowercase()).ok_or_else(|| InvalidChainError(s.to_owned()))
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16((*self).into())
    }
}

impl<'de> Deserialize<'de> for Chain {
    /// Accepts either the numeric id or the chain name.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(u16),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Id(id) => Ok(Chain::from(id)),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_for_every_u16() {
        for id in 0u16..=u16::MAX {
            assert_eq!(id, u16::from(Chain::from(id)));
        }
    }

    #[test]
    fn display_parses_back() {
        for id in [0u16, 1, 2, 23, 3104, 10_007, 65_535] {
            let chain = Chain::from(id);
            assert_eq!(chain, chain.to_string().parse().unwrap());
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!("Ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("arbitrum_sepolia".parse::<Chain>().unwrap(), Chain::ArbitrumSepolia);
        assert!("not-a-chain".parse::<Chain>().is_err());
    }

    #[test]
    fn deserializes_from_id_or_name() {
        #[derive(Deserialize)]
        struct Entry {
            chain: Chain,
        }
        let by_name: Entry = toml::from_str(r#"chain = "solana""#).unwrap();
        let by_id: Entry = toml::from_str("chain = 2").unwrap();
        assert_eq!(by_name.chain, Chain::Solana);
        assert_eq!(by_id.chain, Chain::Ethereum);
    }

    #[test]
    fn defaults() {
        assert_eq!(Chain::Karura.default_max_batch_size(), 50);
        assert_eq!(Chain::Ethereum.default_max_batch_size(), 100);
        assert_eq!(Chain::Wormchain.default_family(), Some(ChainFamily::Cosmwasm));
        assert_eq!(Chain::Arbitrum.default_family(), Some(ChainFamily::Evm));
        assert_eq!(Chain::Sui.default_family(), None);
        assert_eq!(Chain::Ethereum.mainnet_deployment_height(), Some(12_959_638));
        assert_eq!(Chain::Bsc.rpc_env_var(), "BSC_RPC");
        assert_eq!(Chain::Unknown(999).rpc_env_var(), "CHAIN_999_RPC");
    }
}
