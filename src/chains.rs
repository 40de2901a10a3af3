// src/chains.rs
use serde::{Deserialize, Serialize};

use crate::config::{NetworkType, SdkConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExplorer {
    pub name: String,
    pub url: String,
}

/// Chain definition handed to providers and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: u64,
    pub name: String,
    pub native_currency: NativeCurrency,
    pub rpc_url: String,
    pub explorer: BlockExplorer,
}

impl Chain {
    pub fn tx_url(&self, hash: impl std::fmt::Display) -> String {
        format!("{}/tx/{}", self.explorer.url.trim_end_matches('/'), hash)
    }

    pub fn address_url(&self, address: impl std::fmt::Display) -> String {
        format!("{}/address/{}", self.explorer.url.trim_end_matches('/'), address)
    }
}

pub fn soneium_chain(network: NetworkType, config: &SdkConfig) -> Chain {
    let network_config = config.network(network);
    Chain {
        id: network_config.chain_id,
        name: network_config.name.clone(),
        native_currency: NativeCurrency {
            name: "Soneium".to_string(),
            symbol: "SON".to_string(),
            decimals: 18,
        },
        rpc_url: network_config.rpc_url.clone(),
        explorer: BlockExplorer {
            name: "Soneium Explorer".to_string(),
            url: network_config.explorer_url.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_from_config() {
        let config = SdkConfig::default();
        let mainnet = soneium_chain(NetworkType::Mainnet, &config);
        let testnet = soneium_chain(NetworkType::Testnet, &config);
        assert_eq!(mainnet.id, 2852);
        assert_eq!(testnet.id, 1946);
        assert_eq!(testnet.rpc_url, config.testnet.rpc_url);
        assert_eq!(testnet.native_currency.decimals, 18);
    }

    #[test]
    fn test_explorer_links() {
        let chain = soneium_chain(NetworkType::Testnet, &SdkConfig::default());
        assert_eq!(
            chain.tx_url("0xabc"),
            "https://explorer.minato.soneium.org/tx/0xabc"
        );
        assert_eq!(
            chain.address_url("0x01"),
            "https://explorer.minato.soneium.org/address/0x01"
        );
    }
}
