// src/config.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SoneiumError};

/// Timeout applied to every RPC, bundler and paymaster request.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Percentage added on top of raw gas and fee estimates.
pub const DEFAULT_GAS_BUFFER_PERCENTAGE: u64 = 20;

/// Canonical ERC-4337 EntryPoint (v0.6) deployment.
pub const ENTRY_POINT_ADDRESS: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

pub const SIMPLE_ACCOUNT_FACTORY_ADDRESS: &str = "0x9406Cc6185a346906296840746125a0E44976454";

const MAINNET_RPC_URL: &str = "https://soneium.rpc.scs.startale.com";
const TESTNET_RPC_URL: &str = "https://soneium-minato.rpc.scs.startale.com";
const BUNDLER_URL: &str = "https://bundler.scs.startale.com/rpc";
const PAYMASTER_URL: &str = "https://paymaster.scs.startale.com/api/sponsor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    #[default]
    Testnet,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = SoneiumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" | "minato" => Ok(NetworkType::Testnet),
            other => Err(SoneiumError::Config(format!(
                "unknown network '{other}', expected 'mainnet' or 'testnet'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAbstractionConfig {
    pub bundler_url: String,
    pub paymaster_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub paymaster_api_key: Option<String>,
}

/// Static SDK configuration, resolved once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    pub mainnet: NetworkConfig,
    pub testnet: NetworkConfig,
    pub default_timeout: Duration,
    pub gas_buffer_percentage: u64,
    pub account_abstraction: AccountAbstractionConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None).expect("built-in configuration is valid")
    }
}

impl SdkConfig {
    /// Reads the configuration from the process environment, falling back to
    /// built-in defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let default_timeout = match lookup("SONEIUM_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                SoneiumError::Config(format!("SONEIUM_TIMEOUT_MS is not a number: {raw}"))
            })?),
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        let gas_buffer_percentage = match lookup("SONEIUM_GAS_BUFFER_PERCENTAGE") {
            Some(raw) => raw.parse().map_err(|_| {
                SoneiumError::Config(format!(
                    "SONEIUM_GAS_BUFFER_PERCENTAGE is not a number: {raw}"
                ))
            })?,
            None => DEFAULT_GAS_BUFFER_PERCENTAGE,
        };

        Ok(Self {
            mainnet: NetworkConfig {
                name: "Soneium Mainnet".to_string(),
                chain_id: 2852,
                rpc_url: var("SONEIUM_MAIN_HTTPS", MAINNET_RPC_URL),
                explorer_url: "https://explorer.soneium.org".to_string(),
            },
            testnet: NetworkConfig {
                name: "Soneium Minato".to_string(),
                chain_id: 1946,
                rpc_url: var("SONEIUM_TEST_HTTPS", TESTNET_RPC_URL),
                explorer_url: "https://explorer.minato.soneium.org".to_string(),
            },
            default_timeout,
            gas_buffer_percentage,
            account_abstraction: AccountAbstractionConfig {
                bundler_url: var("SONEIUM_BUNDLER_URL", BUNDLER_URL),
                paymaster_url: var("SONEIUM_PAYMASTER_URL", PAYMASTER_URL),
                entry_point: parse_address(
                    "SONEIUM_ENTRY_POINT",
                    &var("SONEIUM_ENTRY_POINT", ENTRY_POINT_ADDRESS),
                )?,
                factory: parse_address(
                    "SONEIUM_SIMPLE_ACCOUNT_FACTORY",
                    &var("SONEIUM_SIMPLE_ACCOUNT_FACTORY", SIMPLE_ACCOUNT_FACTORY_ADDRESS),
                )?,
                paymaster_api_key: lookup("SONEIUM_PAYMASTER_API_KEY"),
            },
        })
    }

    pub fn network(&self, network: NetworkType) -> &NetworkConfig {
        match network {
            NetworkType::Mainnet => &self.mainnet,
            NetworkType::Testnet => &self.testnet,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.default_timeout.as_millis() as u64
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| SoneiumError::Config(format!("{key} is not a valid address ({raw}): {e}")))
}
