// src/lib.rs
//! Client SDK for the Soneium chain: JSON-RPC reads and writes, gas
//! estimation and ERC-4337 smart account flows with bundler submission and
//! paymaster sponsorship.

pub mod aa;
pub mod account;
pub mod bundler;
pub mod chains;
pub mod client;
pub mod config;
pub mod error;
pub mod gas;
pub mod logger;
pub mod paymaster;
pub mod types;

pub use aa::{create_aa_client, AaClient, AaClientOptions, SmartAccountClient};
pub use client::{ClientOptions, SoneiumClient};
pub use config::{NetworkType, SdkConfig};
pub use error::{ErrorKind, Result, SoneiumError};
pub use logger::{LogHandle, LogLevel};
pub use types::{SponsorType, TransactionRequest, UserOperation, UserOperationHash};
