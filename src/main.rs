// src/main.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Address, Bytes};
use ethers::utils::{format_ether, format_units, parse_ether};
use tracing::{debug, info};

use soneium_sdk::aa::{create_public_client, create_smart_account};
use soneium_sdk::logger::{self, LogLevel};
use soneium_sdk::{ClientOptions, NetworkType, SdkConfig, SoneiumClient, TransactionRequest};

#[derive(Parser, Debug)]
#[clap(name = "soneium", author, version, about = "Soneium client: RPC reads, transfers and ERC-4337 smart accounts", long_about = None)]
struct Args {
    /// mainnet or testnet (minato)
    #[clap(short, long, global = true, default_value = "testnet")]
    network: NetworkType,

    /// Per-request timeout, defaults to SONEIUM_TIMEOUT_MS or 30000
    #[clap(long, global = true)]
    timeout_ms: Option<u64>,

    #[clap(long, global = true, default_value = "info")]
    log_level: LogLevel,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct KeyArgs {
    #[clap(short, long, env = "SONEIUM_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
}

#[derive(clap::Args, Debug)]
struct TxArgs {
    #[clap(long)]
    to: Address,

    /// Amount in ether
    #[clap(long, default_value = "0")]
    value: String,

    /// Hex call data
    #[clap(long)]
    data: Option<Bytes>,
}

impl TxArgs {
    fn request(&self) -> anyhow::Result<TransactionRequest> {
        let value = parse_ether(&self.value)
            .with_context(|| format!("invalid --value '{}'", self.value))?;
        let mut tx = TransactionRequest::new(self.to).value(value);
        if let Some(data) = &self.data {
            tx = tx.data(data.clone());
        }
        Ok(tx)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the latest block number
    BlockNumber,
    /// Print the balance of an address
    Balance { address: Address },
    /// Print the buffered fee caps used for user operations
    GasPrices {
        #[clap(long)]
        buffer: Option<u64>,
    },
    /// Send a plain transaction from the key's address
    Send {
        #[clap(flatten)]
        tx: TxArgs,
        #[clap(flatten)]
        key: KeyArgs,
    },
    /// Build and print an unsigned user operation
    UserOp {
        #[clap(flatten)]
        tx: TxArgs,
        #[clap(flatten)]
        key: KeyArgs,
    },
    /// Send a transaction through the key's smart account
    AaSend {
        #[clap(flatten)]
        tx: TxArgs,
        #[clap(flatten)]
        key: KeyArgs,
        /// Ask the paymaster to cover gas
        #[clap(long)]
        sponsored: bool,
        #[clap(long, env = "SONEIUM_PAYMASTER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[clap(long)]
        gas_buffer: Option<u64>,
    },
    /// Print the counterfactual smart account address of a key
    SmartAccount {
        #[clap(flatten)]
        key: KeyArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let _log = logger::init(args.log_level)?;

    let mut config = SdkConfig::from_env()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.default_timeout = Duration::from_millis(timeout_ms);
    }
    debug!(timeout_ms = config.timeout_ms(), "configuration loaded");

    let mut client = SoneiumClient::with_config(args.network, config, ClientOptions::default())?;
    let chain = client.chain();
    info!("Using {} (chain {})", chain.name, chain.id);

    match args.command {
        Command::BlockNumber => {
            println!("{}", client.block_number().await?);
        }
        Command::Balance { address } => {
            let balance = client.balance(address).await?;
            println!("{} {}", format_ether(balance), chain.native_currency.symbol);
        }
        Command::GasPrices { buffer } => {
            let prices = client.current_gas_prices(buffer).await?;
            println!(
                "maxFeePerGas: {} gwei\nmaxPriorityFeePerGas: {} gwei",
                format_units(prices.max_fee_per_gas, "gwei")?,
                format_units(prices.max_priority_fee_per_gas, "gwei")?
            );
        }
        Command::Send { tx, key } => {
            let request = tx.request()?;
            client.connect_wallet(&key.private_key)?;
            let hash = client.send_transaction(&request).await?;
            println!("{:?}", hash);
            println!("{}", chain.tx_url(format!("{:?}", hash)));
        }
        Command::UserOp { tx, key } => {
            let request = tx.request()?;
            client.connect_wallet(&key.private_key)?;
            let user_op = client.create_user_operation(&request).await?;
            println!("{}", serde_json::to_string_pretty(&user_op)?);
        }
        Command::AaSend {
            tx,
            key,
            sponsored,
            api_key,
            gas_buffer,
        } => {
            let request = tx.request()?;
            let hash = if sponsored {
                client
                    .send_sponsored_transaction(
                        &request,
                        api_key.as_deref().unwrap_or_default(),
                        Some(&key.private_key),
                        gas_buffer,
                    )
                    .await?
            } else {
                client
                    .send_aa_transaction(&request, Some(&key.private_key), gas_buffer)
                    .await?
            };
            println!("{:?}", hash);
        }
        Command::SmartAccount { key } => {
            let public_client = Arc::new(create_public_client(
                args.network,
                client.config(),
                client.timeout(),
            )?);
            let account =
                create_smart_account(public_client, &key.private_key, chain.id, client.config())
                    .await?;
            println!("owner:    {:?}", account.owner());
            println!("account:  {:?}", account.address());
            println!("deployed: {}", account.is_deployed().await?);
            println!("{}", chain.address_url(format!("{:?}", account.address())));
        }
    }

    Ok(())
}
