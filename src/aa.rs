// src/aa.rs
//! Account abstraction composition: public client, smart account, gas and
//! paymaster middleware, bundler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_ether;
use tracing::{debug, error, info};
use url::Url;

use crate::account::{dummy_signature, parse_private_key, SimpleSmartAccount};
use crate::bundler::BundlerClient;
use crate::chains::{soneium_chain, Chain};
use crate::config::{NetworkType, SdkConfig};
use crate::error::{Result, SoneiumError};
use crate::gas::{
    current_gas_prices, estimate_user_operation_gas, GasEstimationOptions, GasEstimator,
    UserOperationGasInput,
};
use crate::paymaster::{PaymasterClient, PaymasterMiddleware, SponsorshipMiddleware};
use crate::types::{TransactionRequest, UserOperation, UserOperationHash};

/// Per-call overrides on top of [`SdkConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AaClientOptions {
    pub timeout: Option<Duration>,
    pub gas_buffer_percentage: Option<u64>,
}

impl AaClientOptions {
    fn timeout(&self, config: &SdkConfig) -> Duration {
        self.timeout.unwrap_or(config.default_timeout)
    }

    fn gas_options(&self, config: &SdkConfig) -> GasEstimationOptions {
        GasEstimationOptions::default().with_buffer_percentage(
            self.gas_buffer_percentage
                .unwrap_or(config.gas_buffer_percentage),
        )
    }
}

/// HTTP provider for `rpc_url`. With a `timeout`, every request is aborted
/// by the HTTP client once it elapses.
pub fn http_provider(rpc_url: &str, timeout: Option<Duration>) -> Result<Provider<Http>> {
    let url = Url::parse(rpc_url).map_err(|e| {
        SoneiumError::rpc(format!("Failed to create public client: invalid RPC URL: {e}"))
            .at_url(rpc_url)
    })?;
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let http = builder
        .build()
        .map_err(|e| SoneiumError::rpc(format!("Failed to create public client: {e}")))?;
    Ok(Provider::new(Http::new_with_client(url, http)))
}

pub fn create_public_client(
    network: NetworkType,
    config: &SdkConfig,
    timeout: Duration,
) -> Result<Provider<Http>> {
    debug!(%network, "creating public client");
    http_provider(&config.network(network).rpc_url, Some(timeout)).map_err(|e| {
        error!("failed to create public client: {}", e);
        e
    })
}

pub fn create_bundler_client(
    network: NetworkType,
    config: &SdkConfig,
    timeout: Duration,
) -> BundlerClient {
    debug!(%network, "creating bundler client");
    let aa = &config.account_abstraction;
    BundlerClient::new(aa.bundler_url.clone(), aa.entry_point, timeout)
}

pub async fn create_smart_account<M: Middleware + 'static>(
    client: Arc<M>,
    private_key: &str,
    chain_id: u64,
    config: &SdkConfig,
) -> Result<SimpleSmartAccount<M>> {
    debug!("creating smart account");
    let aa = &config.account_abstraction;

    let run = async {
        let owner = parse_private_key(private_key, chain_id)?;
        SimpleSmartAccount::new(client, owner, aa.factory, aa.entry_point).await
    };

    run.await.map_err(|e| {
        error!("failed to create smart account: {}", e);
        e.into_account_abstraction("Failed to create smart account")
    })
}

/// Sponsorship hooks; `api_key` falls back to the configured key.
pub fn create_sponsorship_middleware(
    api_key: Option<&str>,
    config: &SdkConfig,
    timeout: Duration,
) -> Result<SponsorshipMiddleware> {
    let aa = &config.account_abstraction;
    let api_key = api_key
        .map(str::to_string)
        .or_else(|| aa.paymaster_api_key.clone());

    debug!("creating sponsorship middleware");
    let client = PaymasterClient::new(aa.paymaster_url.clone(), api_key, timeout)?;
    Ok(SponsorshipMiddleware::new(client))
}

/// Middleware applied to every user operation before it is signed.
pub struct AaMiddleware<M> {
    pub gas_estimator: GasEstimator<M>,
    pub sponsorship: Option<Arc<dyn PaymasterMiddleware>>,
}

impl<M> AaMiddleware<M> {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec!["gasEstimator"];
        if self.sponsorship.is_some() {
            names.push("sponsorship");
        }
        names
    }
}

impl<M: fmt::Debug> fmt::Debug for AaMiddleware<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AaMiddleware")
            .field("gas_estimator", &self.gas_estimator)
            .field("sponsorship", &self.sponsorship)
            .finish()
    }
}

/// Send-capable client bound to one smart account.
#[derive(Debug)]
pub struct SmartAccountClient<M> {
    account: SimpleSmartAccount<M>,
    chain: Chain,
    bundler: BundlerClient,
    middleware: AaMiddleware<M>,
}

impl<M: Middleware + 'static> SmartAccountClient<M> {
    pub fn new(
        account: SimpleSmartAccount<M>,
        chain: Chain,
        bundler: BundlerClient,
        middleware: AaMiddleware<M>,
    ) -> Self {
        Self {
            account,
            chain,
            bundler,
            middleware,
        }
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn account(&self) -> &SimpleSmartAccount<M> {
        &self.account
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn bundler(&self) -> &BundlerClient {
        &self.bundler
    }

    pub fn middleware(&self) -> &AaMiddleware<M> {
        &self.middleware
    }

    /// Builds, estimates and sponsors a user operation for `tx`. The
    /// signature field still holds a placeholder.
    pub async fn prepare_user_operation(&self, tx: &TransactionRequest) -> Result<UserOperation> {
        let nonce = self.account.nonce().await?;
        let init_code = self.account.init_code_if_needed().await?;
        let call_data = self.account.encode_execute(
            tx.to,
            tx.value.unwrap_or_default(),
            tx.data.clone().unwrap_or_default(),
        );

        let mut user_op = UserOperation {
            sender: self.account.address(),
            nonce,
            init_code,
            call_data,
            signature: dummy_signature(),
            ..Default::default()
        };

        if let Some(paymaster) = &self.middleware.sponsorship {
            user_op.paymaster_and_data = paymaster.dummy_paymaster_and_data(&user_op).await?;
        }

        let mut user_op = self.middleware.gas_estimator.estimate(user_op).await?;

        if let Some(paymaster) = &self.middleware.sponsorship {
            user_op.paymaster_and_data = paymaster.paymaster_and_data(&user_op).await?;
        }

        debug!(?user_op, "user operation prepared");
        Ok(user_op)
    }

    /// Signs `user_op` with the owner key and hands it to the bundler.
    pub async fn send_user_operation(&self, user_op: UserOperation) -> Result<UserOperationHash> {
        let signed = self.account.sign_user_operation(user_op).await?;
        self.bundler.send_user_operation(&signed).await
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<UserOperationHash> {
        let run = async {
            let user_op = self.prepare_user_operation(tx).await?;
            self.send_user_operation(user_op).await
        };

        run.await.map_err(|e| {
            error!("failed to send transaction: {}", e);
            e.into_account_abstraction("Failed to send transaction")
        })
    }
}

/// Everything [`create_aa_client`] builds.
#[derive(Debug)]
pub struct AaClient {
    pub smart_account_client: SmartAccountClient<Provider<Http>>,
    pub public_client: Arc<Provider<Http>>,
    pub address: Address,
}

/// Composes a smart account client: public client, smart account, gas
/// estimator, optional sponsorship, bundler. Sponsorship without an API key
/// fails before any request is made.
pub async fn create_aa_client(
    private_key: &str,
    network: NetworkType,
    with_sponsorship: bool,
    api_key: Option<&str>,
    options: &AaClientOptions,
    config: &SdkConfig,
) -> Result<AaClient> {
    info!(
        "creating AA client for {}{}",
        network,
        if with_sponsorship { " with sponsorship" } else { "" }
    );

    let timeout = options.timeout(config);
    let run = async {
        let sponsorship = if with_sponsorship {
            Some(create_sponsorship_middleware(api_key, config, timeout).map_err(|e| {
                error!("API key is required for sponsorship");
                e
            })?)
        } else {
            None
        };

        let public_client = Arc::new(create_public_client(network, config, timeout)?);
        let chain = soneium_chain(network, config);
        let account =
            create_smart_account(public_client.clone(), private_key, chain.id, config).await?;

        let middleware = AaMiddleware {
            gas_estimator: GasEstimator::new(
                public_client.clone(),
                config.account_abstraction.entry_point,
                options.gas_options(config),
            ),
            sponsorship: sponsorship.map(|s| Arc::new(s) as Arc<dyn PaymasterMiddleware>),
        };

        let address = account.address();
        debug!(
            ?address,
            with_sponsorship,
            middleware = ?middleware.names(),
            "creating smart account client"
        );

        let bundler = create_bundler_client(network, config, timeout);
        Ok::<_, SoneiumError>(AaClient {
            smart_account_client: SmartAccountClient::new(account, chain, bundler, middleware),
            public_client,
            address,
        })
    };

    run.await.map_err(|e| {
        error!("failed to create AA client: {}", e);
        e.into_account_abstraction("Failed to create AA client")
    })
}

/// Unsigned user operation for `call_data` sent from `sender`, with gas and
/// fees estimated against `client`. Nonce and init code are left for the
/// caller to set.
pub async fn build_unsigned_user_operation<M: Middleware>(
    client: &M,
    entry_point: Address,
    sender: Address,
    call_data: Bytes,
    options: &GasEstimationOptions,
) -> Result<UserOperation> {
    let input = UserOperationGasInput {
        sender,
        call_data: call_data.clone(),
        init_code: Bytes::new(),
    };
    let gas = estimate_user_operation_gas(client, entry_point, &input, options).await?;
    let prices = current_gas_prices(client, options).await?;

    Ok(UserOperation {
        sender,
        nonce: U256::zero(),
        call_data,
        ..Default::default()
    }
    .with_gas(gas)
    .with_gas_prices(prices))
}

fn parse_amount(amount: &str) -> Result<U256> {
    parse_ether(amount)
        .map_err(|e| SoneiumError::AccountAbstraction(format!("invalid amount '{amount}': {e}")))
}

/// Sends `amount` ether (decimal string) to `to` through the smart account.
pub async fn send_transaction<M: Middleware + 'static>(
    client: &SmartAccountClient<M>,
    to: Address,
    amount: &str,
) -> Result<UserOperationHash> {
    info!(?to, amount, "sending transaction");
    let value = parse_amount(amount)?;
    let hash = client
        .send_transaction(&TransactionRequest::new(to).value(value))
        .await?;
    info!(?hash, "transaction sent successfully");
    Ok(hash)
}

pub async fn send_sponsored_transaction(
    private_key: &str,
    to: Address,
    amount: &str,
    api_key: &str,
    network: NetworkType,
    options: &AaClientOptions,
    config: &SdkConfig,
) -> Result<UserOperationHash> {
    info!(?to, amount, %network, "sending sponsored transaction");

    let run = async {
        if api_key.trim().is_empty() {
            return Err(SoneiumError::paymaster(
                "API key is required for sponsored transactions",
                None,
            ));
        }
        let value = parse_amount(amount)?;
        let aa_client =
            create_aa_client(private_key, network, true, Some(api_key), options, config).await?;
        aa_client
            .smart_account_client
            .send_transaction(&TransactionRequest::new(to).value(value))
            .await
    };

    let hash = run.await.map_err(|e| {
        error!("failed to send sponsored transaction: {}", e);
        e.into_account_abstraction("Failed to send sponsored transaction")
    })?;
    info!(?hash, "sponsored transaction sent successfully");
    Ok(hash)
}
