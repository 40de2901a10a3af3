// src/client.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TxHash, U256};
use tracing::{debug, error, info};

use crate::aa::{build_unsigned_user_operation, create_aa_client, http_provider, AaClientOptions};
use crate::account::parse_private_key;
use crate::bundler::BundlerClient;
use crate::chains::{soneium_chain, Chain};
use crate::config::{NetworkType, SdkConfig};
use crate::error::{Result, SoneiumError};
use crate::gas::{self, call_request, GasEstimationOptions};
use crate::paymaster::PaymasterClient;
use crate::types::{
    GasPrices, PaymasterResponse, SponsorType, TransactionRequest, UserOperation,
    UserOperationHash,
};

/// JSON-RPC error code wallets use for a user-rejected request.
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Per-request timeout, [`SdkConfig::default_timeout`] when unset.
    pub timeout: Option<Duration>,
}

/// Read/write client for one Soneium network.
#[derive(Debug)]
pub struct SoneiumClient {
    network: NetworkType,
    config: SdkConfig,
    timeout: Duration,
    provider: Arc<Provider<Http>>,
    wallet: Option<LocalWallet>,
}

impl SoneiumClient {
    /// Client configured from the environment.
    pub fn new(network: NetworkType, options: ClientOptions) -> Result<Self> {
        Self::with_config(network, SdkConfig::from_env()?, options)
    }

    pub fn with_config(
        network: NetworkType,
        config: SdkConfig,
        options: ClientOptions,
    ) -> Result<Self> {
        info!("creating Soneium client for {}", network);
        let timeout = options.timeout.unwrap_or(config.default_timeout);
        let provider = Arc::new(Self::provider_for(network, &config)?);
        debug!("public client created successfully");

        Ok(Self {
            network,
            config,
            timeout,
            provider,
            wallet: None,
        })
    }

    // Requests are bounded by `timed` and `bounded`, not by the HTTP client.
    fn provider_for(network: NetworkType, config: &SdkConfig) -> Result<Provider<Http>> {
        http_provider(&config.network(network).rpc_url, None).map_err(|e| {
            error!("failed to create public client: {}", e);
            e
        })
    }

    pub fn network_type(&self) -> NetworkType {
        self.network
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn chain(&self) -> Chain {
        soneium_chain(self.network, &self.config)
    }

    pub fn rpc_url(&self) -> &str {
        &self.config.network(self.network).rpc_url
    }

    pub fn provider(&self) -> &Arc<Provider<Http>> {
        &self.provider
    }

    /// Address of the connected wallet, if any.
    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|wallet| wallet.address())
    }

    /// Binds a private key to this client and returns its address.
    pub fn connect_wallet(&mut self, private_key: &str) -> Result<Address> {
        info!("connecting wallet");
        let chain_id = self.config.network(self.network).chain_id;
        let wallet = parse_private_key(private_key, chain_id).map_err(|e| {
            error!("failed to connect wallet: {}", e);
            SoneiumError::Wallet(format!("Failed to connect wallet: {e}"))
        })?;

        let address = wallet.address();
        self.wallet = Some(wallet);
        info!(?address, "wallet connected successfully");
        Ok(address)
    }

    /// Points the provider and the connected wallet at `network`.
    pub fn switch_network(&mut self, network: NetworkType) -> Result<()> {
        info!("switching network from {} to {}", self.network, network);

        let provider = Self::provider_for(network, &self.config).map_err(|e| {
            error!("failed to switch network: {}", e);
            SoneiumError::rpc(format!("Failed to switch network: {e}"))
        })?;

        let chain_id = self.config.network(network).chain_id;
        self.provider = Arc::new(provider);
        self.wallet = self.wallet.take().map(|w| w.with_chain_id(chain_id));
        self.network = network;

        info!("network switched successfully");
        Ok(())
    }

    pub async fn block_number(&self) -> Result<u64> {
        debug!("getting block number");
        let block_number = self
            .timed(
                "eth_blockNumber",
                "Failed to get block number",
                self.provider.get_block_number(),
            )
            .await?
            .as_u64();
        debug!(block_number, "block number retrieved");
        Ok(block_number)
    }

    /// Balance of `address` in wei.
    pub async fn balance(&self, address: Address) -> Result<U256> {
        debug!(?address, "getting balance");
        let balance = self
            .timed(
                "eth_getBalance",
                format!("Failed to get balance for {address:?}"),
                self.provider.get_balance(address, None),
            )
            .await?;
        debug!(?address, %balance, "balance retrieved");
        Ok(balance)
    }

    /// Signs and sends `tx` from the connected wallet, estimating the gas
    /// limit when the request has none.
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        info!(to = ?tx.to, value = ?tx.value, "sending transaction");
        let wallet = self.wallet()?;

        let gas_limit = match tx.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                debug!("estimating gas for transaction");
                let request = call_request(wallet.address(), tx);
                let options = self.gas_options(None, None);
                self.bounded(
                    "eth_estimateGas",
                    gas::estimate_gas(self.provider.as_ref(), &request, &options),
                )
                .await?
            }
        };

        let mut request = call_request(wallet.address(), tx);
        request.set_gas(gas_limit);

        let signer = SignerMiddleware::new(self.provider.as_ref().clone(), wallet.clone());
        let pending = self
            .timed(
                "eth_sendRawTransaction",
                "Failed to send transaction",
                signer.send_transaction(request, None),
            )
            .await
            .map_err(|e| {
                error!("failed to send transaction: {}", e);
                rejected_by_user(e)
            })?;

        let tx_hash = pending.tx_hash();
        info!(?tx_hash, "transaction sent successfully");
        Ok(tx_hash)
    }

    /// Read-only `eth_call`.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        debug!(?to, %data, "making read-only call to contract");
        let request: TypedTransaction = Eip1559TransactionRequest::new().to(to).data(data).into();
        let result = self
            .timed(
                "eth_call",
                "Failed to make contract call",
                self.provider.call(&request, None),
            )
            .await?;
        debug!(%result, "call result received");
        Ok(result)
    }

    /// Unsigned user operation for `tx` with the connected wallet as sender.
    /// Nonce is zero and init code empty; gas and fees are estimated.
    pub async fn create_user_operation(&self, tx: &TransactionRequest) -> Result<UserOperation> {
        info!(to = ?tx.to, value = ?tx.value, "creating user operation");
        let sender = self.wallet()?.address();

        let options = self.gas_options(None, None);
        let user_op = self
            .bounded(
                "eth_estimateGas",
                build_unsigned_user_operation(
                    self.provider.as_ref(),
                    self.config.account_abstraction.entry_point,
                    sender,
                    tx.data.clone().unwrap_or_default(),
                    &options,
                ),
            )
            .await
            .map_err(|e| {
                error!("failed to create user operation: {}", e);
                match e {
                    SoneiumError::GasEstimation(_)
                    | SoneiumError::AccountAbstraction(_)
                    | SoneiumError::RpcTimeout { .. } => e,
                    other => SoneiumError::AccountAbstraction(format!(
                        "Failed to create user operation: {other}"
                    )),
                }
            })?;

        debug!(?user_op, "user operation created");
        Ok(user_op)
    }

    /// Asks the sponsor endpoint to sign `user_op`. The API key falls back
    /// to the configured one.
    pub async fn paymaster_signature(
        &self,
        user_op: &UserOperation,
        sponsor_type: SponsorType,
        api_key: Option<&str>,
    ) -> Result<PaymasterResponse> {
        let api_key = api_key
            .map(str::to_string)
            .or_else(|| self.config.account_abstraction.paymaster_api_key.clone());
        let client = PaymasterClient::new(
            self.config.account_abstraction.paymaster_url.clone(),
            api_key,
            self.timeout,
        )?;
        client.sponsor(user_op, sponsor_type).await
    }

    /// Submits an already signed user operation to the bundler.
    pub async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        api_key: Option<&str>,
    ) -> Result<UserOperationHash> {
        let aa = &self.config.account_abstraction;
        BundlerClient::new(aa.bundler_url.clone(), aa.entry_point, self.timeout)
            .with_api_key(api_key.map(str::to_string))
            .send_user_operation(user_op)
            .await
    }

    /// Sends `tx` through the smart account owned by `private_key`.
    pub async fn send_aa_transaction(
        &self,
        tx: &TransactionRequest,
        private_key: Option<&str>,
        gas_buffer_percentage: Option<u64>,
    ) -> Result<UserOperationHash> {
        info!(to = ?tx.to, value = ?tx.value, "sending AA transaction");
        let private_key = self.aa_private_key(private_key, "AA transactions")?;

        let options = AaClientOptions {
            timeout: Some(self.timeout),
            gas_buffer_percentage,
        };
        let run = async {
            let aa_client =
                create_aa_client(private_key, self.network, false, None, &options, &self.config)
                    .await?;
            aa_client.smart_account_client.send_transaction(tx).await
        };

        let hash = run.await.map_err(|e| {
            error!("failed to send AA transaction: {}", e);
            e.into_account_abstraction("Failed to send AA transaction")
        })?;
        info!(?hash, "AA transaction sent successfully");
        Ok(hash)
    }

    /// Like [`send_aa_transaction`](Self::send_aa_transaction) with gas
    /// sponsored by the paymaster.
    pub async fn send_sponsored_transaction(
        &self,
        tx: &TransactionRequest,
        api_key: &str,
        private_key: Option<&str>,
        gas_buffer_percentage: Option<u64>,
    ) -> Result<UserOperationHash> {
        info!(to = ?tx.to, value = ?tx.value, "sending sponsored transaction");

        if api_key.trim().is_empty() {
            error!("API key is required for sponsored transactions");
            return Err(SoneiumError::paymaster(
                "API key is required for sponsored transactions",
                None,
            ));
        }
        let private_key = self.aa_private_key(private_key, "sponsored transactions")?;

        let options = AaClientOptions {
            timeout: Some(self.timeout),
            gas_buffer_percentage,
        };
        let run = async {
            let aa_client = create_aa_client(
                private_key,
                self.network,
                true,
                Some(api_key),
                &options,
                &self.config,
            )
            .await?;
            aa_client.smart_account_client.send_transaction(tx).await
        };

        let hash = run.await.map_err(|e| {
            error!("failed to send sponsored transaction: {}", e);
            e.into_account_abstraction("Failed to send sponsored transaction")
        })?;
        info!(?hash, "sponsored transaction sent successfully");
        Ok(hash)
    }

    /// Buffered gas limit for `tx` sent from the connected wallet.
    pub async fn estimate_gas(
        &self,
        tx: &TransactionRequest,
        buffer_percentage: Option<u64>,
        max_gas_limit: Option<U256>,
    ) -> Result<U256> {
        debug!(to = ?tx.to, "estimating gas for transaction");
        let from = self.wallet()?.address();
        let request = call_request(from, tx);
        let options = self.gas_options(buffer_percentage, max_gas_limit);
        self.bounded(
            "eth_estimateGas",
            gas::estimate_gas(self.provider.as_ref(), &request, &options),
        )
        .await
    }

    pub async fn current_gas_prices(&self, buffer_percentage: Option<u64>) -> Result<GasPrices> {
        let options = self.gas_options(buffer_percentage, None);
        self.bounded(
            "eth_getBlockByNumber",
            gas::current_gas_prices(self.provider.as_ref(), &options),
        )
        .await
    }

    fn wallet(&self) -> Result<&LocalWallet> {
        self.wallet.as_ref().ok_or_else(|| {
            error!("wallet not connected");
            SoneiumError::Wallet("Wallet not connected. Call connect_wallet first.".to_string())
        })
    }

    // The connected wallet never hands its key back out, so AA flows take it
    // explicitly.
    fn aa_private_key<'a>(&self, private_key: Option<&'a str>, flow: &str) -> Result<&'a str> {
        match private_key {
            Some(key) => Ok(key),
            None if self.wallet.is_none() => {
                error!("no wallet connected and no private key provided");
                Err(SoneiumError::AccountAbstraction(
                    "Wallet not connected. Call connect_wallet first or provide a private key."
                        .to_string(),
                ))
            }
            None => {
                error!("private key must be provided for {}", flow);
                Err(SoneiumError::AccountAbstraction(format!(
                    "Private key must be provided for {flow} when using a connected wallet."
                )))
            }
        }
    }

    fn gas_options(
        &self,
        buffer_percentage: Option<u64>,
        max_gas_limit: Option<U256>,
    ) -> GasEstimationOptions {
        let mut options = GasEstimationOptions::default().with_buffer_percentage(
            buffer_percentage.unwrap_or(self.config.gas_buffer_percentage),
        );
        if let Some(max_gas_limit) = max_gas_limit {
            options = options.with_max_gas_limit(max_gas_limit);
        }
        options
    }

    /// Runs a provider call under the client timeout.
    async fn timed<T, E, F>(
        &self,
        method: &str,
        context: impl std::fmt::Display,
        request: F,
    ) -> Result<T>
    where
        E: MiddlewareError,
        F: Future<Output = std::result::Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(method, "{}: {}", context, e);
                Err(SoneiumError::from_middleware(context, method, e).at_url(self.rpc_url()))
            }
            Err(_) => Err(self.timed_out(method)),
        }
    }

    /// Runs an already typed operation, possibly several requests, under
    /// the client timeout.
    async fn bounded<T, F>(&self, method: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .unwrap_or_else(|_| Err(self.timed_out(method)))
    }

    fn timed_out(&self, method: &str) -> SoneiumError {
        error!(method, url = %self.rpc_url(), "request timed out");
        SoneiumError::timeout(self.rpc_url(), self.timeout.as_millis() as u64)
    }
}

fn rejected_by_user(err: SoneiumError) -> SoneiumError {
    match err {
        SoneiumError::Rpc {
            code: Some(USER_REJECTED_CODE),
            message,
            ..
        } => SoneiumError::TransactionRejected {
            message: "Transaction rejected by user".to_string(),
            reason: Some(message),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn client() -> SoneiumClient {
        SoneiumClient::with_config(
            NetworkType::Testnet,
            SdkConfig::default(),
            ClientOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let client = client();
        assert_eq!(client.network_type(), NetworkType::Testnet);
        assert_eq!(client.timeout(), Duration::from_millis(30_000));
        assert_eq!(client.chain().id, 1946);
        assert!(client.wallet_address().is_none());
    }

    #[test]
    fn test_connect_wallet() {
        let mut client = client();
        let address = client.connect_wallet(OWNER_KEY).unwrap();
        assert_eq!(
            address,
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
        assert_eq!(client.wallet_address(), Some(address));

        let err = client.connect_wallet("not-a-key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wallet);
        assert_eq!(client.wallet_address(), Some(address));
    }

    #[test]
    fn test_switch_network_rebinds_wallet_chain() {
        let mut client = client();
        client.connect_wallet(OWNER_KEY).unwrap();
        client.switch_network(NetworkType::Mainnet).unwrap();

        assert_eq!(client.network_type(), NetworkType::Mainnet);
        assert_eq!(client.chain().id, 2852);
        assert_eq!(client.wallet.as_ref().unwrap().chain_id(), 2852);
        assert_eq!(client.rpc_url(), client.config().mainnet.rpc_url);
    }

    #[tokio::test]
    async fn test_wallet_required() {
        let client = client();
        let tx = TransactionRequest::new(Address::repeat_byte(1));

        let err = client.send_transaction(&tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wallet);
        let err = client.estimate_gas(&tx, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wallet);
        let err = client.create_user_operation(&tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wallet);
    }

    #[tokio::test]
    async fn test_aa_transaction_needs_private_key() {
        let mut client = client();
        let tx = TransactionRequest::new(Address::repeat_byte(1));

        let err = client.send_aa_transaction(&tx, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccountAbstraction);
        assert!(err.to_string().contains("Wallet not connected"));

        client.connect_wallet(OWNER_KEY).unwrap();
        let err = client.send_aa_transaction(&tx, None, None).await.unwrap_err();
        assert!(err.to_string().contains("Private key must be provided"));
    }

    #[tokio::test]
    async fn test_sponsored_transaction_needs_api_key() {
        let client = client();
        let tx = TransactionRequest::new(Address::repeat_byte(1));
        let err = client
            .send_sponsored_transaction(&tx, "", Some(OWNER_KEY), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Paymaster);
    }

    #[test]
    fn test_user_rejection_mapping() {
        let err = rejected_by_user(SoneiumError::Rpc {
            message: "user denied".to_string(),
            code: Some(4001),
            data: None,
            url: None,
            method: None,
        });
        assert_eq!(err.kind(), ErrorKind::TransactionRejected);

        let err = rejected_by_user(SoneiumError::rpc("nonce too low"));
        assert_eq!(err.kind(), ErrorKind::Rpc);
    }

    #[test]
    fn test_gas_options_override() {
        let client = client();
        let options = client.gas_options(Some(50), Some(U256::from(1_000)));
        assert_eq!(options.buffer_percentage, 50);
        assert_eq!(options.max_gas_limit, U256::from(1_000));
        assert_eq!(client.gas_options(None, None).buffer_percentage, 20);
    }
}
