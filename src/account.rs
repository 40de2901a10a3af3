// src/account.rs
use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::providers::Middleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use tracing::debug;

use crate::error::{Result, SoneiumError};
use crate::types::UserOperation;

abigen!(
    SimpleAccountFactory,
    r#"[
        function createAccount(address owner, uint256 salt) returns (address)
        function getAddress(address owner, uint256 salt) view returns (address)
    ]"#
);

abigen!(
    SimpleAccount,
    r#"[
        function execute(address dest, uint256 value, bytes func)
    ]"#
);

abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) view returns (uint256)
    ]"#
);

/// Salt passed to the factory; one smart account per owner.
pub const ACCOUNT_SALT: u64 = 0;

/// Signature of the right length used while gas is estimated.
pub const DUMMY_SIGNATURE: &str = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c";

/// Parses a hex private key (with or without `0x`) bound to `chain_id`.
pub fn parse_private_key(private_key: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet = private_key
        .trim()
        .parse::<LocalWallet>()
        .map_err(|e| SoneiumError::Wallet(format!("invalid private key: {e}")))?;
    Ok(wallet.with_chain_id(chain_id))
}

pub fn dummy_signature() -> Bytes {
    DUMMY_SIGNATURE.parse().unwrap_or_default()
}

/// SimpleAccount smart account owned by a local key.
#[derive(Debug, Clone)]
pub struct SimpleSmartAccount<M> {
    client: Arc<M>,
    owner: LocalWallet,
    address: Address,
    factory: Address,
    entry_point: Address,
}

impl<M: Middleware + 'static> SimpleSmartAccount<M> {
    /// Resolves the counterfactual account address through the factory.
    pub async fn new(
        client: Arc<M>,
        owner: LocalWallet,
        factory: Address,
        entry_point: Address,
    ) -> Result<Self> {
        let address = SimpleAccountFactory::new(factory, client.clone())
            .get_address(owner.address(), U256::from(ACCOUNT_SALT))
            .call()
            .await
            .map_err(|e| {
                SoneiumError::AccountAbstraction(format!("Failed to create smart account: {e}"))
            })?;
        debug!(?address, owner = ?owner.address(), "smart account created");

        Ok(Self::from_parts(client, owner, address, factory, entry_point))
    }

    pub fn from_parts(
        client: Arc<M>,
        owner: LocalWallet,
        address: Address,
        factory: Address,
        entry_point: Address,
    ) -> Self {
        Self {
            client,
            owner,
            address,
            factory,
            entry_point,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner.address()
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn chain_id(&self) -> u64 {
        self.owner.chain_id()
    }

    pub fn client(&self) -> &Arc<M> {
        &self.client
    }

    /// `factory ++ createAccount(owner, salt)`
    pub fn init_code(&self) -> Bytes {
        let call = CreateAccountCall {
            owner: self.owner.address(),
            salt: U256::from(ACCOUNT_SALT),
        };
        let mut code = self.factory.as_bytes().to_vec();
        code.extend(call.encode());
        code.into()
    }

    pub fn encode_execute(&self, to: Address, value: U256, data: Bytes) -> Bytes {
        ExecuteCall {
            dest: to,
            value,
            func: data,
        }
        .encode()
        .into()
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        let code = self
            .client
            .get_code(self.address, None)
            .await
            .map_err(|e| SoneiumError::from_middleware("Failed to get account code", "eth_getCode", e))?;
        Ok(!code.is_empty())
    }

    /// Init code while the account is not deployed yet, empty afterwards.
    pub async fn init_code_if_needed(&self) -> Result<Bytes> {
        if self.is_deployed().await? {
            Ok(Bytes::new())
        } else {
            Ok(self.init_code())
        }
    }

    pub async fn nonce(&self) -> Result<U256> {
        EntryPoint::new(self.entry_point, self.client.clone())
            .get_nonce(self.address, U256::zero())
            .call()
            .await
            .map_err(|e| SoneiumError::AccountAbstraction(format!("Failed to get nonce: {e}")))
    }

    /// Signs the EntryPoint hash of `user_op` (EIP-191) and stores the signature.
    pub async fn sign_user_operation(&self, mut user_op: UserOperation) -> Result<UserOperation> {
        let hash = user_op.hash(self.entry_point, self.chain_id());
        let signature = self
            .owner
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| SoneiumError::Wallet(format!("failed to sign user operation: {e}")))?;
        user_op.signature = signature.to_vec().into();
        Ok(user_op)
    }
}
