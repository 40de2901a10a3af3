// src/gas.rs
//! Gas and fee estimation for plain transactions and user operations.
//!
//! Every estimate is a raw node figure plus a percentage buffer, computed in
//! integer arithmetic: `x + x * buffer / 100`.

use std::sync::Arc;

use ethers::providers::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Eip1559TransactionRequest, U256};
use tracing::{debug, error, warn};

use crate::config::DEFAULT_GAS_BUFFER_PERCENTAGE;
use crate::error::{Result, SoneiumError};
use crate::types::{GasPrices, TransactionRequest, UserOperation, UserOperationGas};

pub const DEFAULT_MAX_GAS_LIMIT: u64 = 10_000_000;

pub const BASE_VERIFICATION_GAS: u64 = 100_000;

/// Extra verification gas when the operation also deploys the account.
pub const INIT_CODE_VERIFICATION_GAS: u64 = 100_000;

pub const BASE_PRE_VERIFICATION_GAS: u64 = 21_000;

pub const PRE_VERIFICATION_GAS_PER_BYTE: u64 = 16;

/// Used when the latest block carries no base fee.
pub const FALLBACK_BASE_FEE: u64 = 1_000_000_000;

/// 1.5 gwei
pub const DEFAULT_PRIORITY_FEE: u64 = 1_500_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimationOptions {
    pub buffer_percentage: u64,
    pub max_gas_limit: U256,
}

impl Default for GasEstimationOptions {
    fn default() -> Self {
        Self {
            buffer_percentage: DEFAULT_GAS_BUFFER_PERCENTAGE,
            max_gas_limit: U256::from(DEFAULT_MAX_GAS_LIMIT),
        }
    }
}

impl GasEstimationOptions {
    pub fn with_buffer_percentage(mut self, buffer_percentage: u64) -> Self {
        self.buffer_percentage = buffer_percentage;
        self
    }

    pub fn with_max_gas_limit(mut self, max_gas_limit: impl Into<U256>) -> Self {
        self.max_gas_limit = max_gas_limit.into();
        self
    }
}

/// Fields of a user operation that drive its gas estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOperationGasInput {
    pub sender: Address,
    pub call_data: Bytes,
    pub init_code: Bytes,
}

impl From<&UserOperation> for UserOperationGasInput {
    fn from(uo: &UserOperation) -> Self {
        Self {
            sender: uo.sender,
            call_data: uo.call_data.clone(),
            init_code: uo.init_code.clone(),
        }
    }
}

pub fn apply_buffer(value: U256, buffer_percentage: u64) -> U256 {
    let buffer = value.saturating_mul(U256::from(buffer_percentage)) / U256::from(100);
    value.saturating_add(buffer)
}

/// `min(estimate + estimate * buffer / 100, max_gas_limit)`
pub fn buffered_gas_limit(estimate: U256, options: &GasEstimationOptions) -> U256 {
    let gas_limit = apply_buffer(estimate, options.buffer_percentage);
    if gas_limit > options.max_gas_limit {
        warn!(
            %gas_limit,
            max_gas_limit = %options.max_gas_limit,
            "gas estimate exceeds max gas limit, capping"
        );
        return options.max_gas_limit;
    }
    gas_limit
}

pub fn verification_gas_limit(has_init_code: bool, buffer_percentage: u64) -> U256 {
    let mut gas = U256::from(BASE_VERIFICATION_GAS);
    if has_init_code {
        gas += U256::from(INIT_CODE_VERIFICATION_GAS);
    }
    apply_buffer(gas, buffer_percentage)
}

pub fn pre_verification_gas(
    call_data_len: usize,
    init_code_len: usize,
    buffer_percentage: u64,
) -> U256 {
    let per_byte = U256::from(PRE_VERIFICATION_GAS_PER_BYTE);
    let gas = U256::from(BASE_PRE_VERIFICATION_GAS)
        + per_byte * U256::from(call_data_len)
        + per_byte * U256::from(init_code_len);
    apply_buffer(gas, buffer_percentage)
}

/// `base_fee * (100 + buffer) / 100`
pub fn buffered_max_fee(base_fee: U256, buffer_percentage: u64) -> U256 {
    let factor = U256::from(100) + U256::from(buffer_percentage);
    base_fee.saturating_mul(factor) / U256::from(100)
}

/// Builds the dry-run transaction used by [`estimate_gas`].
pub fn call_request(from: Address, tx: &TransactionRequest) -> TypedTransaction {
    let mut request = Eip1559TransactionRequest::new().from(from).to(tx.to);
    if let Some(data) = &tx.data {
        request = request.data(data.clone());
    }
    if let Some(value) = tx.value {
        request = request.value(value);
    }
    request.into()
}

/// Simulates `tx` on the node and returns the buffered, capped gas limit.
pub async fn estimate_gas<M: Middleware>(
    client: &M,
    tx: &TypedTransaction,
    options: &GasEstimationOptions,
) -> Result<U256> {
    debug!(to = ?tx.to(), "estimating gas for transaction");

    let estimate = client.estimate_gas(tx, None).await.map_err(|e| {
        error!("gas estimation failed: {}", e);
        SoneiumError::GasEstimation(format!("Failed to estimate gas: {e}"))
    })?;
    debug!(%estimate, "raw gas estimate");

    let gas_limit = buffered_gas_limit(estimate, options);
    debug!(%gas_limit, "final gas limit with buffer");
    Ok(gas_limit)
}

pub async fn estimate_user_operation_gas<M: Middleware>(
    client: &M,
    entry_point: Address,
    input: &UserOperationGasInput,
    options: &GasEstimationOptions,
) -> Result<UserOperationGas> {
    debug!(sender = ?input.sender, ?entry_point, "estimating gas for user operation");

    let call = Eip1559TransactionRequest::new()
        .from(input.sender)
        .to(input.sender)
        .data(input.call_data.clone());
    let call_gas_limit = estimate_gas(client, &call.into(), options).await?;

    let gas = UserOperationGas {
        call_gas_limit,
        verification_gas_limit: verification_gas_limit(
            !input.init_code.is_empty(),
            options.buffer_percentage,
        ),
        pre_verification_gas: pre_verification_gas(
            input.call_data.len(),
            input.init_code.len(),
            options.buffer_percentage,
        ),
    };
    debug!(?gas, "estimated user operation gas");
    Ok(gas)
}

/// Fee caps derived from the latest block's base fee.
pub async fn current_gas_prices<M: Middleware>(
    client: &M,
    options: &GasEstimationOptions,
) -> Result<GasPrices> {
    debug!("getting current gas prices");

    let block = client
        .get_block(BlockNumber::Latest)
        .await
        .map_err(|e| {
            error!("failed to get latest block: {}", e);
            SoneiumError::GasEstimation(format!("Failed to get current gas prices: {e}"))
        })?
        .ok_or_else(|| {
            SoneiumError::GasEstimation(
                "Failed to get current gas prices: latest block not found".to_string(),
            )
        })?;

    let base_fee = block
        .base_fee_per_gas
        .unwrap_or_else(|| U256::from(FALLBACK_BASE_FEE));
    let prices = GasPrices {
        max_fee_per_gas: buffered_max_fee(base_fee, options.buffer_percentage),
        max_priority_fee_per_gas: U256::from(DEFAULT_PRIORITY_FEE),
    };
    debug!(%base_fee, ?prices, "current gas prices");
    Ok(prices)
}

/// Fills the gas limits and fee caps of a user operation before it is
/// signed. All other fields are left untouched.
#[derive(Debug)]
pub struct GasEstimator<M> {
    client: Arc<M>,
    entry_point: Address,
    options: GasEstimationOptions,
}

impl<M: Middleware> GasEstimator<M> {
    pub fn new(client: Arc<M>, entry_point: Address, options: GasEstimationOptions) -> Self {
        Self {
            client,
            entry_point,
            options,
        }
    }

    pub fn options(&self) -> &GasEstimationOptions {
        &self.options
    }

    pub async fn estimate(&self, user_op: UserOperation) -> Result<UserOperation> {
        debug!(sender = ?user_op.sender, "gas estimation middleware called");

        let run = async {
            let gas = estimate_user_operation_gas(
                self.client.as_ref(),
                self.entry_point,
                &UserOperationGasInput::from(&user_op),
                &self.options,
            )
            .await?;
            let prices = current_gas_prices(self.client.as_ref(), &self.options).await?;
            Ok::<_, SoneiumError>((gas, prices))
        };

        match run.await {
            Ok((gas, prices)) => Ok(user_op.with_gas(gas).with_gas_prices(prices)),
            Err(e) => {
                error!("gas estimation middleware failed: {}", e);
                Err(e)
            }
        }
    }
}
