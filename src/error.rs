// src/error.rs
use std::fmt;

use ethers::providers::MiddlewareError;
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SoneiumError>;

#[derive(Error, Debug)]
pub enum SoneiumError {
    #[error("RPC Error: {message}")]
    Rpc {
        message: String,
        code: Option<i64>,
        data: Option<Value>,
        url: Option<String>,
        method: Option<String>,
    },

    #[error("RPC Error: Request to {url} timed out after {timeout_ms}ms")]
    RpcTimeout { url: String, timeout_ms: u64 },

    #[error("Wallet Error: {0}")]
    Wallet(String),

    #[error("Account Abstraction Error: {0}")]
    AccountAbstraction(String),

    #[error("Account Abstraction Error: Paymaster Error: {message}")]
    Paymaster {
        message: String,
        response: Option<Value>,
    },

    #[error("Account Abstraction Error: Bundler Error: {message}")]
    Bundler {
        message: String,
        response: Option<Value>,
    },

    #[error("Transaction Rejected: {message}")]
    TransactionRejected {
        message: String,
        reason: Option<String>,
    },

    #[error("Gas Estimation Error: {0}")]
    GasEstimation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Stable category tag for a [`SoneiumError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Rpc,
    RpcTimeout,
    Wallet,
    AccountAbstraction,
    Paymaster,
    Bundler,
    TransactionRejected,
    GasEstimation,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Rpc => "RpcError",
            ErrorKind::RpcTimeout => "RpcTimeoutError",
            ErrorKind::Wallet => "WalletError",
            ErrorKind::AccountAbstraction => "AccountAbstractionError",
            ErrorKind::Paymaster => "PaymasterError",
            ErrorKind::Bundler => "BundlerError",
            ErrorKind::TransactionRejected => "TransactionRejectedError",
            ErrorKind::GasEstimation => "GasEstimationError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SoneiumError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SoneiumError::Rpc { .. } => ErrorKind::Rpc,
            SoneiumError::RpcTimeout { .. } => ErrorKind::RpcTimeout,
            SoneiumError::Wallet(_) => ErrorKind::Wallet,
            SoneiumError::AccountAbstraction(_) => ErrorKind::AccountAbstraction,
            SoneiumError::Paymaster { .. } => ErrorKind::Paymaster,
            SoneiumError::Bundler { .. } => ErrorKind::Bundler,
            SoneiumError::TransactionRejected { .. } => ErrorKind::TransactionRejected,
            SoneiumError::GasEstimation(_) => ErrorKind::GasEstimation,
            SoneiumError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for RPC failures, timeouts included.
    pub fn is_rpc(&self) -> bool {
        matches!(self, SoneiumError::Rpc { .. } | SoneiumError::RpcTimeout { .. })
    }

    /// True for account abstraction failures, paymaster and bundler included.
    pub fn is_account_abstraction(&self) -> bool {
        matches!(
            self,
            SoneiumError::AccountAbstraction(_)
                | SoneiumError::Paymaster { .. }
                | SoneiumError::Bundler { .. }
        )
    }

    /// Remote response body attached to paymaster and bundler failures.
    pub fn response(&self) -> Option<&Value> {
        match self {
            SoneiumError::Paymaster { response, .. } | SoneiumError::Bundler { response, .. } => {
                response.as_ref()
            }
            SoneiumError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    pub fn rpc(message: impl Into<String>) -> Self {
        SoneiumError::Rpc {
            message: message.into(),
            code: None,
            data: None,
            url: None,
            method: None,
        }
    }

    pub fn paymaster(message: impl Into<String>, response: Option<Value>) -> Self {
        SoneiumError::Paymaster {
            message: message.into(),
            response,
        }
    }

    pub fn bundler(message: impl Into<String>, response: Option<Value>) -> Self {
        SoneiumError::Bundler {
            message: message.into(),
            response,
        }
    }

    pub fn timeout(url: impl Into<String>, timeout_ms: u64) -> Self {
        SoneiumError::RpcTimeout {
            url: url.into(),
            timeout_ms,
        }
    }

    /// Maps an ethers middleware failure into an RPC error, keeping the
    /// JSON-RPC error code and data when the node returned one.
    pub(crate) fn from_middleware<E: MiddlewareError>(
        context: impl fmt::Display,
        method: &str,
        err: E,
    ) -> Self {
        let response = err.as_error_response();
        SoneiumError::Rpc {
            message: format!("{context}: {err}"),
            code: response.map(|r| r.code),
            data: response.and_then(|r| r.data.clone()),
            url: None,
            method: Some(method.to_string()),
        }
    }

    /// Attaches the endpoint URL to an RPC error. Other variants are returned unchanged.
    pub(crate) fn at_url(mut self, endpoint: &str) -> Self {
        if let SoneiumError::Rpc { url, .. } = &mut self {
            url.get_or_insert_with(|| endpoint.to_string());
        }
        self
    }

    /// Boundary policy for account abstraction flows: account abstraction and
    /// RPC failures pass through, everything else is wrapped with `context`.
    pub(crate) fn into_account_abstraction(self, context: &str) -> Self {
        if self.is_account_abstraction() || self.is_rpc() {
            self
        } else {
            SoneiumError::AccountAbstraction(format!("{context}: {self}"))
        }
    }
}
