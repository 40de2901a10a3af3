// src/paymaster.rs
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::error::{Result, SoneiumError};
use crate::types::{PaymasterRequest, PaymasterResponse, SponsorType, UserOperation};

/// Hooks the smart account client calls while assembling a user operation.
#[async_trait]
pub trait PaymasterMiddleware: Send + Sync + fmt::Debug {
    /// Placeholder used while gas is still being estimated.
    async fn dummy_paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes>;

    /// Sponsor-provided `paymasterAndData` for the final operation.
    async fn paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes>;
}

/// HTTP client for a bearer-authenticated sponsorship endpoint.
#[derive(Clone)]
pub struct PaymasterClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for PaymasterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymasterClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PaymasterClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.filter(|key| !key.trim().is_empty()).ok_or_else(|| {
            error!("paymaster API key is missing");
            SoneiumError::paymaster(
                "Paymaster API key is required. Provide it as a parameter or set SONEIUM_PAYMASTER_API_KEY",
                None,
            )
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            url: url.into(),
            api_key,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests sponsorship for `user_op` and returns the sponsor's full answer.
    pub async fn sponsor(
        &self,
        user_op: &UserOperation,
        sponsor_type: SponsorType,
    ) -> Result<PaymasterResponse> {
        info!(?sponsor_type, "getting paymaster signature");

        let request = PaymasterRequest {
            user_op: user_op.clone(),
            sponsor_type,
        };
        let body = self.post(&request).await?;
        debug!(data = %body, "paymaster response received");

        serde_json::from_value(body.clone()).map_err(|e| {
            SoneiumError::paymaster(
                format!("Failed to get paymaster signature: invalid response: {e}"),
                Some(body),
            )
        })
    }

    /// Posts `{"userOperation": ..}` and extracts `paymasterAndData`.
    pub async fn paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes> {
        debug!(
            sender = ?user_op.sender,
            max_cost = ?user_op.max_gas_cost(),
            "requesting paymaster data"
        );

        let body = self.post(&json!({ "userOperation": user_op })).await?;
        let paymaster_and_data = body
            .get("paymasterAndData")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SoneiumError::paymaster(
                    "Paymaster request failed: response has no paymasterAndData",
                    Some(body.clone()),
                )
            })?
            .parse::<Bytes>()
            .map_err(|e| {
                SoneiumError::paymaster(
                    format!("Paymaster request failed: invalid paymasterAndData: {e}"),
                    Some(body.clone()),
                )
            })?;

        debug!(%paymaster_and_data, "received paymaster data");
        Ok(paymaster_and_data)
    }

    async fn post<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Value> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            error!(%status, body = %text, "paymaster request failed");
            let message = body
                .as_ref()
                .and_then(|b| b.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        text.clone()
                    }
                });
            return Err(SoneiumError::paymaster(
                format!("Paymaster request failed: {message}"),
                body.or(Some(Value::String(text))),
            ));
        }

        body.ok_or_else(|| {
            SoneiumError::paymaster(
                format!("Paymaster request failed: response is not JSON: {text}"),
                None,
            )
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> SoneiumError {
        if err.is_timeout() {
            error!(url = %self.url, "paymaster request timed out");
            return SoneiumError::timeout(&self.url, self.timeout.as_millis() as u64);
        }
        error!("paymaster request failed: {}", err);
        SoneiumError::paymaster(format!("Paymaster request failed: {err}"), None)
    }
}

/// Paymaster hooks backed by a sponsorship endpoint.
#[derive(Debug, Clone)]
pub struct SponsorshipMiddleware {
    client: PaymasterClient,
}

impl SponsorshipMiddleware {
    pub fn new(client: PaymasterClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &PaymasterClient {
        &self.client
    }
}

#[async_trait]
impl PaymasterMiddleware for SponsorshipMiddleware {
    async fn dummy_paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes> {
        debug!(sender = ?user_op.sender, "generating dummy paymaster data");
        Ok(Bytes::new())
    }

    async fn paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes> {
        self.client.paymaster_and_data(user_op).await
    }
}
