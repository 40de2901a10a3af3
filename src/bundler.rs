// src/bundler.rs
use std::fmt;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::error::{Result, SoneiumError};
use crate::types::{UserOperation, UserOperationHash};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// JSON-RPC client for an ERC-4337 bundler.
#[derive(Clone)]
pub struct BundlerClient {
    http: reqwest::Client,
    url: String,
    entry_point: Address,
    timeout: Duration,
    api_key: Option<String>,
}

impl fmt::Debug for BundlerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundlerClient")
            .field("url", &self.url)
            .field("entry_point", &self.entry_point)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BundlerClient {
    pub fn new(url: impl Into<String>, entry_point: Address, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            entry_point,
            timeout,
            api_key: None,
        }
    }

    /// Sends `Authorization: Bearer <key>` with every request when set.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub async fn send_user_operation(&self, user_op: &UserOperation) -> Result<UserOperationHash> {
        info!(sender = ?user_op.sender, "sending user operation to bundler");
        debug!(url = %self.url, ?user_op, "sending request to bundler");

        let result = self
            .request(
                "eth_sendUserOperation",
                json!([user_op, self.entry_point]),
            )
            .await?;
        let hash: UserOperationHash = serde_json::from_value(result.clone()).map_err(|e| {
            SoneiumError::bundler(
                format!("Bundler error: unexpected user operation hash: {e}"),
                Some(result),
            )
        })?;

        info!(?hash, "user operation sent successfully");
        Ok(hash)
    }

    /// Receipt of an included user operation, `None` while it is pending.
    pub async fn get_user_operation_receipt(&self, hash: UserOperationHash) -> Result<Option<Value>> {
        let result = self
            .request("eth_getUserOperationReceipt", json!([hash]))
            .await?;
        Ok(if result.is_null() { None } else { Some(result) })
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let result = self.request("eth_supportedEntryPoints", json!([])).await?;
        serde_json::from_value(result.clone()).map_err(|e| {
            SoneiumError::bundler(
                format!("Bundler error: unexpected entry point list: {e}"),
                Some(result),
            )
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let mut request = self.http.post(&self.url).timeout(self.timeout).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        let parsed: std::result::Result<JsonRpcResponse, _> = serde_json::from_str(&text);
        let response = match parsed {
            Ok(response) => response,
            Err(_) if !status.is_success() => {
                error!(%status, body = %text, "bundler request failed");
                return Err(SoneiumError::bundler(
                    format!("Bundler error: {status}: {text}"),
                    Some(Value::String(text)),
                ));
            }
            Err(e) => {
                error!(body = %text, "malformed bundler response");
                return Err(SoneiumError::bundler(
                    format!("Bundler error: malformed response: {e}"),
                    Some(Value::String(text)),
                ));
            }
        };

        if let Some(err) = response.error {
            error!(error = %err, "bundler returned an error");
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(SoneiumError::bundler(
                format!("Bundler error: {message}"),
                Some(err),
            ));
        }

        if !status.is_success() {
            error!(%status, body = %text, "bundler request failed");
            return Err(SoneiumError::bundler(
                format!("Bundler error: {status}"),
                serde_json::from_str(&text).ok(),
            ));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> SoneiumError {
        if err.is_timeout() {
            error!(url = %self.url, method, "bundler request timed out");
            return SoneiumError::timeout(&self.url, self.timeout.as_millis() as u64);
        }
        error!(method, "bundler request failed: {}", err);
        SoneiumError::bundler(format!("Failed to call {method}: {err}"), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use ethers::types::H256;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, timeout: Duration) -> BundlerClient {
        BundlerClient::new(server.uri(), Address::repeat_byte(0x5f), timeout)
    }

    #[tokio::test]
    async fn test_send_user_operation_returns_hash() {
        let server = MockServer::start().await;
        let hash = H256::repeat_byte(0xab);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_sendUserOperation" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": hash
            })))
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5))
            .send_user_operation(&UserOperation::default())
            .await
            .unwrap();
        assert_eq!(result, hash);
    }

    #[tokio::test]
    async fn test_json_rpc_error_is_bundler_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32500, "message": "AA21 didn't pay prefund" }
            })))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .send_user_operation(&UserOperation::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bundler);
        assert!(err.to_string().contains("AA21 didn't pay prefund"));
        assert_eq!(err.response().unwrap()["code"], json!(-32500));
    }

    #[tokio::test]
    async fn test_http_error_with_rpc_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "Internal error" }
            })))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .send_user_operation(&UserOperation::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bundler);
        assert!(err.to_string().contains("Internal error"));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .send_user_operation(&UserOperation::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bundler);
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_millis(200))
            .send_user_operation(&UserOperation::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RpcTimeout);
    }

    #[tokio::test]
    async fn test_api_key_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer bundler-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": [format!("{:?}", Address::repeat_byte(0x5f))]
            })))
            .mount(&server)
            .await;

        let entry_points = client(&server, Duration::from_secs(5))
            .with_api_key(Some("bundler-key".to_string()))
            .supported_entry_points()
            .await
            .unwrap();
        assert_eq!(entry_points, vec![Address::repeat_byte(0x5f)]);
    }

    #[tokio::test]
    async fn test_pending_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": null
            })))
            .mount(&server)
            .await;

        let receipt = client(&server, Duration::from_secs(5))
            .get_user_operation_receipt(H256::zero())
            .await
            .unwrap();
        assert!(receipt.is_none());
    }
}
