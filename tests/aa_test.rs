// Smart account flows against mock node, bundler and paymaster endpoints.

use std::time::Duration;

use ethers::abi::{self, Token};
use ethers::types::{Address, Block, H256, U256};
use serde_json::{json, Value};
use soneium_sdk::aa::{create_aa_client, send_transaction, AaClientOptions};
use soneium_sdk::{
    ClientOptions, ErrorKind, NetworkType, SdkConfig, SoneiumClient, TransactionRequest,
};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
// getAddress(address,uint256)
const GET_ADDRESS_SELECTOR: &str = "8cb84e18";
// getNonce(address,uint192)
const GET_NONCE_SELECTOR: &str = "35567e1a";

struct Endpoints {
    node: MockServer,
    bundler: MockServer,
    paymaster: MockServer,
}

impl Endpoints {
    async fn start() -> Self {
        Self {
            node: MockServer::start().await,
            bundler: MockServer::start().await,
            paymaster: MockServer::start().await,
        }
    }

    fn config(&self) -> SdkConfig {
        let mut config = SdkConfig::default();
        config.testnet.rpc_url = self.node.uri();
        config.mainnet.rpc_url = self.node.uri();
        config.account_abstraction.bundler_url = self.bundler.uri();
        config.account_abstraction.paymaster_url = format!("{}/api/sponsor", self.paymaster.uri());
        config.account_abstraction.paymaster_api_key = None;
        config
    }
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn abi_word(token: Token) -> Value {
    json!(format!("0x{}", hex::encode(abi::encode(&[token]))))
}

fn smart_account() -> Address {
    Address::repeat_byte(0x77)
}

/// Node answering for an undeployed smart account with nonce 0.
async fn mock_node(node: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_call" })))
        .and(body_string_contains(GET_ADDRESS_SELECTOR))
        .respond_with(rpc_result(abi_word(Token::Address(smart_account()))))
        .mount(node)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_call" })))
        .and(body_string_contains(GET_NONCE_SELECTOR))
        .respond_with(rpc_result(abi_word(Token::Uint(U256::zero()))))
        .mount(node)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getCode" })))
        .respond_with(rpc_result(json!("0x")))
        .mount(node)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_estimateGas" })))
        .respond_with(rpc_result(json!("0x9c40")))
        .mount(node)
        .await;
    let block = Block::<H256> {
        base_fee_per_gas: Some(U256::from(1_000_000_000u64)),
        ..Default::default()
    };
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(rpc_result(serde_json::to_value(block).unwrap()))
        .mount(node)
        .await;
}

async fn mock_bundler_hash(bundler: &MockServer, hash: H256) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_sendUserOperation" })))
        .respond_with(rpc_result(json!(hash)))
        .mount(bundler)
        .await;
}

async fn submitted_user_op(bundler: &MockServer) -> Value {
    let requests = bundler.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = requests[0].body_json().unwrap();
    body["params"][0].clone()
}

#[tokio::test]
async fn test_sponsored_send_end_to_end() {
    let endpoints = Endpoints::start().await;
    mock_node(&endpoints.node).await;
    let hash = H256::repeat_byte(0x11);
    mock_bundler_hash(&endpoints.bundler, hash).await;
    Mock::given(method("POST"))
        .and(path("/api/sponsor"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "paymasterAndData": "0xabcd" })),
        )
        .mount(&endpoints.paymaster)
        .await;

    let config = endpoints.config();
    let aa_client = create_aa_client(
        OWNER_KEY,
        NetworkType::Testnet,
        true,
        Some("test-key"),
        &AaClientOptions::default(),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(aa_client.address, smart_account());
    assert_eq!(
        aa_client.smart_account_client.middleware().names(),
        vec!["gasEstimator", "sponsorship"]
    );

    let result = send_transaction(
        &aa_client.smart_account_client,
        Address::repeat_byte(0x42),
        "0.001",
    )
    .await
    .unwrap();
    assert_eq!(result, hash);

    let user_op = submitted_user_op(&endpoints.bundler).await;
    assert_eq!(user_op["sender"], json!(format!("{:?}", smart_account())));
    assert_eq!(user_op["paymasterAndData"], json!("0xabcd"));
    assert!(user_op["initCode"]
        .as_str()
        .unwrap()
        .starts_with("0x9406cc6185a346906296840746125a0e44976454"));
    // 40000 + 20%
    assert_eq!(user_op["callGasLimit"], json!("0xbb80"));
    assert_eq!(user_op["signature"].as_str().unwrap().len(), 2 + 130);

    let paymaster_requests = endpoints.paymaster.received_requests().await.unwrap();
    assert_eq!(paymaster_requests.len(), 1);
}

#[tokio::test]
async fn test_facade_aa_send_surfaces_bundler_error() {
    let endpoints = Endpoints::start().await;
    mock_node(&endpoints.node).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32500, "message": "AA21 didn't pay prefund" }
        })))
        .mount(&endpoints.bundler)
        .await;

    let client = SoneiumClient::with_config(
        NetworkType::Testnet,
        endpoints.config(),
        ClientOptions::default(),
    )
    .unwrap();
    let err = client
        .send_aa_transaction(
            &TransactionRequest::new(Address::repeat_byte(0x42)),
            Some(OWNER_KEY),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Bundler);
    assert!(err.is_account_abstraction());
    assert!(err.to_string().contains("AA21 didn't pay prefund"));
    assert!(endpoints.paymaster.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sponsorship_without_key_makes_no_requests() {
    let endpoints = Endpoints::start().await;
    mock_node(&endpoints.node).await;

    let err = create_aa_client(
        OWNER_KEY,
        NetworkType::Testnet,
        true,
        None,
        &AaClientOptions::default(),
        &endpoints.config(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Paymaster);
    assert!(endpoints.node.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_paymaster_times_out() {
    let endpoints = Endpoints::start().await;
    mock_node(&endpoints.node).await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({ "paymasterAndData": "0x" })),
        )
        .mount(&endpoints.paymaster)
        .await;

    let client = SoneiumClient::with_config(
        NetworkType::Testnet,
        endpoints.config(),
        ClientOptions {
            timeout: Some(Duration::from_millis(300)),
        },
    )
    .unwrap();
    let err = client
        .send_sponsored_transaction(
            &TransactionRequest::new(Address::repeat_byte(0x42)),
            "test-key",
            Some(OWNER_KEY),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RpcTimeout);
    assert!(err.to_string().contains("300ms"));
    assert!(endpoints.bundler.received_requests().await.unwrap().is_empty());
}
