// src/types.rs
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type UserOperationHash = H256;

/// Plain value transfer or contract call, built by the caller per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<U256>,
}

impl TransactionRequest {
    pub fn new(to: Address) -> Self {
        Self {
            to,
            ..Default::default()
        }
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }
}

/// ERC-4337 user operation in the EntryPoint v0.6 layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI-encodes every field except the signature, with the dynamic
    /// fields replaced by their keccak256 hashes.
    pub fn pack_without_signature(&self) -> Bytes {
        abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
        .into()
    }

    /// Hash the owner signs, as computed by `EntryPoint.getUserOpHash`.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> UserOperationHash {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(self.pack_without_signature()).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);
        H256::from(keccak256(encoded))
    }

    /// Upper bound on what the operation can cost the payer, in wei.
    pub fn max_gas_cost(&self) -> Option<U256> {
        let total_gas = self
            .call_gas_limit
            .checked_add(self.verification_gas_limit)?
            .checked_add(self.pre_verification_gas)?;
        total_gas.checked_mul(self.max_fee_per_gas)
    }

    /// Sponsoring paymaster, if `paymasterAndData` is populated.
    pub fn paymaster(&self) -> Option<Address> {
        if self.paymaster_and_data.len() < 20 {
            return None;
        }
        Some(Address::from_slice(&self.paymaster_and_data[..20]))
    }

    pub fn with_gas(mut self, gas: UserOperationGas) -> Self {
        self.call_gas_limit = gas.call_gas_limit;
        self.verification_gas_limit = gas.verification_gas_limit;
        self.pre_verification_gas = gas.pre_verification_gas;
        self
    }

    pub fn with_gas_prices(mut self, prices: GasPrices) -> Self {
        self.max_fee_per_gas = prices.max_fee_per_gas;
        self.max_priority_fee_per_gas = prices.max_priority_fee_per_gas;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationGas {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrices {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SponsorType {
    #[default]
    Gasless,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterRequest {
    pub user_op: UserOperation,
    pub sponsor_type: SponsorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterResponse {
    pub paymaster_and_data: Bytes,
    /// Sponsor-specific fields returned alongside `paymasterAndData`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::from(3),
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(50_000),
            verification_gas_limit: U256::from(120_000),
            pre_verification_gas: U256::from(30_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_500_000_000u64),
            ..Default::default()
        }
    }

    #[test]
    fn test_serializes_camel_case_hex() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["callGasLimit"], json!("0xc350"));
        assert_eq!(value["initCode"], json!("0x"));
        assert_eq!(value["nonce"], json!("0x3"));
        assert!(value.get("paymasterAndData").is_some());
    }

    #[test]
    fn test_hash_ignores_signature() {
        let entry_point = Address::repeat_byte(0x5f);
        let unsigned = sample();
        let mut signed = sample();
        signed.signature = Bytes::from(vec![1u8; 65]);
        assert_eq!(unsigned.hash(entry_point, 1946), signed.hash(entry_point, 1946));
    }

    #[test]
    fn test_hash_binds_chain_and_entry_point() {
        let uo = sample();
        let entry_point = Address::repeat_byte(0x5f);
        assert_ne!(uo.hash(entry_point, 1946), uo.hash(entry_point, 2852));
        assert_ne!(
            uo.hash(entry_point, 1946),
            uo.hash(Address::repeat_byte(0x60), 1946)
        );
    }

    #[test]
    fn test_hash_covers_paymaster_and_data() {
        let entry_point = Address::repeat_byte(0x5f);
        let mut sponsored = sample();
        sponsored.paymaster_and_data = Bytes::from(vec![0xaa; 20]);
        assert_ne!(sample().hash(entry_point, 1946), sponsored.hash(entry_point, 1946));
    }

    #[test]
    fn test_pack_length() {
        // ten static 32-byte words
        assert_eq!(sample().pack_without_signature().len(), 320);
    }

    #[test]
    fn test_max_gas_cost() {
        let cost = sample().max_gas_cost().unwrap();
        assert_eq!(cost, U256::from(200_000u64) * U256::from(2_000_000_000u64));

        let mut overflow = sample();
        overflow.call_gas_limit = U256::MAX;
        assert!(overflow.max_gas_cost().is_none());
    }

    #[test]
    fn test_paymaster_address() {
        let mut uo = sample();
        assert!(uo.paymaster().is_none());
        let mut data = Address::repeat_byte(0xc0).as_bytes().to_vec();
        data.extend_from_slice(&[0u8; 64]);
        uo.paymaster_and_data = data.into();
        assert_eq!(uo.paymaster(), Some(Address::repeat_byte(0xc0)));
    }

    #[test]
    fn test_paymaster_response_keeps_extra_fields() {
        let response: PaymasterResponse = serde_json::from_value(json!({
            "paymasterAndData": "0xdeadbeef",
            "validUntil": "0x64"
        }))
        .unwrap();
        assert_eq!(response.paymaster_and_data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(response.extra["validUntil"], json!("0x64"));
    }

    #[test]
    fn test_paymaster_request_shape() {
        let request = PaymasterRequest {
            user_op: sample(),
            sponsor_type: SponsorType::Gasless,
        };
        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value["sponsorType"], json!("gasless"));
        assert!(value["userOp"].get("sender").is_some());
    }
}
