//! Solidity interfaces for the factory, Safe and proxy factory, plus the
//! typed values plan files use for constructor arguments and post-deploy calls.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::sol;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{keccak256, Address, B256};

sol! {
    /// Owner-gated CREATE2 factory that records every salt it consumes.
    interface ICreate2Factory {
        function deployWithConstructor(bytes memory bytecode, bytes32 salt) external returns (address deployed);
        function saltUsed(bytes32 salt) external view returns (bool);
        function isDeployed(address target) external view returns (bool);
        function hasCode(address target) external view returns (bool);
        function deploymentCount() external view returns (uint256);
        function getDeployedBytecodeHash(address target) external view returns (bytes32);
        function owner() external view returns (address);

        error SaltAlreadyUsed();
        error InvalidBytecode();
        error Create2FailedDeployment();
        error OwnableUnauthorizedAccount(address account);
    }

    interface ISafeProxyFactory {
        function proxyCreationCode() external pure returns (bytes memory);
        function createProxyWithNonce(address _singleton, bytes memory initializer, uint256 saltNonce) external returns (address proxy);
    }

    interface ISafe {
        function setup(
            address[] calldata _owners,
            uint256 _threshold,
            address to,
            bytes calldata data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address paymentReceiver
        ) external;
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function isOwner(address owner) external view returns (bool);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error(transparent)]
    Sol(#[from] alloy_sol_types::Error),
    #[error("value does not fit the requested integer width")]
    Overflow,
    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: String },
}

/// First four bytes of keccak256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Parses `0x`-prefixed (or bare) hex, trimming whitespace.
pub fn parse_hex(s: &str) -> Result<Bytes, AbiError> {
    let s = s.trim();
    let body = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(body)
        .map(Bytes::from)
        .map_err(|_| AbiError::InvalidValue {
            kind: "hex",
            value: truncate(s),
        })
}

/// A uint256 given in configuration as a JSON number, decimal string, or 0x hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UintValue(pub U256);

impl UintValue {
    pub fn parse(s: &str) -> Result<Self, AbiError> {
        let s = s.trim();
        let invalid = || AbiError::InvalidValue {
            kind: "uint",
            value: truncate(s),
        };
        if s.is_empty() || s == "0x" {
            return Err(invalid());
        }
        s.parse::<U256>().map(Self).map_err(|_| invalid())
    }
}

impl Serialize for UintValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UintValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(U256::from(n))),
            Raw::Text(s) => UintValue::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// A typed argument as written in plan files: `{"type": "address", "value": "0x.."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AbiValue {
    Address(Address),
    Uint(UintValue),
    Bool(bool),
    Bytes32(B256),
    Bytes(Bytes),
    String(String),
}

impl From<&AbiValue> for DynSolValue {
    fn from(value: &AbiValue) -> Self {
        match value {
            AbiValue::Address(a) => DynSolValue::Address((*a).into()),
            AbiValue::Uint(u) => DynSolValue::Uint(u.0, 256),
            AbiValue::Bool(b) => DynSolValue::Bool(*b),
            AbiValue::Bytes32(b) => DynSolValue::FixedBytes((*b).into(), 32),
            AbiValue::Bytes(b) => DynSolValue::Bytes(b.to_vec()),
            AbiValue::String(s) => DynSolValue::String(s.clone()),
        }
    }
}

/// Encodes plan values as a parameter tuple (constructor arguments, call
/// arguments, or the return data a check expects).
pub fn encode_values(values: &[AbiValue]) -> Vec<u8> {
    DynSolValue::Tuple(values.iter().map(DynSolValue::from).collect()).abi_encode_params()
}

/// Calldata for `signature` with plan values as arguments.
pub fn encode_call(signature: &str, values: &[AbiValue]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode_values(values));
    out
}

fn truncate(s: &str) -> String {
    s.chars().take(24).collect()
}
