//! Blocking Ethereum JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{Revert, SolError, SolInterface};

use super::{ChainClient, ChainError, Receipt, SignedTransaction};
use crate::abi::ICreate2Factory::ICreate2FactoryErrors;
use crate::crypto::{Address, B256};

/// JSON-RPC client over HTTP.
///
/// `submit_transaction` broadcasts with `eth_sendRawTransaction` and then
/// polls `eth_getTransactionReceipt` every `poll_interval` until the
/// receipt appears or `receipt_timeout` elapses.
pub struct RpcClient {
    url: String,
    http: Client,
    next_id: AtomicU64,
    chain_id: OnceLock<u64>,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcClient {
    pub fn new(
        url: impl Into<String>,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
            chain_id: OnceLock::new(),
            poll_interval,
            receipt_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "rpc request");

        let response: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .json()
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(error) = response.get("error") {
            return Err(classify_error(error));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode(format!("{method}: response has no result")))
    }

    fn quantity(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let value = self.request(method, params)?;
        parse_quantity(&value)
    }

    fn receipt(&self, hash: &B256) -> Result<Option<Receipt>, ChainError> {
        let value = self.request("eth_getTransactionReceipt", json!([hash.to_string()]))?;
        if value.is_null() {
            return Ok(None);
        }
        parse_receipt(&value).map(Some)
    }
}

impl ChainClient for RpcClient {
    fn chain_id(&self) -> Result<u64, ChainError> {
        if let Some(id) = self.chain_id.get() {
            return Ok(*id);
        }
        let id = u64::try_from(self.quantity("eth_chainId", json!([]))?)
            .map_err(|_| ChainError::Decode("chain id exceeds u64".into()))?;
        Ok(*self.chain_id.get_or_init(|| id))
    }

    fn block_number(&self) -> Result<u64, ChainError> {
        u64::try_from(self.quantity("eth_blockNumber", json!([]))?)
            .map_err(|_| ChainError::Decode("block number exceeds u64".into()))
    }

    fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError> {
        let value = self.request("eth_getCode", json!([address.to_string(), "latest"]))?;
        parse_data(&value)
    }

    fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let params = json!([
            { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let value = self.request("eth_call", params)?;
        parse_data(&value)
    }

    fn transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        let count = self.quantity(
            "eth_getTransactionCount",
            json!([address.to_string(), "pending"]),
        )?;
        u64::try_from(count).map_err(|_| ChainError::Decode("nonce exceeds u64".into()))
    }

    fn gas_price(&self) -> Result<u128, ChainError> {
        self.quantity("eth_gasPrice", json!([]))
    }

    fn balance(&self, address: &Address) -> Result<u128, ChainError> {
        self.quantity("eth_getBalance", json!([address.to_string(), "latest"]))
    }

    fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Receipt, ChainError> {
        let raw = format!("0x{}", hex::encode(tx.raw()));
        let hash = tx.hash();
        self.request("eth_sendRawTransaction", json!([raw]))?;
        debug!(tx = %hash, "broadcast");

        let started = Instant::now();
        loop {
            if let Some(receipt) = self.receipt(&hash)? {
                return Ok(receipt);
            }
            if started.elapsed() >= self.receipt_timeout {
                return Err(ChainError::Timeout(format!(
                    "no receipt for {hash} after {}s",
                    self.receipt_timeout.as_secs()
                )));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

fn classify_error(error: &Value) -> ChainError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let lower = message.to_lowercase();

    if lower.contains("insufficient funds") {
        return ChainError::InsufficientFunds(message);
    }
    let data = error.get("data").and_then(|d| match d {
        Value::String(s) => Some(s.as_str()),
        Value::Object(o) => o.get("data").and_then(Value::as_str),
        _ => None,
    });
    if let Some(reason) = data.and_then(decode_revert_data) {
        return ChainError::Reverted {
            reason,
            transaction: None,
        };
    }
    if lower.contains("revert") {
        let reason = message
            .split_once("reverted: ")
            .map(|(_, r)| r.to_string())
            .unwrap_or(message);
        return ChainError::Reverted {
            reason,
            transaction: None,
        };
    }
    ChainError::Rpc(message)
}

/// Decodes `Error(string)` and the factory's custom errors from revert data.
fn decode_revert_data(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data)).ok()?;
    if let Ok(revert) = Revert::abi_decode(&bytes) {
        return Some(revert.reason);
    }
    let reason = match ICreate2FactoryErrors::abi_decode(&bytes).ok()? {
        ICreate2FactoryErrors::SaltAlreadyUsed(_) => "SaltAlreadyUsed".to_string(),
        ICreate2FactoryErrors::InvalidBytecode(_) => "InvalidBytecode".to_string(),
        ICreate2FactoryErrors::Create2FailedDeployment(_) => "Create2FailedDeployment".to_string(),
        ICreate2FactoryErrors::OwnableUnauthorizedAccount(e) => {
            format!("OwnableUnauthorizedAccount({})", Address::from(e.account))
        }
    };
    Some(reason)
}

fn parse_quantity(value: &Value) -> Result<u128, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex quantity, got {value}")))?;
    if s == "0x" {
        return Ok(0);
    }
    let quantity = s
        .parse::<U256>()
        .map_err(|_| ChainError::Decode(format!("bad quantity {s}")))?;
    u128::try_from(quantity).map_err(|_| ChainError::Decode(format!("quantity {s} exceeds u128")))
}

fn parse_data(value: &Value) -> Result<Vec<u8>, ChainError> {
    serde_json::from_value::<Bytes>(value.clone())
        .map(|data| data.to_vec())
        .map_err(|e| ChainError::Decode(format!("bad hex data: {e}")))
}

fn parse_receipt(value: &Value) -> Result<Receipt, ChainError> {
    let field = |name: &str| {
        value
            .get(name)
            .ok_or_else(|| ChainError::Decode(format!("receipt missing {name}")))
    };
    let transaction_hash = field("transactionHash")?
        .as_str()
        .and_then(|s| s.parse::<B256>().ok())
        .ok_or_else(|| ChainError::Decode("bad transactionHash".into()))?;
    let block_number = u64::try_from(parse_quantity(field("blockNumber")?)?)
        .map_err(|_| ChainError::Decode("block number exceeds u64".into()))?;
    let contract_address = match value.get("contractAddress").and_then(Value::as_str) {
        Some(s) => Some(
            s.parse::<Address>()
                .map_err(|e| ChainError::Decode(e.to_string()))?,
        ),
        None => None,
    };
    let success = parse_quantity(field("status")?)? == 1;

    Ok(Receipt {
        transaction_hash,
        block_number,
        contract_address,
        success,
        revert_reason: None,
    })
}
