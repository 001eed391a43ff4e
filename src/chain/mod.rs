//! Chain access.
//!
//! The chain is an external collaborator: this crate consumes code lookups,
//! read-only calls and transaction submission through [`ChainClient`] and
//! implements none of them itself. Two backends are provided:
//! - [`RpcClient`]: blocking JSON-RPC over HTTP
//! - [`SimulatedChain`]: in-memory chain for tests and dry runs

mod rpc;
mod simulated;
mod transaction;

pub use rpc::RpcClient;
pub use simulated::{ContractBehavior, SimulatedChain};
pub use transaction::{SignedTransaction, UnsignedTransaction};

use tracing::{debug, info};

use crate::crypto::{Address, B256};
use crate::signer::{SignerError, TransactionSigner};

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    pub success: bool,
    pub revert_reason: Option<String>,
}

impl Receipt {
    /// Turns a reverted receipt into [`ChainError::Reverted`].
    pub fn ensure_success(self) -> Result<Self, ChainError> {
        if self.success {
            Ok(self)
        } else {
            Err(ChainError::Reverted {
                reason: self
                    .revert_reason
                    .unwrap_or_else(|| "execution reverted".into()),
                transaction: Some(self.transaction_hash),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("transaction reverted: {reason}")]
    Reverted {
        reason: String,
        transaction: Option<B256>,
    },
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("transaction signed for chain {got}, node is chain {expected}")]
    WrongChain { expected: u64, got: u64 },
    #[error("transaction signature does not recover")]
    InvalidSignature,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed chain response: {0}")]
    Decode(String),
}

impl ChainError {
    /// Revert reason, if the chain rejected execution.
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// The chain query interface consumed by the deployment pipeline.
///
/// `submit_transaction` returns once the transaction is included; any
/// polling needed to get there stays inside the backend.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> Result<u64, ChainError>;
    fn block_number(&self) -> Result<u64, ChainError>;
    fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError>;
    fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError>;
    fn transaction_count(&self, address: &Address) -> Result<u64, ChainError>;
    fn gas_price(&self) -> Result<u128, ChainError>;
    fn balance(&self, address: &Address) -> Result<u128, ChainError>;
    fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Receipt, ChainError>;
}

/// A transaction before nonce, gas price and chain id are filled in.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub to: Option<Address>,
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_limit: u64,
}

impl TransactionRequest {
    pub fn call(to: Address, data: Vec<u8>, gas_limit: u64) -> Self {
        Self {
            to: Some(to),
            data,
            value: 0,
            gas_limit,
        }
    }

    pub fn create(init_code: Vec<u8>, gas_limit: u64) -> Self {
        Self {
            to: None,
            data: init_code,
            value: 0,
            gas_limit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Fills, signs, submits and waits for one transaction.
///
/// A reverted receipt is returned as an error. Nothing is retried: a
/// resubmission could double-spend and must be operator-directed.
pub fn send_transaction(
    chain: &dyn ChainClient,
    signer: &dyn TransactionSigner,
    request: TransactionRequest,
) -> Result<Receipt, SendError> {
    let from = signer.address();
    let tx = UnsignedTransaction {
        chain_id: chain.chain_id()?,
        nonce: chain.transaction_count(&from)?,
        gas_price: chain.gas_price()?,
        gas_limit: request.gas_limit,
        to: request.to,
        value: request.value,
        data: request.data,
    };
    debug!(from = %from, nonce = tx.nonce, to = ?tx.to, "signing transaction");

    let signed = signer.sign_transaction(&tx)?;
    let hash = signed.hash();
    info!(tx = %hash, "transaction submitted, awaiting inclusion");

    let receipt = chain.submit_transaction(&signed)?.ensure_success()?;
    info!(tx = %hash, block = receipt.block_number, "transaction included");
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverted_receipt_becomes_error() {
        let receipt = Receipt {
            transaction_hash: B256::ZERO,
            block_number: 3,
            contract_address: None,
            success: false,
            revert_reason: Some("SaltAlreadyUsed".into()),
        };
        let err = receipt.ensure_success().unwrap_err();
        assert_eq!(err.revert_reason(), Some("SaltAlreadyUsed"));
    }
}
