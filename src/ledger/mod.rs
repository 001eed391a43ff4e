//! Salt consumption bookkeeping.
//!
//! The factory contract owns the ledger: it is the single place that decides
//! whether a salt is still available. [`SaltLedger`] is the state machine the
//! factory implements (`Unused -> Used`, terminal), usable standalone and as
//! the simulator's factory storage. [`DeploymentLedger`] is the view of a
//! live factory; it queries the chain for every answer and keeps only a
//! local mirror of what it deployed itself.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use alloy_sol_types::SolCall;

use crate::abi::{AbiError, ICreate2Factory};
use crate::chain::{send_transaction, ChainClient, ChainError, SendError, TransactionRequest};
use crate::crypto::{code_hash, predict_address, Address, CodeHash, Salt, B256};
use crate::signer::{SignerError, TransactionSigner};

/// One consumed salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub salt: Salt,
    pub address: Address,
    pub creation_code_hash: CodeHash,
    pub deployer: Address,
    pub deployed_at_block: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("salt {salt} already used")]
    SaltAlreadyUsed { salt: Salt },
    #[error("creation code is empty")]
    InvalidCreationCode,
    #[error("no code at {0}")]
    NotFound(Address),
    #[error("deployment landed at {actual:?}, predicted {predicted}")]
    PredictionMismatch {
        predicted: Address,
        actual: Option<Address>,
    },
    #[error("factory returned malformed data: {0}")]
    Decode(#[from] AbiError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl From<SendError> for LedgerError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Chain(e) => LedgerError::Chain(e),
            SendError::Signer(e) => LedgerError::Signer(e),
        }
    }
}

/// Per-factory salt state machine.
#[derive(Debug, Clone, Default)]
pub struct SaltLedger {
    entries: HashMap<Salt, LedgerEntry>,
    deployed: HashSet<Address>,
}

impl SaltLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions `salt` to used and returns the new entry.
    ///
    /// A rejected call leaves the ledger untouched.
    pub fn record_deployment(
        &mut self,
        salt: Salt,
        address: Address,
        creation_code: &[u8],
        deployer: Address,
        block: u64,
    ) -> Result<&LedgerEntry, LedgerError> {
        if creation_code.is_empty() {
            return Err(LedgerError::InvalidCreationCode);
        }
        if self.entries.contains_key(&salt) {
            return Err(LedgerError::SaltAlreadyUsed { salt });
        }
        self.deployed.insert(address);
        let entry = self.entries.entry(salt).or_insert(LedgerEntry {
            salt,
            address,
            creation_code_hash: code_hash(creation_code),
            deployer,
            deployed_at_block: block,
        });
        Ok(entry)
    }

    pub fn is_used(&self, salt: &Salt) -> bool {
        self.entries.contains_key(salt)
    }

    pub fn is_deployed(&self, address: &Address) -> bool {
        self.deployed.contains(address)
    }

    pub fn entry(&self, salt: &Salt) -> Option<&LedgerEntry> {
        self.entries.get(salt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A deployment performed through [`DeploymentLedger::record_deployment`].
#[derive(Debug, Clone)]
pub struct Deployment {
    pub entry: LedgerEntry,
    pub transaction_hash: B256,
}

/// View of an on-chain factory.
pub struct DeploymentLedger<'a> {
    chain: &'a dyn ChainClient,
    factory: Address,
    gas_limit: u64,
    mirror: SaltLedger,
}

impl<'a> DeploymentLedger<'a> {
    pub fn new(chain: &'a dyn ChainClient, factory: Address, gas_limit: u64) -> Self {
        Self {
            chain,
            factory,
            gas_limit,
            mirror: SaltLedger::new(),
        }
    }

    pub fn factory(&self) -> &Address {
        &self.factory
    }

    fn view<C: SolCall>(&self, call: C) -> Result<C::Return, LedgerError> {
        let out = self.chain.call(&self.factory, &call.abi_encode())?;
        Ok(C::abi_decode_returns(&out).map_err(AbiError::from)?)
    }

    /// Whether the factory has consumed `salt`.
    pub fn is_used(&self, salt: &Salt) -> Result<bool, LedgerError> {
        self.view(ICreate2Factory::saltUsedCall {
            salt: (*salt).into(),
        })
    }

    /// Whether the factory itself deployed `address`.
    pub fn is_deployed(&self, address: &Address) -> Result<bool, LedgerError> {
        self.view(ICreate2Factory::isDeployedCall {
            target: (*address).into(),
        })
    }

    /// Whether any code is present at `address`.
    pub fn has_code(&self, address: &Address) -> Result<bool, LedgerError> {
        Ok(!self.chain.get_code(address)?.is_empty())
    }

    /// keccak256 of the runtime code currently at `address`.
    ///
    /// Always read from the chain; creation code hashes are never
    /// substituted here.
    pub fn bytecode_hash(&self, address: &Address) -> Result<CodeHash, LedgerError> {
        let code = self.chain.get_code(address)?;
        if code.is_empty() {
            return Err(LedgerError::NotFound(*address));
        }
        Ok(code_hash(&code))
    }

    pub fn owner(&self) -> Result<Address, LedgerError> {
        Ok(self.view(ICreate2Factory::ownerCall {})?.into())
    }

    /// Entry for a salt this process deployed. A cache, not the source of truth.
    pub fn cached(&self, salt: &Salt) -> Option<&LedgerEntry> {
        self.mirror.entry(salt)
    }

    /// Deploys `creation_code` under `salt` through the factory.
    ///
    /// The ledger entry exists if and only if the deployment transaction
    /// succeeded: the factory consumes the salt inside the same transaction.
    pub fn record_deployment(
        &mut self,
        signer: &dyn TransactionSigner,
        salt: Salt,
        creation_code: &[u8],
    ) -> Result<Deployment, LedgerError> {
        if creation_code.is_empty() {
            return Err(LedgerError::InvalidCreationCode);
        }
        if self.is_used(&salt)? {
            debug!(%salt, "salt already consumed on-chain");
            return Err(LedgerError::SaltAlreadyUsed { salt });
        }

        let predicted = predict_address(&self.factory, &salt, creation_code);
        info!(%salt, address = %predicted, "deploying through factory");

        let data = ICreate2Factory::deployWithConstructorCall {
            bytecode: creation_code.to_vec().into(),
            salt: salt.into(),
        }
        .abi_encode();
        let request = TransactionRequest::call(self.factory, data, self.gas_limit);
        let receipt = match send_transaction(self.chain, signer, request) {
            Ok(receipt) => receipt,
            Err(SendError::Chain(err)) => {
                return Err(match err.revert_reason() {
                    Some(r) if r.starts_with("SaltAlreadyUsed") => {
                        LedgerError::SaltAlreadyUsed { salt }
                    }
                    Some(r) if r.starts_with("InvalidBytecode") => LedgerError::InvalidCreationCode,
                    _ => LedgerError::Chain(err),
                })
            }
            Err(err) => return Err(err.into()),
        };

        if !self.has_code(&predicted)? {
            warn!(address = %predicted, "no code at predicted address after deployment");
            return Err(LedgerError::PredictionMismatch {
                predicted,
                actual: receipt.contract_address,
            });
        }

        let entry = self
            .mirror
            .record_deployment(
                salt,
                predicted,
                creation_code,
                signer.address(),
                receipt.block_number,
            )?
            .clone();
        Ok(Deployment {
            entry,
            transaction_hash: receipt.transaction_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ContractBehavior, SimulatedChain};
    use crate::crypto::{derive_salt, Keypair};
    use crate::signer::SoftwareSigner;

    const FACTORY_CODE: &[u8] = b"create2-factory";

    fn setup() -> (SimulatedChain, SoftwareSigner, Address) {
        let chain = SimulatedChain::new(8453);
        let signer = SoftwareSigner::new(Keypair::generate());
        chain.fund(signer.address(), u128::MAX / 2);
        chain.register_behavior(FACTORY_CODE, ContractBehavior::Create2Factory);
        let receipt = send_transaction(
            &chain,
            &signer,
            TransactionRequest::create(FACTORY_CODE.to_vec(), 1_000_000),
        )
        .unwrap();
        let factory = receipt.contract_address.unwrap();
        (chain, signer, factory)
    }

    #[test]
    fn test_salt_ledger_state_machine() {
        let mut ledger = SaltLedger::new();
        let salt = derive_salt("router", 1, 0);
        let addr: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();

        assert!(!ledger.is_used(&salt));
        let entry = ledger
            .record_deployment(salt, addr, b"code", Address::ZERO, 7)
            .unwrap();
        assert_eq!(entry.deployed_at_block, 7);
        assert_eq!(entry.creation_code_hash, code_hash(b"code"));
        assert!(ledger.is_used(&salt));
        assert!(ledger.is_deployed(&addr));

        let again = ledger.record_deployment(salt, Address::ZERO, b"other", Address::ZERO, 8);
        assert!(matches!(again, Err(LedgerError::SaltAlreadyUsed { .. })));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entry(&salt).unwrap().address, addr);
    }

    #[test]
    fn test_salt_ledger_rejects_empty_code() {
        let mut ledger = SaltLedger::new();
        let result = ledger.record_deployment(B256::ZERO, Address::ZERO, &[], Address::ZERO, 1);
        assert!(matches!(result, Err(LedgerError::InvalidCreationCode)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_deploy_lands_at_prediction() {
        let (chain, signer, factory) = setup();
        let mut ledger = DeploymentLedger::new(&chain, factory, 5_000_000);
        let salt = derive_salt("402.vln.gg-v1-router", 8453, 0);
        let code = b"router-creation-code";

        let deployment = ledger.record_deployment(&signer, salt, code).unwrap();
        assert_eq!(deployment.entry.address, predict_address(&factory, &salt, code));
        assert!(ledger.is_used(&salt).unwrap());
        assert!(ledger.is_deployed(&deployment.entry.address).unwrap());
        assert_eq!(ledger.owner().unwrap(), signer.address());
        assert!(ledger.cached(&salt).is_some());

        // runtime hash differs from the creation code hash
        let runtime = ledger.bytecode_hash(&deployment.entry.address).unwrap();
        assert_ne!(runtime, code_hash(code));
        assert_eq!(
            chain.factory_entry(&factory, &salt).unwrap().deployed_at_block,
            deployment.entry.deployed_at_block
        );
    }

    #[test]
    fn test_second_deploy_same_salt_rejected() {
        let (chain, signer, factory) = setup();
        let mut ledger = DeploymentLedger::new(&chain, factory, 5_000_000);
        let salt = derive_salt("treasury", 8453, 0);

        let first = ledger.record_deployment(&signer, salt, b"one").unwrap();
        let second = ledger.record_deployment(&signer, salt, b"two");
        assert!(matches!(second, Err(LedgerError::SaltAlreadyUsed { .. })));
        assert_eq!(chain.factory_deployment_count(&factory), 1);
        assert_eq!(
            chain.factory_entry(&factory, &salt).unwrap().address,
            first.entry.address
        );
    }

    #[test]
    fn test_empty_code_leaves_no_entry() {
        let (chain, signer, factory) = setup();
        let mut ledger = DeploymentLedger::new(&chain, factory, 5_000_000);
        let nonce_before = chain.transaction_count(&signer.address()).unwrap();

        let result = ledger.record_deployment(&signer, B256::ZERO, &[]);
        assert!(matches!(result, Err(LedgerError::InvalidCreationCode)));
        assert!(!ledger.is_used(&B256::ZERO).unwrap());
        assert_eq!(chain.transaction_count(&signer.address()).unwrap(), nonce_before);
    }

    #[test]
    fn test_failed_deploy_leaves_no_entry() {
        let (chain, signer, factory) = setup();
        let mut ledger = DeploymentLedger::new(&chain, factory, 5_000_000);
        let salt = derive_salt("emergency", 8453, 0);
        chain.fail_deployments_of(b"broken");

        let result = ledger.record_deployment(&signer, salt, b"broken");
        assert!(matches!(result, Err(LedgerError::Chain(ChainError::Reverted { .. }))));
        assert!(!ledger.is_used(&salt).unwrap());
        assert!(ledger.cached(&salt).is_none());

        chain.clear_failures();
        assert!(ledger.record_deployment(&signer, salt, b"broken").is_ok());
    }

    #[test]
    fn test_bytecode_hash_not_found() {
        let (chain, _, factory) = setup();
        let ledger = DeploymentLedger::new(&chain, factory, 5_000_000);
        let empty: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        assert!(matches!(
            ledger.bytecode_hash(&empty),
            Err(LedgerError::NotFound(_))
        ));
    }
}
