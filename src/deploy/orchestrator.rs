use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::lock::{LockError, RunLock};
use super::plan::{CallCheck, FactoryConfig, OrchestratorConfig, PostDeployCall, ResolvedRole};
use crate::abi;
use crate::chain::{send_transaction, ChainClient, ChainError, SendError, TransactionRequest};
use crate::crypto::{create_address, derive_salt, predict_address, Address, Salt};
use crate::ledger::{DeploymentLedger, LedgerError};
use crate::record::{
    validate_network, ContractRecord, DeploymentRecord, FactoryMetadata, RecordError, RecordStore,
    RoleStatus,
};
use crate::signer::{SignerError, TransactionSigner};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no roles to deploy")]
    NoRoles,
    #[error("role {0} is listed twice")]
    DuplicateRole(String),
    #[error("{role}: creation code is empty")]
    InvalidCreationCode { role: String },
    #[error("no factory code at {0}")]
    FactoryMissing(Address),
    #[error("factory bootstrap failed: {0}")]
    FactoryBootstrap(String),
    #[error("factory {factory} is owned by {owner}, not by signer {signer}")]
    NotFactoryOwner {
        factory: Address,
        owner: Address,
        signer: Address,
    },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Result of a run: the persisted record and where it was written.
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub record: DeploymentRecord,
    pub path: PathBuf,
    /// Set when this run deployed the factory itself.
    pub bootstrapped_factory: Option<Address>,
}

/// Deploys every role of one plan on one chain.
///
/// Roles run strictly in sequence. A failing role is recorded and the run
/// moves on; nothing already deployed is undone. Running again with the
/// same configuration skips deployed roles and finishes the rest.
pub struct DeploymentOrchestrator<'a> {
    chain: &'a dyn ChainClient,
    signer: &'a dyn TransactionSigner,
    config: OrchestratorConfig,
}

impl<'a> DeploymentOrchestrator<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        signer: &'a dyn TransactionSigner,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            chain,
            signer,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Checks the configuration before anything touches the chain.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        validate_network(&self.config.network)?;
        if self.config.roles.is_empty() {
            return Err(OrchestratorError::NoRoles);
        }
        if let FactoryConfig::Bootstrap { creation_code } = &self.config.factory {
            if creation_code.is_empty() {
                return Err(OrchestratorError::InvalidCreationCode {
                    role: "factory".into(),
                });
            }
        }
        let mut names = HashSet::new();
        let mut labels = HashSet::new();
        for role in &self.config.roles {
            if !names.insert(role.name.as_str()) || !labels.insert(role.label.as_str()) {
                return Err(OrchestratorError::DuplicateRole(role.name.clone()));
            }
            if role.creation_code.is_empty() {
                return Err(OrchestratorError::InvalidCreationCode {
                    role: role.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Salt namespace for a role: `{namespace}-{label}`.
    pub fn role_salt(&self, role: &ResolvedRole, chain_id: u64) -> Salt {
        let namespace = format!("{}-{}", self.config.namespace, role.label);
        derive_salt(
            &namespace,
            self.config.salt_chain_id.unwrap_or(chain_id),
            role.nonce.unwrap_or(self.config.nonce),
        )
    }

    pub fn run(&self) -> Result<DeploymentOutcome, OrchestratorError> {
        self.validate()?;
        let chain_id = self.chain.chain_id()?;
        let deployer = self.signer.address();
        // a bootstrapped factory's address follows from the deployer's nonce
        let lock_target = match &self.config.factory {
            FactoryConfig::Existing(address) => *address,
            FactoryConfig::Bootstrap { .. } => deployer,
        };
        let _lock = RunLock::acquire(&self.config.lock_dir, chain_id, &lock_target)?;
        info!(
            network = %self.config.network,
            chain_id,
            %deployer,
            roles = self.config.roles.len(),
            "starting deployment run"
        );

        let (factory, bootstrapped_factory) = self.resolve_factory(&deployer)?;
        let mut ledger = DeploymentLedger::new(self.chain, factory, self.config.gas_limit);
        let owner = ledger.owner()?;
        if owner != deployer {
            return Err(OrchestratorError::NotFactoryOwner {
                factory,
                owner,
                signer: deployer,
            });
        }

        let mut salts = BTreeMap::new();
        let mut contracts = BTreeMap::new();
        let mut cancelled = false;
        for role in &self.config.roles {
            let salt = self.role_salt(role, chain_id);
            let predicted = predict_address(&factory, &salt, &role.creation_code);
            info!(role = %role.name, %salt, address = %predicted, "role address predicted");
            salts.insert(role.name.clone(), salt);

            let entry = if cancelled {
                failed(predicted, role, "run cancelled before this role".into())
            } else {
                let (entry, was_cancelled) = self.deploy_role(&mut ledger, role, salt, predicted);
                cancelled = was_cancelled;
                entry
            };
            contracts.insert(role.name.clone(), entry);
        }

        // a role whose runtime code could not be read cannot be verified later
        let complete = contracts.values().all(|c| {
            matches!(c.status, RoleStatus::Deployed | RoleStatus::AlreadyDeployed)
                && c.bytecode_hash.is_some()
        });
        let record = DeploymentRecord {
            network: self.config.network.clone(),
            chain_id,
            timestamp: Utc::now(),
            deployer,
            create2: FactoryMetadata {
                factory,
                base_salt: self.config.namespace.clone(),
                nonce: self.config.nonce,
                salt_chain_id: self.config.salt_chain_id,
            },
            salts,
            contracts,
            config: self.config.config.clone(),
            complete,
        };
        if !complete {
            warn!(network = %record.network, "deployment incomplete; rerun to finish");
        }
        let path = RecordStore::new(&self.config.output_dir).write_deployment(&record)?;

        Ok(DeploymentOutcome {
            record,
            path,
            bootstrapped_factory,
        })
    }

    fn resolve_factory(
        &self,
        deployer: &Address,
    ) -> Result<(Address, Option<Address>), OrchestratorError> {
        match &self.config.factory {
            FactoryConfig::Existing(address) => {
                if self.chain.get_code(address)?.is_empty() {
                    return Err(OrchestratorError::FactoryMissing(*address));
                }
                Ok((*address, None))
            }
            FactoryConfig::Bootstrap { creation_code } => {
                let expected = create_address(deployer, self.chain.transaction_count(deployer)?);
                info!(address = %expected, "deploying factory");
                let request = TransactionRequest::create(creation_code.clone(), self.config.gas_limit);
                let receipt = send_transaction(self.chain, self.signer, request)
                    .map_err(|e| OrchestratorError::FactoryBootstrap(e.to_string()))?;
                let address = receipt.contract_address.unwrap_or(expected);
                if address != expected {
                    return Err(OrchestratorError::FactoryBootstrap(format!(
                        "factory landed at {address}, expected {expected}"
                    )));
                }
                if self.chain.get_code(&address)?.is_empty() {
                    return Err(OrchestratorError::FactoryMissing(address));
                }
                warn!(%address, "factory deployed; pin this address in the plan for reruns");
                Ok((address, Some(address)))
            }
        }
    }

    /// Deploys and configures one role. The flag reports a cancelled signature.
    fn deploy_role(
        &self,
        ledger: &mut DeploymentLedger<'_>,
        role: &ResolvedRole,
        salt: Salt,
        predicted: Address,
    ) -> (ContractRecord, bool) {
        let mut entry = ContractRecord {
            address: predicted,
            bytecode_hash: None,
            status: RoleStatus::Deployed,
            deployed_at_block: None,
            transaction_hash: None,
            error: None,
            metadata: role.metadata.clone(),
        };

        match ledger.record_deployment(self.signer, salt, &role.creation_code) {
            Ok(deployment) => {
                info!(role = %role.name, address = %deployment.entry.address, "role deployed");
                entry.deployed_at_block = Some(deployment.entry.deployed_at_block);
                entry.transaction_hash = Some(deployment.transaction_hash);
            }
            Err(LedgerError::SaltAlreadyUsed { .. }) => match ledger.has_code(&predicted) {
                Ok(true) => {
                    warn!(role = %role.name, address = %predicted, "salt already used, skipping deployment");
                    entry.status = RoleStatus::AlreadyDeployed;
                }
                Ok(false) => {
                    error!(role = %role.name, %salt, "salt consumed by different creation code");
                    return (
                        failed(predicted, role, format!("salt {salt} consumed by different creation code")),
                        false,
                    );
                }
                Err(e) => return (failed(predicted, role, e.to_string()), false),
            },
            Err(e) => {
                error!(role = %role.name, error = %e, "deployment failed");
                let cancelled = matches!(e, LedgerError::Signer(SignerError::Cancelled));
                return (failed(predicted, role, e.to_string()), cancelled);
            }
        }

        match ledger.bytecode_hash(&predicted) {
            Ok(hash) => entry.bytecode_hash = Some(hash),
            Err(e) => {
                warn!(role = %role.name, error = %e, "could not read runtime code");
                entry.error = Some(e.to_string());
            }
        }

        for call in &role.post_deploy {
            match self.configure(&predicted, call) {
                Ok(true) => info!(role = %role.name, call = %call.description, "configured"),
                Ok(false) => {
                    debug!(role = %role.name, call = %call.description, "already configured, skipping")
                }
                Err(e) => {
                    error!(role = %role.name, call = %call.description, error = %e, "configuration failed");
                    entry.status = RoleStatus::ConfigurationFailed;
                    entry.error = Some(format!("{}: {e}", call.description));
                    let cancelled = matches!(e, SendError::Signer(SignerError::Cancelled));
                    return (entry, cancelled);
                }
            }
        }
        (entry, false)
    }

    /// Sends `call` unless its check shows it already took effect.
    /// Returns whether a transaction was sent.
    fn configure(&self, target: &Address, call: &PostDeployCall) -> Result<bool, SendError> {
        if let Some(check) = &call.check {
            if self.check_satisfied(target, check)? {
                return Ok(false);
            }
        }
        let request = TransactionRequest::call(*target, call.calldata(), self.config.gas_limit);
        send_transaction(self.chain, self.signer, request)?;
        Ok(true)
    }

    fn check_satisfied(&self, target: &Address, check: &CallCheck) -> Result<bool, ChainError> {
        let data = abi::encode_call(&check.signature, &check.args);
        match self.chain.call(target, &data) {
            // opaque or unexpected output counts as not yet set
            Ok(out) => Ok(out == abi::encode_values(std::slice::from_ref(&check.expect))),
            Err(ChainError::Reverted { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn failed(address: Address, role: &ResolvedRole, error: String) -> ContractRecord {
    ContractRecord {
        address,
        bytecode_hash: None,
        status: RoleStatus::DeployFailed,
        deployed_at_block: None,
        transaction_hash: None,
        error: Some(error),
        metadata: role.metadata.clone(),
    }
}
