//! In-memory chain for tests and `--simulate` dry runs.
//!
//! Contracts are modelled by behaviour rather than by executing bytecode:
//! a CREATE2 factory with an authoritative salt ledger, the Safe proxy
//! factory, Safe proxies, and "toggle registries" (router-style
//! `setX(address,bool)` / `x(address)` pairs). Runtime code is derived
//! from creation code and never equals it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{SolCall, SolInterface, SolValue};

use super::{ChainClient, ChainError, Receipt, SignedTransaction};
use crate::abi::{self, ICreate2Factory, ISafe, ISafeProxyFactory};
use crate::crypto::{create_address, keccak256, predict_address, safe_address, Address, Salt, B256};
use crate::ledger::{LedgerEntry, SaltLedger};

use ICreate2Factory::ICreate2FactoryCalls as FactoryCall;
use ISafe::ISafeCalls as SafeCall;
use ISafeProxyFactory::ISafeProxyFactoryCalls as ProxyFactoryCall;

/// How a contract deployed on the simulated chain responds to calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractBehavior {
    /// CREATE2 factory; owner is the account that created it.
    Create2Factory,
    /// Safe proxy factory handing out proxies of `proxy_creation_code`.
    SafeProxyFactory { proxy_creation_code: Vec<u8> },
    /// Boolean flags keyed by address: `(setter, getter)` signature pairs.
    ToggleRegistry { toggles: Vec<(String, String)> },
    /// Accepts any call and returns nothing.
    Opaque,
}

#[derive(Debug, Clone)]
enum ContractState {
    Create2Factory { owner: Address, ledger: SaltLedger },
    SafeProxyFactory { proxy_creation_code: Vec<u8> },
    Safe { owners: Vec<Address>, threshold: u64 },
    Toggles {
        toggles: Vec<([u8; 4], [u8; 4])>,
        set: HashSet<([u8; 4], Address)>,
    },
    Opaque,
}

#[derive(Debug, Clone)]
struct Contract {
    code: Vec<u8>,
    state: ContractState,
}

#[derive(Debug, Default, Clone, Copy)]
struct Account {
    nonce: u64,
    balance: u128,
}

#[derive(Debug)]
struct State {
    chain_id: u64,
    block: u64,
    gas_price: u128,
    accounts: HashMap<Address, Account>,
    contracts: HashMap<Address, Contract>,
    behaviors: HashMap<[u8; 32], ContractBehavior>,
    runtime_overrides: HashMap<[u8; 32], Vec<u8>>,
    failing_code: HashSet<[u8; 32]>,
}

/// A single in-memory chain.
#[derive(Debug)]
pub struct SimulatedChain {
    state: Mutex<State>,
}

type Revert = String;

impl SimulatedChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Mutex::new(State {
                chain_id,
                block: 1,
                gas_price: 1_000_000_000,
                accounts: HashMap::new(),
                contracts: HashMap::new(),
                behaviors: HashMap::new(),
                runtime_overrides: HashMap::new(),
                failing_code: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, ChainError> {
        self.state
            .lock()
            .map_err(|_| ChainError::Transport("simulated chain state poisoned".into()))
    }

    /// Credits `amount` wei to `address`.
    pub fn fund(&self, address: Address, amount: u128) {
        if let Ok(mut state) = self.state.lock() {
            let account = state.accounts.entry(address).or_default();
            account.balance = account.balance.saturating_add(amount);
        }
    }

    /// Contracts created from `creation_code` get `behavior`.
    pub fn register_behavior(&self, creation_code: &[u8], behavior: ContractBehavior) {
        if let Ok(mut state) = self.state.lock() {
            state.behaviors.insert(keccak256(creation_code), behavior);
        }
    }

    /// Places a contract at a fixed address, as if deployed in genesis.
    pub fn install_contract(
        &self,
        address: Address,
        creation_code: &[u8],
        behavior: ContractBehavior,
        owner: Address,
    ) {
        if let Ok(mut state) = self.state.lock() {
            let code = state.runtime_code(creation_code);
            let contract_state = instantiate(&behavior, owner);
            state.contracts.insert(
                address,
                Contract {
                    code,
                    state: contract_state,
                },
            );
        }
    }

    /// Deployments of `creation_code` through a factory revert until cleared.
    pub fn fail_deployments_of(&self, creation_code: &[u8]) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_code.insert(keccak256(creation_code));
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_code.clear();
        }
    }

    /// Makes `creation_code` produce `runtime` instead of the derived runtime code,
    /// e.g. to model immutables baked in differently on one chain.
    pub fn override_runtime_code(&self, creation_code: &[u8], runtime: Vec<u8>) {
        if let Ok(mut state) = self.state.lock() {
            state.runtime_overrides.insert(keccak256(creation_code), runtime);
        }
    }

    /// The factory's authoritative ledger entry for `salt`.
    pub fn factory_entry(&self, factory: &Address, salt: &Salt) -> Option<LedgerEntry> {
        let state = self.state.lock().ok()?;
        match &state.contracts.get(factory)?.state {
            ContractState::Create2Factory { ledger, .. } => ledger.entry(salt).cloned(),
            _ => None,
        }
    }

    /// Number of deployments the factory has recorded.
    pub fn factory_deployment_count(&self, factory: &Address) -> usize {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        match state.contracts.get(factory).map(|c| &c.state) {
            Some(ContractState::Create2Factory { ledger, .. }) => ledger.len(),
            _ => 0,
        }
    }
}

/// Runtime code the simulator stores for a given creation code.
pub(crate) fn derived_runtime_code(creation_code: &[u8]) -> Vec<u8> {
    let mut code = vec![0x60, 0x80, 0x60, 0x40, 0x52, 0xfe];
    code.extend_from_slice(&keccak256(creation_code));
    code
}

fn instantiate(behavior: &ContractBehavior, owner: Address) -> ContractState {
    match behavior {
        ContractBehavior::Create2Factory => ContractState::Create2Factory {
            owner,
            ledger: SaltLedger::new(),
        },
        ContractBehavior::SafeProxyFactory {
            proxy_creation_code,
        } => ContractState::SafeProxyFactory {
            proxy_creation_code: proxy_creation_code.clone(),
        },
        ContractBehavior::ToggleRegistry { toggles } => ContractState::Toggles {
            toggles: toggles
                .iter()
                .map(|(setter, getter)| (abi::selector(setter), abi::selector(getter)))
                .collect(),
            set: HashSet::new(),
        },
        ContractBehavior::Opaque => ContractState::Opaque,
    }
}

fn split_selector(data: &[u8]) -> Result<([u8; 4], &[u8]), Revert> {
    if data.len() < 4 {
        return Err("missing function selector".into());
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&data[..4]);
    Ok((selector, &data[4..]))
}

/// Decodes calldata against one of the contract interfaces.
fn decode_call<C: SolInterface>(data: &[u8], contract: &str) -> Result<C, Revert> {
    let (selector, _) = split_selector(data)?;
    if !C::valid_selector(selector) {
        return Err(format!("unknown {contract} function"));
    }
    C::abi_decode(data).map_err(|e| format!("malformed calldata: {e}"))
}

fn decode_args<T: SolValue>(args: &[u8]) -> Result<T, Revert>
where
    T: From<<T::SolType as alloy_sol_types::SolType>::RustType>,
    for<'de> <T::SolType as alloy_sol_types::SolType>::Token<'de>: alloy_sol_types::abi::TokenSeq<'de>,
{
    T::abi_decode_params(args).map_err(|e| format!("malformed calldata: {e}"))
}

impl State {
    fn runtime_code(&self, creation_code: &[u8]) -> Vec<u8> {
        let hash = keccak256(creation_code);
        self.runtime_overrides
            .get(&hash)
            .cloned()
            .unwrap_or_else(|| derived_runtime_code(creation_code))
    }

    fn new_contract(&self, creation_code: &[u8], owner: Address) -> Contract {
        let behavior = self
            .behaviors
            .get(&keccak256(creation_code))
            .cloned()
            .unwrap_or(ContractBehavior::Opaque);
        Contract {
            code: self.runtime_code(creation_code),
            state: instantiate(&behavior, owner),
        }
    }

    fn view(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, Revert> {
        let Some(contract) = self.contracts.get(to) else {
            return Ok(Vec::new());
        };

        match &contract.state {
            ContractState::Create2Factory { owner, ledger } => {
                Ok(match decode_call::<FactoryCall>(data, "factory")? {
                    FactoryCall::saltUsed(c) => ledger.is_used(&B256::from(c.salt)).abi_encode(),
                    FactoryCall::isDeployed(c) => {
                        ledger.is_deployed(&Address::from(c.target)).abi_encode()
                    }
                    FactoryCall::hasCode(c) => self
                        .contracts
                        .contains_key(&Address::from(c.target))
                        .abi_encode(),
                    FactoryCall::deploymentCount(_) => U256::from(ledger.len()).abi_encode(),
                    FactoryCall::getDeployedBytecodeHash(c) => {
                        let hash = self
                            .contracts
                            .get(&Address::from(c.target))
                            .map(|c| B256::from_bytes(keccak256(&c.code)))
                            .unwrap_or(B256::ZERO);
                        alloy_primitives::B256::from(hash).abi_encode()
                    }
                    FactoryCall::owner(_) => alloy_primitives::Address::from(*owner).abi_encode(),
                    FactoryCall::deployWithConstructor(_) => {
                        return Err("deployWithConstructor is not a view".into())
                    }
                })
            }
            ContractState::SafeProxyFactory {
                proxy_creation_code,
            } => match decode_call::<ProxyFactoryCall>(data, "proxy factory")? {
                ProxyFactoryCall::proxyCreationCode(_) => {
                    Ok(Bytes::from(proxy_creation_code.clone()).abi_encode())
                }
                ProxyFactoryCall::createProxyWithNonce(_) => {
                    Err("createProxyWithNonce is not a view".into())
                }
            },
            ContractState::Safe { owners, threshold } => {
                Ok(match decode_call::<SafeCall>(data, "safe")? {
                    SafeCall::getOwners(_) => owners
                        .iter()
                        .map(|o| alloy_primitives::Address::from(*o))
                        .collect::<Vec<_>>()
                        .abi_encode(),
                    SafeCall::getThreshold(_) => U256::from(*threshold).abi_encode(),
                    SafeCall::isOwner(c) => owners.contains(&Address::from(c.owner)).abi_encode(),
                    SafeCall::setup(_) => return Err("setup is not a view".into()),
                })
            }
            ContractState::Toggles { toggles, set } => {
                let (selector, args) = split_selector(data)?;
                let getter = toggles.iter().find(|(_, g)| *g == selector);
                match getter {
                    Some((setter, _)) => {
                        let (key,) = decode_args::<(alloy_primitives::Address,)>(args)?;
                        Ok(set.contains(&(*setter, Address::from(key))).abi_encode())
                    }
                    None => Err("unknown registry function".into()),
                }
            }
            ContractState::Opaque => Ok(Vec::new()),
        }
    }

    /// Executes a transaction body; on `Err` the caller discards all effects.
    fn execute(
        &mut self,
        sender: Address,
        sender_nonce: u64,
        to: Option<Address>,
        data: &[u8],
    ) -> Result<Option<Address>, Revert> {
        let Some(to) = to else {
            let address = create_address(&sender, sender_nonce);
            if self.contracts.contains_key(&address) {
                return Err("contract already exists at CREATE address".into());
            }
            let contract = self.new_contract(data, sender);
            self.contracts.insert(address, contract);
            return Ok(Some(address));
        };

        let Some(contract) = self.contracts.get(&to) else {
            // plain value transfer to an account without code
            return Ok(None);
        };

        match contract.state.clone() {
            ContractState::Create2Factory { owner, .. } => {
                let FactoryCall::deployWithConstructor(call) =
                    decode_call::<FactoryCall>(data, "factory")?
                else {
                    return Err("factory views cannot be transacted".into());
                };
                if sender != owner {
                    return Err(format!("OwnableUnauthorizedAccount({sender})"));
                }
                let creation_code = call.bytecode.to_vec();
                let salt = B256::from(call.salt);
                if creation_code.is_empty() {
                    return Err("InvalidBytecode".into());
                }
                if self.failing_code.contains(&keccak256(&creation_code)) {
                    return Err("constructor reverted".into());
                }
                let address = predict_address(&to, &salt, &creation_code);
                if self.contracts.contains_key(&address) {
                    return Err("Create2FailedDeployment".into());
                }
                let block = self.block;
                let child = self.new_contract(&creation_code, sender);
                if let Some(Contract {
                    state: ContractState::Create2Factory { ledger, .. },
                    ..
                }) = self.contracts.get_mut(&to)
                {
                    ledger
                        .record_deployment(salt, address, &creation_code, sender, block)
                        .map_err(|e| match e {
                            crate::ledger::LedgerError::SaltAlreadyUsed { .. } => {
                                "SaltAlreadyUsed".to_string()
                            }
                            other => other.to_string(),
                        })?;
                }
                self.contracts.insert(address, child);
                Ok(Some(address))
            }
            ContractState::SafeProxyFactory {
                proxy_creation_code,
            } => {
                let ProxyFactoryCall::createProxyWithNonce(call) =
                    decode_call::<ProxyFactoryCall>(data, "proxy factory")?
                else {
                    return Err("proxy factory views cannot be transacted".into());
                };
                let singleton = Address::from(call._singleton);
                let initializer = call.initializer.to_vec();
                let salt_nonce: [u8; 32] = call.saltNonce.to_be_bytes();

                let setup = ISafe::setupCall::abi_decode(&initializer)
                    .map_err(|_| "initializer is not Safe.setup".to_string())?;
                let owners: Vec<Address> = setup._owners.into_iter().map(Address::from).collect();
                let threshold =
                    u64::try_from(setup._threshold).map_err(|_| "GS201".to_string())?;
                if threshold == 0 {
                    return Err("GS202".into());
                }
                if threshold as usize > owners.len() {
                    return Err("GS201".into());
                }
                let unique: HashSet<_> = owners.iter().collect();
                if unique.len() != owners.len() || owners.iter().any(Address::is_zero) {
                    return Err("GS204".into());
                }

                let address = safe_address(
                    &to,
                    &proxy_creation_code,
                    &singleton,
                    &initializer,
                    &salt_nonce,
                );
                if self.contracts.contains_key(&address) {
                    return Err("Create2 call failed".into());
                }
                let mut init_code = proxy_creation_code.clone();
                init_code.extend_from_slice(&singleton.to_word());
                self.contracts.insert(
                    address,
                    Contract {
                        code: self.runtime_code(&init_code),
                        state: ContractState::Safe { owners, threshold },
                    },
                );
                Ok(Some(address))
            }
            ContractState::Toggles { toggles, .. } => {
                let (selector, args) = split_selector(data)?;
                let Some((setter, _)) = toggles.iter().find(|(s, _)| *s == selector) else {
                    return Err("unknown registry function".into());
                };
                let (key, enabled) = decode_args::<(alloy_primitives::Address, bool)>(args)?;
                let key = Address::from(key);
                if let Some(Contract {
                    state: ContractState::Toggles { set, .. },
                    ..
                }) = self.contracts.get_mut(&to)
                {
                    if enabled {
                        set.insert((*setter, key));
                    } else {
                        set.remove(&(*setter, key));
                    }
                }
                Ok(None)
            }
            ContractState::Safe { .. } => Err("Safe transactions are not simulated".into()),
            ContractState::Opaque => Ok(None),
        }
    }
}

impl ChainClient for SimulatedChain {
    fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.state()?.chain_id)
    }

    fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state()?.block)
    }

    fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError> {
        Ok(self
            .state()?
            .contracts
            .get(address)
            .map(|c| c.code.clone())
            .unwrap_or_default())
    }

    fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.state()?
            .view(to, data)
            .map_err(|reason| ChainError::Reverted {
                reason,
                transaction: None,
            })
    }

    fn transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self
            .state()?
            .accounts
            .get(address)
            .map(|a| a.nonce)
            .unwrap_or(0))
    }

    fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.state()?.gas_price)
    }

    fn balance(&self, address: &Address) -> Result<u128, ChainError> {
        Ok(self
            .state()?
            .accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or(0))
    }

    fn submit_transaction(&self, signed: &SignedTransaction) -> Result<Receipt, ChainError> {
        let mut state = self.state()?;
        let tx = signed.transaction();

        if tx.chain_id != state.chain_id {
            return Err(ChainError::WrongChain {
                expected: state.chain_id,
                got: tx.chain_id,
            });
        }
        let sender = signed
            .recover_sender()
            .map_err(|_| ChainError::InvalidSignature)?;
        let account = state.accounts.get(&sender).copied().unwrap_or_default();
        if tx.nonce != account.nonce {
            return Err(ChainError::NonceMismatch {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        let max_cost = tx
            .gas_price
            .saturating_mul(u128::from(tx.gas_limit))
            .saturating_add(tx.value);
        if account.balance < max_cost {
            return Err(ChainError::InsufficientFunds(format!(
                "{sender} has {} wei, needs {max_cost}",
                account.balance
            )));
        }

        let intrinsic = 21_000 + 16 * tx.data.len() as u64;
        let fee = tx.gas_price * u128::from(intrinsic.min(tx.gas_limit));
        {
            let account = state.accounts.entry(sender).or_default();
            account.nonce += 1;
            account.balance -= fee;
        }
        state.block += 1;
        let block = state.block;

        // Effects are applied to a scratch copy and kept only on success.
        let mut scratch = State {
            chain_id: state.chain_id,
            block,
            gas_price: state.gas_price,
            accounts: HashMap::new(),
            contracts: state.contracts.clone(),
            behaviors: state.behaviors.clone(),
            runtime_overrides: state.runtime_overrides.clone(),
            failing_code: state.failing_code.clone(),
        };
        let outcome = scratch.execute(sender, tx.nonce, tx.to, &tx.data);

        let hash = signed.hash();
        let receipt = match outcome {
            Ok(contract_address) => {
                state.contracts = scratch.contracts;
                if let Some(to) = tx.to {
                    if tx.value > 0 {
                        if let Some(from) = state.accounts.get_mut(&sender) {
                            from.balance -= tx.value;
                        }
                        state.accounts.entry(to).or_default().balance += tx.value;
                    }
                }
                Receipt {
                    transaction_hash: hash,
                    block_number: block,
                    contract_address: if tx.to.is_none() {
                        contract_address
                    } else {
                        None
                    },
                    success: true,
                    revert_reason: None,
                }
            }
            Err(reason) => {
                debug!(tx = %hash, %reason, "simulated transaction reverted");
                Receipt {
                    transaction_hash: hash,
                    block_number: block,
                    contract_address: None,
                    success: false,
                    revert_reason: Some(reason),
                }
            }
        };
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiValue;
    use crate::chain::UnsignedTransaction;
    use crate::crypto::{derive_salt, Keypair};

    const ETHER: u128 = 1_000_000_000_000_000_000;

    fn send(chain: &SimulatedChain, kp: &Keypair, to: Option<Address>, data: Vec<u8>) -> Receipt {
        let tx = UnsignedTransaction {
            chain_id: chain.chain_id().unwrap(),
            nonce: chain.transaction_count(kp.address()).unwrap(),
            gas_price: chain.gas_price().unwrap(),
            gas_limit: 3_000_000,
            to,
            value: 0,
            data,
        };
        let sig = kp.sign_digest(&tx.signing_hash());
        chain.submit_transaction(&tx.with_signature(sig)).unwrap()
    }

    fn deploy_call(code: &[u8], salt: Salt) -> Vec<u8> {
        ICreate2Factory::deployWithConstructorCall {
            bytecode: code.to_vec().into(),
            salt: salt.into(),
        }
        .abi_encode()
    }

    fn setup() -> (SimulatedChain, Keypair, Address) {
        let chain = SimulatedChain::new(31337);
        let kp = Keypair::generate();
        chain.fund(*kp.address(), 10 * ETHER);
        chain.register_behavior(b"factory", ContractBehavior::Create2Factory);
        let receipt = send(&chain, &kp, None, b"factory".to_vec());
        let factory = receipt.contract_address.unwrap();
        (chain, kp, factory)
    }

    #[test]
    fn test_create_uses_sender_nonce() {
        let (_, kp, factory) = setup();
        assert_eq!(factory, create_address(kp.address(), 0));
    }

    #[test]
    fn test_factory_deploys_at_predicted_address() {
        let (chain, kp, factory) = setup();
        let salt = derive_salt("treasury", 31337, 0);
        let code = b"treasury-creation-code".to_vec();

        let receipt = send(&chain, &kp, Some(factory), deploy_call(&code, salt));
        assert!(receipt.success);

        let predicted = predict_address(&factory, &salt, &code);
        let runtime = chain.get_code(&predicted).unwrap();
        assert!(!runtime.is_empty());
        assert_ne!(runtime, code);
        let entry = chain.factory_entry(&factory, &salt).unwrap();
        assert_eq!(entry.address, predicted);
        assert_eq!(entry.deployed_at_block, receipt.block_number);
    }

    #[test]
    fn test_factory_rejects_reused_salt_and_empty_code() {
        let (chain, kp, factory) = setup();
        let salt = derive_salt("treasury", 31337, 0);

        assert!(send(&chain, &kp, Some(factory), deploy_call(b"a", salt)).success);
        let again = send(&chain, &kp, Some(factory), deploy_call(b"b", salt));
        assert!(!again.success);
        assert_eq!(again.revert_reason.as_deref(), Some("SaltAlreadyUsed"));

        let empty = send(&chain, &kp, Some(factory), deploy_call(b"", B256::ZERO));
        assert_eq!(empty.revert_reason.as_deref(), Some("InvalidBytecode"));
        assert_eq!(chain.factory_deployment_count(&factory), 1);
    }

    #[test]
    fn test_factory_is_owner_only() {
        let (chain, _, factory) = setup();
        let stranger = Keypair::generate();
        chain.fund(*stranger.address(), ETHER);
        let receipt = send(&chain, &stranger, Some(factory), deploy_call(b"a", B256::ZERO));
        assert!(receipt
            .revert_reason
            .unwrap()
            .starts_with("OwnableUnauthorizedAccount"));
    }

    #[test]
    fn test_rejects_stale_nonce_and_unfunded_sender() {
        let (chain, kp, _) = setup();
        let tx = UnsignedTransaction {
            chain_id: 31337,
            nonce: 0,
            gas_price: 1,
            gas_limit: 21_000,
            to: Some(Address::ZERO),
            value: 0,
            data: vec![],
        };
        let signed = tx.clone().with_signature(kp.sign_digest(&tx.signing_hash()));
        assert!(matches!(
            chain.submit_transaction(&signed),
            Err(ChainError::NonceMismatch { expected: 1, got: 0 })
        ));

        let poor = Keypair::generate();
        let signed = tx.clone().with_signature(poor.sign_digest(&tx.signing_hash()));
        assert!(matches!(
            chain.submit_transaction(&signed),
            Err(ChainError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn test_toggle_registry_set_and_read() {
        let (chain, kp, _) = setup();
        chain.register_behavior(
            b"router",
            ContractBehavior::ToggleRegistry {
                toggles: vec![(
                    "setSupportedToken(address,bool)".into(),
                    "supportedTokens(address)".into(),
                )],
            },
        );
        let router = send(&chain, &kp, None, b"router".to_vec())
            .contract_address
            .unwrap();
        let token: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let set = abi::encode_call(
            "setSupportedToken(address,bool)",
            &[AbiValue::Address(token), AbiValue::Bool(true)],
        );
        assert!(send(&chain, &kp, Some(router), set.clone()).success);
        assert!(send(&chain, &kp, Some(router), set).success);

        let query = abi::encode_call("supportedTokens(address)", &[AbiValue::Address(token)]);
        let out = chain.call(&router, &query).unwrap();
        assert!(bool::abi_decode(&out).unwrap());

        let unknown = abi::encode_call("bogus(address)", &[AbiValue::Address(token)]);
        let receipt = send(&chain, &kp, Some(router), unknown);
        assert_eq!(receipt.revert_reason.as_deref(), Some("unknown registry function"));
    }

    #[test]
    fn test_factory_views_answer_through_interface() {
        let (chain, kp, factory) = setup();
        let salt = derive_salt("treasury", 31337, 0);
        assert!(send(&chain, &kp, Some(factory), deploy_call(b"treasury", salt)).success);

        let out = chain
            .call(&factory, &ICreate2Factory::saltUsedCall { salt: salt.into() }.abi_encode())
            .unwrap();
        assert!(ICreate2Factory::saltUsedCall::abi_decode_returns(&out).unwrap());
        let out = chain
            .call(&factory, &ICreate2Factory::ownerCall {}.abi_encode())
            .unwrap();
        let owner = ICreate2Factory::ownerCall::abi_decode_returns(&out).unwrap();
        assert_eq!(Address::from(owner), *kp.address());

        let err = chain.call(&factory, &[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert_eq!(err.revert_reason(), Some("unknown factory function"));
    }
}
