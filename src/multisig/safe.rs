//! Safe proxy creation through the canonical proxy factory.

use alloy_primitives::{address, Bytes, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ValidatedMultisig;
use crate::abi::{AbiError, ISafe, ISafeProxyFactory};
use crate::chain::{send_transaction, ChainClient, ChainError, SendError, TransactionRequest};
use crate::crypto::{derive_salt, safe_address, Address, B256};
use crate::signer::{SignerError, TransactionSigner};

/// Safe v1.3.0 contract addresses, identical on every supported chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeContracts {
    pub proxy_factory: Address,
    pub singleton: Address,
    pub fallback_handler: Address,
}

impl Default for SafeContracts {
    fn default() -> Self {
        Self {
            proxy_factory: address!("a6b71e26c5e0845f74c812102ca7114b6a896ab2").into(),
            singleton: address!("d9db270c1b5e3bd161e8c8503c55ceabee709552").into(),
            fallback_handler: address!("f48f2b2d2a534e402487b3ee7c18c33aec0fe5e4").into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SafeError {
    #[error("no Safe proxy factory deployed at {0}")]
    NotDeployed(Address),
    #[error("safe at {address} does not match configuration: {detail}")]
    Mismatch { address: Address, detail: String },
    #[error("malformed Safe response: {0}")]
    Decode(#[from] AbiError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl From<SendError> for SafeError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Chain(e) => SafeError::Chain(e),
            SendError::Signer(e) => SafeError::Signer(e),
        }
    }
}

/// `Safe.setup` calldata: owners, threshold, no module, fallback handler, no payment.
pub fn setup_calldata(owners: &[Address], threshold: u64, fallback_handler: Address) -> Vec<u8> {
    ISafe::setupCall {
        _owners: owners.iter().copied().map(Into::into).collect(),
        _threshold: U256::from(threshold),
        to: alloy_primitives::Address::ZERO,
        data: Bytes::new(),
        fallbackHandler: fallback_handler.into(),
        paymentToken: alloy_primitives::Address::ZERO,
        payment: U256::ZERO,
        paymentReceiver: alloy_primitives::Address::ZERO,
    }
    .abi_encode()
}

/// Deterministic salt nonce for a named Safe.
pub fn default_salt_nonce(name: &str, chain_id: u64, nonce: u64) -> [u8; 32] {
    *derive_salt(name, chain_id, nonce).as_bytes()
}

/// Result of [`SafeCreator::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSafe {
    pub address: Address,
    pub owners: Vec<Address>,
    pub threshold: u64,
    /// `(hash, block)` when this call created the proxy.
    pub transaction: Option<(B256, u64)>,
}

pub struct SafeCreator<'a> {
    chain: &'a dyn ChainClient,
    contracts: SafeContracts,
    gas_limit: u64,
}

impl<'a> SafeCreator<'a> {
    pub fn new(chain: &'a dyn ChainClient, contracts: SafeContracts, gas_limit: u64) -> Self {
        Self {
            chain,
            contracts,
            gas_limit,
        }
    }

    pub fn contracts(&self) -> &SafeContracts {
        &self.contracts
    }

    fn proxy_creation_code(&self) -> Result<Vec<u8>, SafeError> {
        if self.chain.get_code(&self.contracts.proxy_factory)?.is_empty() {
            return Err(SafeError::NotDeployed(self.contracts.proxy_factory));
        }
        let out = self.chain.call(
            &self.contracts.proxy_factory,
            &ISafeProxyFactory::proxyCreationCodeCall {}.abi_encode(),
        )?;
        let code = ISafeProxyFactory::proxyCreationCodeCall::abi_decode_returns(&out)
            .map_err(AbiError::from)?;
        Ok(code.to_vec())
    }

    /// Address the Safe will have, and the initializer that produces it.
    pub fn predict(
        &self,
        multisig: &ValidatedMultisig,
        salt_nonce: &[u8; 32],
    ) -> Result<(Address, Vec<u8>), SafeError> {
        let initializer = setup_calldata(
            &multisig.signers,
            multisig.threshold,
            self.contracts.fallback_handler,
        );
        let address = safe_address(
            &self.contracts.proxy_factory,
            &self.proxy_creation_code()?,
            &self.contracts.singleton,
            &initializer,
            salt_nonce,
        );
        Ok((address, initializer))
    }

    /// Creates the Safe unless it already exists, then checks owners and threshold.
    pub fn create(
        &self,
        signer: &dyn TransactionSigner,
        multisig: &ValidatedMultisig,
        salt_nonce: &[u8; 32],
    ) -> Result<CreatedSafe, SafeError> {
        let (address, initializer) = self.predict(multisig, salt_nonce)?;

        let transaction = if self.chain.get_code(&address)?.is_empty() {
            info!(%address, name = %multisig.name, "creating Safe proxy");
            let data = ISafeProxyFactory::createProxyWithNonceCall {
                _singleton: self.contracts.singleton.into(),
                initializer: initializer.into(),
                saltNonce: U256::from_be_bytes(*salt_nonce),
            }
            .abi_encode();
            let request = TransactionRequest::call(self.contracts.proxy_factory, data, self.gas_limit);
            let receipt = send_transaction(self.chain, signer, request)?;
            Some((receipt.transaction_hash, receipt.block_number))
        } else {
            warn!(%address, "Safe already exists, skipping creation");
            None
        };

        let (owners, threshold) = self.read_back(&address)?;
        let mut expected = multisig.signers.clone();
        let mut actual = owners.clone();
        expected.sort();
        actual.sort();
        if expected != actual {
            return Err(SafeError::Mismatch {
                address,
                detail: format!("owners {actual:?}, expected {expected:?}"),
            });
        }
        if threshold != multisig.threshold {
            return Err(SafeError::Mismatch {
                address,
                detail: format!("threshold {threshold}, expected {}", multisig.threshold),
            });
        }

        Ok(CreatedSafe {
            address,
            owners,
            threshold,
            transaction,
        })
    }

    /// Owners and threshold as the Safe reports them.
    pub fn read_back(&self, safe: &Address) -> Result<(Vec<Address>, u64), SafeError> {
        let out = self
            .chain
            .call(safe, &ISafe::getOwnersCall {}.abi_encode())?;
        let owners = ISafe::getOwnersCall::abi_decode_returns(&out).map_err(AbiError::from)?;
        let out = self
            .chain
            .call(safe, &ISafe::getThresholdCall {}.abi_encode())?;
        let threshold = ISafe::getThresholdCall::abi_decode_returns(&out).map_err(AbiError::from)?;
        let threshold = u64::try_from(threshold).map_err(|_| AbiError::Overflow)?;
        Ok((owners.into_iter().map(Address::from).collect(), threshold))
    }

    pub fn is_owner(&self, safe: &Address, account: &Address) -> Result<bool, SafeError> {
        let call = ISafe::isOwnerCall {
            owner: (*account).into(),
        };
        let out = self.chain.call(safe, &call.abi_encode())?;
        Ok(ISafe::isOwnerCall::abi_decode_returns(&out).map_err(AbiError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ContractBehavior, SimulatedChain};
    use crate::crypto::{keccak256, Keypair};
    use crate::multisig::MultisigSpec;
    use crate::signer::SoftwareSigner;

    const PROXY_CODE: &[u8] = b"safe-proxy-creation-code";

    fn setup() -> (SimulatedChain, SoftwareSigner) {
        let chain = SimulatedChain::new(84532);
        chain.install_contract(
            SafeContracts::default().proxy_factory,
            b"proxy-factory",
            ContractBehavior::SafeProxyFactory {
                proxy_creation_code: PROXY_CODE.to_vec(),
            },
            Address::ZERO,
        );
        let signer = SoftwareSigner::new(Keypair::generate());
        chain.fund(signer.address(), 1_000_000_000_000_000_000);
        (chain, signer)
    }

    fn admin() -> ValidatedMultisig {
        MultisigSpec {
            level: 2,
            name: Some("Admin".into()),
            signers: vec![
                "0x1111111111111111111111111111111111111111".into(),
                "0x2222222222222222222222222222222222222222".into(),
                "0x3333333333333333333333333333333333333333".into(),
            ],
            threshold: 2,
        }
        .validated()
        .unwrap()
    }

    #[test]
    fn test_default_contracts_are_canonical() {
        let c = SafeContracts::default();
        assert_eq!(c.proxy_factory.to_hex(), "a6b71e26c5e0845f74c812102ca7114b6a896ab2");
        assert_eq!(c.singleton.to_hex(), "d9db270c1b5e3bd161e8c8503c55ceabee709552");
        assert_eq!(c.fallback_handler.to_hex(), "f48f2b2d2a534e402487b3ee7c18c33aec0fe5e4");
    }

    #[test]
    fn test_setup_calldata_selector() {
        let data = setup_calldata(&admin().signers, 2, SafeContracts::default().fallback_handler);
        assert_eq!(&data[..4], &[0xb6, 0x3e, 0x80, 0x0d]);
        let decoded = ISafe::setupCall::abi_decode(&data).unwrap();
        let owners: Vec<Address> = decoded._owners.into_iter().map(Address::from).collect();
        assert_eq!(owners, admin().signers);
        assert_eq!(decoded._threshold, U256::from(2));
        assert_eq!(
            Address::from(decoded.fallbackHandler),
            SafeContracts::default().fallback_handler
        );
        // no module setup and no payment
        assert!(decoded.data.is_empty());
        assert_eq!(decoded.payment, U256::ZERO);
        assert_eq!(decoded.to, alloy_primitives::Address::ZERO);
    }

    #[test]
    fn test_create_lands_at_prediction_and_reads_back() {
        let (chain, signer) = setup();
        let creator = SafeCreator::new(&chain, SafeContracts::default(), 1_000_000);
        let multisig = admin();
        let nonce = default_salt_nonce(&multisig.name, 84532, 0);

        let (predicted, _) = creator.predict(&multisig, &nonce).unwrap();
        let created = creator.create(&signer, &multisig, &nonce).unwrap();
        assert_eq!(created.address, predicted);
        assert_eq!(created.threshold, 2);
        assert!(created.transaction.is_some());
        assert!(creator.is_owner(&predicted, &multisig.signers[0]).unwrap());
        assert!(!creator.is_owner(&predicted, &signer.address()).unwrap());

        // rerun finds the Safe and skips the transaction
        let again = creator.create(&signer, &multisig, &nonce).unwrap();
        assert_eq!(again.address, predicted);
        assert!(again.transaction.is_none());
    }

    #[test]
    fn test_missing_proxy_factory() {
        let chain = SimulatedChain::new(1);
        let creator = SafeCreator::new(&chain, SafeContracts::default(), 1_000_000);
        let result = creator.predict(&admin(), &keccak256(b"n"));
        assert!(matches!(result, Err(SafeError::NotDeployed(_))));
    }
}
