//! # create2_deploy
//!
//! Deterministic CREATE2 deployments across EVM chains, with after-the-fact
//! verification that every chain received identical code.
//!
//! ## Architecture
//!
//! - `crypto`: Keys, addresses, salt derivation and address prediction
//! - `abi`: Contract interfaces and plan argument encoding
//! - `chain`: Chain access (JSON-RPC and an in-memory simulator)
//! - `signer`: Software and hardware-wallet signing backends
//! - `ledger`: Salt consumption as recorded by the factory
//! - `deploy`: Deployment plans and the per-chain orchestrator
//! - `record`: Persisted deployment and multisig records
//! - `verify`: Cross-chain and live bytecode verification
//! - `multisig`: Safe hierarchy validation and creation
//! - `config`: Command-line configuration

pub mod abi;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod deploy;
pub mod ledger;
pub mod multisig;
pub mod record;
pub mod signer;
pub mod verify;

pub use chain::{ChainClient, RpcClient, SimulatedChain};
pub use config::Cli;
pub use crypto::{derive_salt, predict_address, Address, Keypair, Salt};
pub use deploy::{DeploymentOrchestrator, DeploymentPlan};
pub use ledger::DeploymentLedger;
pub use multisig::{MultisigLevel, MultisigSpec};
pub use record::{DeploymentRecord, RecordStore};
pub use signer::{SignerProvider, TransactionSigner};
pub use verify::{CrossChainVerifier, VerificationReport};
