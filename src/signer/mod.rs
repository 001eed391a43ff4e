//! Signing backends.
//!
//! Everything downstream of [`SignerProvider::acquire`] sees only a
//! [`TransactionSigner`]; which backend produced it is not observable.

mod emulator;
mod hardware;
mod software;

pub use emulator::{EmulatedConnector, EmulatorMode};
pub use hardware::{DeviceConnector, DeviceSession, HardwareSigner, NoTransport};
pub use software::SoftwareSigner;

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::{SignedTransaction, UnsignedTransaction};
use crate::crypto::{Address, Keypair};

/// BIP-44 path of the first Ethereum account.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// The capability the deployment pipeline signs with.
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;
    fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("no {0} device found; connect it and open the Ethereum app")]
    DeviceNotFound(String),
    #[error("device is locked; unlock it and retry")]
    DeviceLocked,
    #[error("transaction rejected on device")]
    UserRejected,
    #[error("device error: {0}")]
    DeviceError(String),
    #[error("signing cancelled")]
    Cancelled,
    #[error("address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Address, actual: Address },
    #[error("invalid private key")]
    InvalidKey,
    #[error("no private key configured for the software signer")]
    MissingKey,
}

/// Which backend to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    #[default]
    Software,
    Ledger,
    Trezor,
}

impl fmt::Display for SignerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignerBackend::Software => "software",
            SignerBackend::Ledger => "ledger",
            SignerBackend::Trezor => "trezor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub backend: SignerBackend,
    pub software_key: Option<Keypair>,
    pub derivation_path: String,
    pub expected_address: Option<Address>,
    /// Set to abort a pending device confirmation.
    pub cancel: Arc<AtomicBool>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            backend: SignerBackend::Software,
            software_key: None,
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            expected_address: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Resolves a signer from configuration, once per run.
pub struct SignerProvider;

impl SignerProvider {
    pub fn acquire(
        config: &SignerConfig,
        connector: &dyn DeviceConnector,
    ) -> Result<Box<dyn TransactionSigner>, SignerError> {
        let signer: Box<dyn TransactionSigner> = match config.backend {
            SignerBackend::Software => {
                let key = config.software_key.clone().ok_or(SignerError::MissingKey)?;
                Box::new(SoftwareSigner::new(key))
            }
            SignerBackend::Ledger | SignerBackend::Trezor => {
                info!(backend = %config.backend, path = %config.derivation_path, "connecting to hardware wallet");
                let session = connector.connect(config.backend, &config.derivation_path)?;
                Box::new(HardwareSigner::new(
                    config.backend,
                    session,
                    config.derivation_path.clone(),
                    Arc::clone(&config.cancel),
                )?)
            }
        };

        let actual = signer.address();
        if let Some(expected) = config.expected_address {
            if expected != actual {
                return Err(SignerError::AddressMismatch { expected, actual });
            }
        }
        info!(backend = %config.backend, address = %actual, "signer ready");
        Ok(signer)
    }
}
