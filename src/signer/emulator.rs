//! Software stand-in for a hardware wallet.
//!
//! Keys are derived from a seed and the derivation path, so the same path
//! always yields the same account. The device's behaviour on the next
//! prompt is controlled with [`EmulatorMode`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

use super::{DeviceConnector, DeviceSession, SignerBackend, SignerError};
use crate::crypto::{keccak256, Address, Keypair, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorMode {
    Approve,
    Reject,
    /// Connect fails with `DeviceLocked`.
    Locked,
    /// Connect fails with `DeviceNotFound`.
    Absent,
    /// Prompts are never answered.
    Hang,
}

type Answer = Result<Signature, SignerError>;

#[derive(Clone)]
pub struct EmulatedConnector {
    seed: [u8; 32],
    mode: Arc<Mutex<EmulatorMode>>,
    prompts: Arc<AtomicUsize>,
    // keeps senders of unanswered prompts alive
    pending: Arc<Mutex<Vec<Sender<Answer>>>>,
}

impl EmulatedConnector {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            mode: Arc::new(Mutex::new(EmulatorMode::Approve)),
            prompts: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_mode(&self, mode: EmulatorMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }

    fn mode(&self) -> EmulatorMode {
        self.mode
            .lock()
            .map(|m| *m)
            .unwrap_or(EmulatorMode::Absent)
    }

    /// Number of confirmation prompts shown so far.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Account the emulator exposes at `derivation_path`.
    pub fn account(&self, derivation_path: &str) -> Result<Keypair, SignerError> {
        let mut preimage = self.seed.to_vec();
        preimage.extend_from_slice(derivation_path.as_bytes());
        Keypair::from_secret_key(keccak256(&preimage))
            .map_err(|e| SignerError::DeviceError(e.to_string()))
    }
}

impl DeviceConnector for EmulatedConnector {
    fn connect(
        &self,
        backend: SignerBackend,
        derivation_path: &str,
    ) -> Result<Box<dyn DeviceSession>, SignerError> {
        match self.mode() {
            EmulatorMode::Absent => Err(SignerError::DeviceNotFound(backend.to_string())),
            EmulatorMode::Locked => Err(SignerError::DeviceLocked),
            _ => Ok(Box::new(EmulatedDevice {
                keypair: self.account(derivation_path)?,
                connector: self.clone(),
            })),
        }
    }
}

/// An open emulated session.
pub struct EmulatedDevice {
    keypair: Keypair,
    connector: EmulatedConnector,
}

impl DeviceSession for EmulatedDevice {
    fn address(&self) -> Result<Address, SignerError> {
        Ok(*self.keypair.address())
    }

    fn request_signature(&self, payload: &[u8]) -> Result<Receiver<Answer>, SignerError> {
        self.connector.prompts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(1);
        let answer = match self.connector.mode() {
            EmulatorMode::Approve => Ok(self.keypair.sign_digest(&keccak256(payload))),
            EmulatorMode::Reject => Err(SignerError::UserRejected),
            EmulatorMode::Locked => Err(SignerError::DeviceLocked),
            EmulatorMode::Absent => Err(SignerError::DeviceError("device unplugged".into())),
            EmulatorMode::Hang => {
                if let Ok(mut pending) = self.connector.pending.lock() {
                    pending.push(tx);
                }
                return Ok(rx);
            }
        };
        // capacity 1 and a fresh channel: cannot be full
        let _ = tx.send(answer);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounts_follow_derivation_path() {
        let connector = EmulatedConnector::new([7u8; 32]);
        let a = connector.account("m/44'/60'/0'/0/0").unwrap();
        let b = connector.account("m/44'/60'/0'/0/1").unwrap();
        assert_ne!(a.address(), b.address());
        assert_eq!(
            a.address(),
            connector.account("m/44'/60'/0'/0/0").unwrap().address()
        );
    }

    #[test]
    fn test_connect_failures() {
        let connector = EmulatedConnector::new([7u8; 32]);
        connector.set_mode(EmulatorMode::Locked);
        assert_eq!(
            connector.connect(SignerBackend::Ledger, "m").err(),
            Some(SignerError::DeviceLocked)
        );
        connector.set_mode(EmulatorMode::Absent);
        assert!(matches!(
            connector.connect(SignerBackend::Trezor, "m"),
            Err(SignerError::DeviceNotFound(_))
        ));
    }
}
