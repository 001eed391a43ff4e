//! Hardware wallet signing.
//!
//! Vendor transports (USB HID, Bridge) sit behind [`DeviceConnector`] and
//! [`DeviceSession`]. The signer itself only forwards the EIP-155 signing
//! payload and waits for the device's answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use super::{SignerBackend, SignerError, TransactionSigner};
use crate::chain::{SignedTransaction, UnsignedTransaction};
use crate::crypto::{Address, Signature};

/// How often the confirmation wait checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Opens a session with a physical (or emulated) device.
pub trait DeviceConnector: Send + Sync {
    fn connect(
        &self,
        backend: SignerBackend,
        derivation_path: &str,
    ) -> Result<Box<dyn DeviceSession>, SignerError>;
}

/// An open device session bound to one derivation path.
pub trait DeviceSession: Send + Sync {
    fn address(&self) -> Result<Address, SignerError>;

    /// Shows `payload` on the device and returns a channel that yields the
    /// user's decision. The answer may take arbitrarily long.
    fn request_signature(
        &self,
        payload: &[u8],
    ) -> Result<Receiver<Result<Signature, SignerError>>, SignerError>;
}

/// Connector for builds without a vendor transport.
pub struct NoTransport;

impl DeviceConnector for NoTransport {
    fn connect(
        &self,
        backend: SignerBackend,
        _derivation_path: &str,
    ) -> Result<Box<dyn DeviceSession>, SignerError> {
        Err(SignerError::DeviceNotFound(backend.to_string()))
    }
}

pub struct HardwareSigner {
    backend: SignerBackend,
    session: Box<dyn DeviceSession>,
    address: Address,
    derivation_path: String,
    cancel: Arc<AtomicBool>,
}

impl HardwareSigner {
    pub fn new(
        backend: SignerBackend,
        session: Box<dyn DeviceSession>,
        derivation_path: String,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, SignerError> {
        let address = session.address()?;
        Ok(Self {
            backend,
            session,
            address,
            derivation_path,
            cancel,
        })
    }

    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }

    fn await_confirmation(
        &self,
        answer: Receiver<Result<Signature, SignerError>>,
    ) -> Result<Signature, SignerError> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(backend = %self.backend, "signing cancelled while awaiting device");
                return Err(SignerError::Cancelled);
            }
            match answer.recv_timeout(CANCEL_POLL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SignerError::DeviceError("device disconnected".into()))
                }
            }
        }
    }
}

impl TransactionSigner for HardwareSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        let answer = self.session.request_signature(&tx.signing_payload())?;
        info!(backend = %self.backend, nonce = tx.nonce, "confirm the transaction on your device");
        let signature = self.await_confirmation(answer)?;

        let signed = tx.clone().with_signature(signature);
        match signed.recover_sender() {
            Ok(sender) if sender == self.address => Ok(signed),
            _ => Err(SignerError::DeviceError(
                "device returned a signature for a different account".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;
    use crate::signer::{EmulatedConnector, EmulatorMode};
    use std::thread;

    fn tx() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1,
            nonce: 3,
            gas_price: 1,
            gas_limit: 21_000,
            to: Some(Address::ZERO),
            value: 0,
            data: vec![0xab],
        }
    }

    fn signer(connector: &EmulatedConnector, cancel: Arc<AtomicBool>) -> HardwareSigner {
        let session = connector
            .connect(SignerBackend::Ledger, super::super::DEFAULT_DERIVATION_PATH)
            .unwrap();
        HardwareSigner::new(
            SignerBackend::Ledger,
            session,
            super::super::DEFAULT_DERIVATION_PATH.into(),
            cancel,
        )
        .unwrap()
    }

    #[test]
    fn test_approved_signature() {
        let connector = EmulatedConnector::new(keccak256(b"seed"));
        let signer = signer(&connector, Arc::new(AtomicBool::new(false)));
        let signed = signer.sign_transaction(&tx()).unwrap();
        assert_eq!(signed.recover_sender().unwrap(), signer.address());
        assert_eq!(connector.prompts(), 1);
    }

    #[test]
    fn test_rejection_surfaces() {
        let connector = EmulatedConnector::new(keccak256(b"seed"));
        let signer = signer(&connector, Arc::new(AtomicBool::new(false)));
        connector.set_mode(EmulatorMode::Reject);
        assert_eq!(
            signer.sign_transaction(&tx()).err(),
            Some(SignerError::UserRejected)
        );
    }

    #[test]
    fn test_cancel_aborts_pending_confirmation() {
        let connector = EmulatedConnector::new(keccak256(b"seed"));
        let cancel = Arc::new(AtomicBool::new(false));
        let signer = signer(&connector, Arc::clone(&cancel));
        connector.set_mode(EmulatorMode::Hang);

        let flag = Arc::clone(&cancel);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(
            signer.sign_transaction(&tx()).err(),
            Some(SignerError::Cancelled)
        );
        canceller.join().unwrap();
    }

    #[test]
    fn test_no_transport() {
        assert!(matches!(
            NoTransport.connect(SignerBackend::Ledger, "m/44'/60'/0'/0/0"),
            Err(SignerError::DeviceNotFound(name)) if name == "ledger"
        ));
    }
}
