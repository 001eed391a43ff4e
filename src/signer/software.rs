use super::{SignerError, TransactionSigner};
use crate::chain::{SignedTransaction, UnsignedTransaction};
use crate::crypto::{Address, Keypair};

/// Signs with an in-memory secp256k1 key.
#[derive(Debug, Clone)]
pub struct SoftwareSigner {
    keypair: Keypair,
}

impl SoftwareSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Parses a hex private key, e.g. the contents of a key file.
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        Keypair::from_hex(key)
            .map(Self::new)
            .map_err(|_| SignerError::InvalidKey)
    }
}

impl TransactionSigner for SoftwareSigner {
    fn address(&self) -> Address {
        *self.keypair.address()
    }

    fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        let signature = self.keypair.sign_digest(&tx.signing_hash());
        Ok(tx.clone().with_signature(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex() {
        let signer = SoftwareSigner::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            signer.address().to_hex(),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        assert_eq!(
            SoftwareSigner::from_hex("not a key").err(),
            Some(SignerError::InvalidKey)
        );
    }
}
