//! EIP-155 legacy transactions.

use alloy_consensus::{SignableTransaction, Signed, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Bytes, TxKind, U256};

use crate::crypto::{Address, Signature, B256};

/// A transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
}

impl UnsignedTransaction {
    fn legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: match self.to {
                Some(addr) => TxKind::Call(addr.into()),
                None => TxKind::Create,
            },
            value: U256::from(self.value),
            input: Bytes::from(self.data.clone()),
        }
    }

    /// RLP([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]).
    ///
    /// This is the byte string hardware wallets display and sign.
    pub fn signing_payload(&self) -> Vec<u8> {
        self.legacy().encoded_for_signing()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        self.legacy().signature_hash().0
    }

    pub fn with_signature(self, signature: Signature) -> SignedTransaction {
        let sealed = self.legacy().into_signed(alloy_primitives::Signature::new(
            U256::from_be_bytes(signature.r),
            U256::from_be_bytes(signature.s),
            signature.recovery_id == 1,
        ));
        SignedTransaction {
            tx: self,
            signature,
            sealed,
        }
    }
}

/// A signed transaction as broadcast to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: UnsignedTransaction,
    signature: Signature,
    sealed: Signed<TxLegacy>,
}

impl SignedTransaction {
    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.tx
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// EIP-155 `v`.
    pub fn v(&self) -> u64 {
        u64::from(self.signature.recovery_id) + 35 + 2 * self.tx.chain_id
    }

    /// Raw RLP bytes for `eth_sendRawTransaction`.
    pub fn raw(&self) -> Vec<u8> {
        TxEnvelope::from(self.sealed.clone()).encoded_2718()
    }

    pub fn hash(&self) -> B256 {
        (*self.sealed.hash()).into()
    }

    /// Recovers the sender from the signature.
    pub fn recover_sender(&self) -> Result<Address, secp256k1::Error> {
        self.signature.recover(&self.tx.signing_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keccak256, Keypair};

    fn sample() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1,
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
        }
    }

    /// EIP-155 example transaction.
    #[test]
    fn test_eip155_signing_payload() {
        let payload = sample().signing_payload();
        assert_eq!(
            hex::encode(payload),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(sample().signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_signed_recovers_sender() {
        let kp = Keypair::generate();
        let tx = sample();
        let sig = kp.sign_digest(&tx.signing_hash());
        let signed = tx.with_signature(sig);
        assert_eq!(signed.recover_sender().unwrap(), *kp.address());
        assert!(signed.v() == 37 || signed.v() == 38);
        assert_eq!(signed.hash(), B256::from_bytes(keccak256(&signed.raw())));
    }

    /// Signed EIP-155 example: v = 37 for recovery id 0 on chain 1.
    #[test]
    fn test_raw_encodes_eip155_v() {
        let kp = Keypair::from_secret_key([0x46; 32]).unwrap();
        let tx = sample();
        let signed = tx.clone().with_signature(kp.sign_digest(&tx.signing_hash()));
        let raw = hex::encode(signed.raw());
        assert_eq!(signed.v(), 37);
        assert_eq!(
            raw,
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_contract_creation_has_empty_to() {
        let mut tx = sample();
        tx.to = None;
        let payload = tx.signing_payload();
        // `to` encodes as the empty string 0x80, between gas limit and value
        assert!(hex::encode(payload).contains("82520880880de0b6b3a7640000"));
    }
}
