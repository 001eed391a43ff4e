//! secp256k1 keypairs and recoverable ECDSA signatures.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use super::{keccak256, Address};

/// A recoverable ECDSA signature over a 32-byte digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id, 0 or 1.
    pub recovery_id: u8,
}

impl Signature {
    /// Recovers the signing address for `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<Address, secp256k1::Error> {
        let secp = Secp256k1::verification_only();
        let recid = RecoveryId::from_i32(i32::from(self.recovery_id))?;
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let sig = RecoverableSignature::from_compact(&compact, recid)?;
        let public_key = secp.recover_ecdsa(&Message::from_digest(*digest), &sig)?;
        Ok(Keypair::derive_address(&public_key))
    }
}

/// Represents an Ethereum keypair (private key + derived address).
#[derive(Clone)]
pub struct Keypair {
    secret_key: SecretKey,
    address: Address,
}

impl Keypair {
    /// Generates a new random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        Self {
            secret_key,
            address: Self::derive_address(&public_key),
        }
    }

    /// Builds a keypair from an existing secret key.
    pub fn from_secret_key(secret_bytes: [u8; 32]) -> Result<Self, secp256k1::Error> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&secret_bytes)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secret_key,
            address: Self::derive_address(&public_key),
        })
    }

    /// Parses a hex private key (with or without 0x, surrounding whitespace ignored).
    pub fn from_hex(s: &str) -> Result<Self, secp256k1::Error> {
        let s = s.trim();
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body).map_err(|_| secp256k1::Error::InvalidSecretKey)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| secp256k1::Error::InvalidSecretKey)?;
        Self::from_secret_key(arr)
    }

    /// Derives an Ethereum address from a secp256k1 public key.
    ///
    /// keccak256 of the uncompressed key without its 0x04 prefix, last 20 bytes.
    fn derive_address(public_key: &PublicKey) -> Address {
        let public_key_bytes = public_key.serialize_uncompressed();
        let hash = keccak256(&public_key_bytes[1..]);

        let mut address_bytes = [0u8; 20];
        address_bytes.copy_from_slice(&hash[12..]);
        Address::from_bytes(address_bytes)
    }

    /// Signs a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Signature {
        let secp = Secp256k1::signing_only();
        let sig = secp.sign_ecdsa_recoverable(&Message::from_digest(*digest), &self.secret_key);
        let (recid, compact) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        Signature {
            r,
            s,
            // RecoveryId is always 0..=3; Ethereum only produces 0 or 1
            recovery_id: recid.to_i32() as u8,
        }
    }

    /// Returns a reference to the derived address.
    #[inline]
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
