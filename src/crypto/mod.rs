//! Cryptographic primitives for deterministic deployment.
//!
//! This module provides:
//! - Keccak-256 hashing
//! - Address and 32-byte value types with canonical hex formats
//! - Salt derivation and CREATE/CREATE2/Safe address prediction
//! - secp256k1 keypairs and recoverable signatures

mod address;
pub mod create2;
mod hash;
mod keypair;

pub use address::{Address, AddressError};
pub use create2::{
    create2_address, create_address, derive_salt, predict_address, safe_address, safe_salt,
};
pub use hash::{B256Error, CodeHash, Salt, B256};
pub use keypair::{Keypair, Signature};

use tiny_keccak::{Hasher, Keccak};

/// Keccak-256 of arbitrary bytes (output 32 bytes).
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(input);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// keccak256 as a typed code hash.
pub fn code_hash(code: &[u8]) -> CodeHash {
    CodeHash::from_bytes(keccak256(code))
}
