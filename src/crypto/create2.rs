//! Deterministic salt and address derivation.
//!
//! Salt (matches the factory's `generateSalt`):
//!   salt = keccak256(abi.encodePacked(namespace, uint256(chainId), uint256(nonce)))
//! CREATE2 (EIP-1014):
//!   address = keccak256(0xff || factory || salt || keccak256(creationCode))[12..32]
//! Safe proxies (SafeProxyFactory.createProxyWithNonce):
//!   salt = keccak256(keccak256(initializer) || saltNonce)

use super::{keccak256, Address, Salt};

/// Derives a deployment salt from a namespace, chain id and nonce.
///
/// Integers are encoded as fixed-width 32-byte big-endian words so the
/// preimage is unambiguous for any namespace length.
pub fn derive_salt(namespace: &str, chain_id: u64, nonce: u64) -> Salt {
    let mut preimage = Vec::with_capacity(namespace.len() + 64);
    preimage.extend_from_slice(namespace.as_bytes());
    preimage.extend_from_slice(&u64_word(chain_id));
    preimage.extend_from_slice(&u64_word(nonce));
    Salt::from_bytes(keccak256(&preimage))
}

/// Computes the CREATE2 address for `creation_code` deployed by `factory`.
pub fn predict_address(factory: &Address, salt: &Salt, creation_code: &[u8]) -> Address {
    create2_address(factory, salt, &keccak256(creation_code))
}

/// CREATE2 from a precomputed init code hash.
/// Preimage: 0xff (1) || factory (20) || salt (32) || init_code_hash (32) = 85 bytes.
pub fn create2_address(factory: &Address, salt: &Salt, init_code_hash: &[u8; 32]) -> Address {
    let mut preimage = [0u8; 85];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(factory.as_bytes());
    preimage[21..53].copy_from_slice(salt.as_bytes());
    preimage[53..85].copy_from_slice(init_code_hash);

    let hash = keccak256(&preimage);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..32]);
    Address::from_bytes(addr)
}

/// Address of a contract created by a plain CREATE from `sender` at `nonce`.
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    alloy_primitives::Address::from(*sender).create(nonce).into()
}

/// Computes the CREATE2 salt used by Safe: keccak256(initializer_hash || salt_nonce).
pub fn safe_salt(initializer_hash: &[u8; 32], salt_nonce: &[u8; 32]) -> Salt {
    let mut preimage = [0u8; 64];
    preimage[0..32].copy_from_slice(initializer_hash);
    preimage[32..64].copy_from_slice(salt_nonce);
    Salt::from_bytes(keccak256(&preimage))
}

/// Computes the Safe proxy address.
///
/// The proxy init code is `proxyCreationCode || uint256(singleton)`.
pub fn safe_address(
    proxy_factory: &Address,
    proxy_creation_code: &[u8],
    singleton: &Address,
    initializer: &[u8],
    salt_nonce: &[u8; 32],
) -> Address {
    let salt = safe_salt(&keccak256(initializer), salt_nonce);

    let mut init_code = Vec::with_capacity(proxy_creation_code.len() + 32);
    init_code.extend_from_slice(proxy_creation_code);
    init_code.extend_from_slice(&singleton.to_word());

    create2_address(proxy_factory, &salt, &keccak256(&init_code))
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}
