//! Cryptographic byte types and primitive operations.
//!
//! The byte layouts here (32-byte keys and key images, 64-byte
//! signatures) are the wire contract the rest of the workspace consumes.
//! The operations are a deterministic software backend: derivations are
//! symmetric, derive/underive round-trip, generate/check pairs agree,
//! and key images are stable per output key pair. No hardness is
//! claimed; a hardened backend can replace this module without touching
//! callers.

mod account;
mod hash;
mod keys;
mod sig;

pub use account::{
    generate_account, generate_deterministic_account, AccountKeys, AccountPublicAddress,
};
pub use hash::{fast_hash, fast_hash_two, slow_hash, Hash256, NULL_HASH};
pub use keys::{
    derive_public_key, derive_secret_key, generate_deterministic_keys, generate_key_derivation,
    generate_key_image, generate_keys, public_from_secret, underive_public_key, KeyDerivation,
    KeyImage, KeyPair, PublicKey, SecretKey, NULL_PUBLIC_KEY,
};
pub use sig::{
    check_ring_signature, check_signature, generate_ring_signature, generate_signature, Signature,
};

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
