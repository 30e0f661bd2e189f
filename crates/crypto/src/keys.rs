use std::fmt;

use rand::RngCore;
use zeroize::Zeroize;

use crate::hash::{tagged_hash, Hash256};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PublicKey(pub [u8; 32]);

pub const NULL_PUBLIC_KEY: PublicKey = PublicKey([0u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", crate::to_hex(&self.0))
    }
}

/// Secret key material, wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyImage(pub [u8; 32]);

impl KeyImage {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", crate::to_hex(&self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivation([u8; 32]);

impl KeyDerivation {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDerivation({})", crate::to_hex(&self.0))
    }
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

pub fn public_from_secret(secret: &SecretKey) -> PublicKey {
    PublicKey(tagged_hash(b"obol.pk", &[secret.as_bytes()]))
}

pub fn generate_keys<R: RngCore>(rng: &mut R) -> KeyPair {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    let secret = SecretKey::from_bytes(seed);
    let public = public_from_secret(&secret);
    KeyPair { public, secret }
}

pub fn generate_deterministic_keys(seed: &[u8]) -> KeyPair {
    let secret = SecretKey::from_bytes(tagged_hash(b"obol.seed", &[seed]));
    let public = public_from_secret(&secret);
    KeyPair { public, secret }
}

/// Shared-secret derivation between a public key and a secret key.
/// Symmetric: `d(A, b) == d(B, a)` for key pairs `(A, a)` and `(B, b)`.
pub fn generate_key_derivation(public: &PublicKey, secret: &SecretKey) -> Option<KeyDerivation> {
    if public.is_null() {
        return None;
    }
    let own = public_from_secret(secret);
    let (lo, hi) = if own.0 <= public.0 { (own, *public) } else { (*public, own) };
    Some(KeyDerivation(tagged_hash(b"obol.drv", &[&lo.0, &hi.0])))
}

fn derivation_scalar(derivation: &KeyDerivation, output_index: u32) -> Hash256 {
    tagged_hash(b"obol.scl", &[derivation.as_bytes(), &output_index.to_le_bytes()])
}

/// One-time output key for `base` at `output_index` under `derivation`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u32,
    base: &PublicKey,
) -> PublicKey {
    let scalar = derivation_scalar(derivation, output_index);
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = base.0[i] ^ scalar[i];
    }
    PublicKey(out)
}

/// Inverse of [`derive_public_key`]: recovers the base spend key from a
/// one-time output key.
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: u32,
    derived: &PublicKey,
) -> PublicKey {
    derive_public_key(derivation, output_index, derived)
}

pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: u32,
    base: &SecretKey,
) -> SecretKey {
    SecretKey::from_bytes(tagged_hash(
        b"obol.dsk",
        &[derivation.as_bytes(), &output_index.to_le_bytes(), base.as_bytes()],
    ))
}

/// Key image of the one-time key pair `(public, secret)`. Stable per
/// pair, so a double spend surfaces as a repeated image.
pub fn generate_key_image(public: &PublicKey, secret: &SecretKey) -> KeyImage {
    KeyImage(tagged_hash(b"obol.img", &[&public.0, secret.as_bytes()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_symmetric() {
        let alice = generate_deterministic_keys(b"alice");
        let bob = generate_deterministic_keys(b"bob");
        let d1 = generate_key_derivation(&alice.public, &bob.secret).unwrap();
        let d2 = generate_key_derivation(&bob.public, &alice.secret).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn derivation_rejects_null_key() {
        let keys = generate_deterministic_keys(b"seed");
        assert!(generate_key_derivation(&NULL_PUBLIC_KEY, &keys.secret).is_none());
    }

    #[test]
    fn derive_underive_round_trip() {
        let wallet = generate_deterministic_keys(b"wallet");
        let tx = generate_deterministic_keys(b"tx");
        let derivation = generate_key_derivation(&wallet.public, &tx.secret).unwrap();
        let one_time = derive_public_key(&derivation, 3, &wallet.public);
        assert_ne!(one_time, wallet.public);
        assert_eq!(underive_public_key(&derivation, 3, &one_time), wallet.public);
        assert_ne!(underive_public_key(&derivation, 4, &one_time), wallet.public);
    }

    #[test]
    fn key_image_is_stable_per_pair() {
        let derivation = generate_key_derivation(
            &generate_deterministic_keys(b"a").public,
            &generate_deterministic_keys(b"b").secret,
        )
        .unwrap();
        let spend = generate_deterministic_keys(b"spend");
        let one_time_pub = derive_public_key(&derivation, 0, &spend.public);
        let one_time_sec = derive_secret_key(&derivation, 0, &spend.secret);
        let img1 = generate_key_image(&one_time_pub, &one_time_sec);
        let img2 = generate_key_image(&one_time_pub, &one_time_sec);
        assert_eq!(img1, img2);

        let other = derive_secret_key(&derivation, 1, &spend.secret);
        assert_ne!(generate_key_image(&one_time_pub, &other), img1);
    }
}
