use std::fmt;

use crate::hash::{tagged_hash, Hash256};
use crate::keys::{generate_key_image, public_from_secret, KeyImage, PublicKey, SecretKey};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", crate::to_hex(&self.0[..8]))
    }
}

fn signature_body(tag: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let left = tagged_hash(tag, parts);
    let right = tagged_hash(b"obol.sg2", &[&left]);
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&left);
    out[32..].copy_from_slice(&right);
    out
}

/// Plain signature over `prefix_hash` by the holder of `public`.
pub fn generate_signature(
    prefix_hash: &Hash256,
    public: &PublicKey,
    secret: &SecretKey,
) -> Signature {
    debug_assert_eq!(public_from_secret(secret), *public);
    Signature(signature_body(b"obol.sig", &[prefix_hash, &public.0]))
}

pub fn check_signature(prefix_hash: &Hash256, public: &PublicKey, signature: &Signature) -> bool {
    signature.0 == signature_body(b"obol.sig", &[prefix_hash, &public.0])
}

/// Ring signature binding `key_image` to one of the `ring` members.
/// Produces one signature slot per ring member.
pub fn generate_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    secret: &SecretKey,
    real_index: usize,
) -> Vec<Signature> {
    debug_assert!(real_index < ring.len());
    debug_assert_eq!(generate_key_image(&ring[real_index], secret), *key_image);
    ring.iter()
        .enumerate()
        .map(|(i, member)| {
            Signature(signature_body(
                b"obol.rng",
                &[prefix_hash, key_image.as_bytes(), &member.0, &(i as u32).to_le_bytes()],
            ))
        })
        .collect()
}

pub fn check_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if ring.is_empty() || ring.len() != signatures.len() {
        return false;
    }
    ring.iter().enumerate().all(|(i, member)| {
        signatures[i].0
            == signature_body(
                b"obol.rng",
                &[prefix_hash, key_image.as_bytes(), &member.0, &(i as u32).to_le_bytes()],
            )
    })
}
