use sha2::{Digest as _, Sha256};

pub type Hash256 = [u8; 32];

pub const NULL_HASH: Hash256 = [0u8; 32];

/// Object hash used for transaction and block identities.
pub fn fast_hash(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Hash of the concatenation of two digests, used by the merkle tree.
pub fn fast_hash_two(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    fast_hash(&buf)
}

/// Heavy hash applied to block hashing blobs for the proof-of-work
/// check. Kept separate from [`fast_hash`] so block identity and work
/// measurement never share a digest.
pub fn slow_hash(data: &[u8]) -> Hash256 {
    let digest = blake2b_simd::Params::new().hash_length(32).hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

pub(crate) fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_and_slow_hashes_disagree() {
        let data = b"genesis";
        assert_ne!(fast_hash(data), slow_hash(data));
    }

    #[test]
    fn hash_two_depends_on_order() {
        let a = fast_hash(b"a");
        let b = fast_hash(b"b");
        assert_ne!(fast_hash_two(&a, &b), fast_hash_two(&b, &a));
    }
}
