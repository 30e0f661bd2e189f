//! Merkle root over a block's transaction hashes.

use obol_crypto::{fast_hash_two, Hash256, NULL_HASH};

/// Pairwise reduction; an odd tail node is paired with itself.
pub fn tree_hash(hashes: &[Hash256]) -> Hash256 {
    match hashes.len() {
        0 => NULL_HASH,
        1 => hashes[0],
        _ => {
            let mut layer = hashes.to_vec();
            while layer.len() > 1 {
                let mut next = Vec::with_capacity(layer.len().div_ceil(2));
                for pair in layer.chunks(2) {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    next.push(fast_hash_two(&pair[0], right));
                }
                layer = next;
            }
            layer[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::fast_hash;

    #[test]
    fn singleton_is_identity() {
        let h = fast_hash(b"only");
        assert_eq!(tree_hash(&[h]), h);
    }

    #[test]
    fn root_changes_with_any_leaf() {
        let a = fast_hash(b"a");
        let b = fast_hash(b"b");
        let c = fast_hash(b"c");
        let root = tree_hash(&[a, b, c]);
        assert_ne!(root, tree_hash(&[a, b]));
        assert_ne!(root, tree_hash(&[a, c, b]));
    }
}
