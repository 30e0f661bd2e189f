//! Proof-of-work target check. The heavy hash itself is an opaque
//! primitive; this module only measures it against a difficulty.

use obol_crypto::{slow_hash, Hash256};
use obol_primitives::Block;
use primitive_types::U256;

/// True when `hash * difficulty` fits in 256 bits, i.e. the hash meets
/// the target.
pub fn check_hash(hash: &Hash256, difficulty: u64) -> bool {
    if difficulty == 0 {
        return false;
    }
    U256::from_little_endian(hash)
        .checked_mul(U256::from(difficulty))
        .is_some()
}

pub fn block_proof_of_work_hash(block: &Block) -> Hash256 {
    slow_hash(&block.hashing_blob())
}

pub fn check_proof_of_work(block: &Block, difficulty: u64, proof_of_work: &mut Hash256) -> bool {
    *proof_of_work = block_proof_of_work_hash(block);
    check_hash(proof_of_work, difficulty)
}
