//! Hard-coded height/hash anchors.

use std::collections::BTreeMap;

use obol_crypto::{to_hex, Hash256};
use obol_currency::Checkpoint;
use obol_log::{log_error, log_info};

#[derive(Default)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash256>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_list(list: &[Checkpoint]) -> Self {
        let mut checkpoints = Self::new();
        for point in list {
            checkpoints.add(point.height, point.hash);
        }
        checkpoints
    }

    pub fn add(&mut self, height: u32, hash: Hash256) {
        if self.points.insert(height, hash).is_some() {
            log_error!("checkpoint at height {height} redefined");
        }
    }

    pub fn is_checkpoint_height(&self, height: u32) -> bool {
        self.points.contains_key(&height)
    }

    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.points
            .last_key_value()
            .is_some_and(|(last, _)| height <= *last)
    }

    /// Verdict for a block at a checkpointed height; also reports
    /// whether the height is checkpointed at all.
    pub fn check_block(&self, height: u32, hash: &Hash256) -> (bool, bool) {
        match self.points.get(&height) {
            None => (true, false),
            Some(expected) if expected == hash => {
                log_info!("checkpoint passed at height {height}, hash {}", to_hex(hash));
                (true, true)
            }
            Some(expected) => {
                log_error!(
                    "checkpoint failed at height {height}: expected {}, got {}",
                    to_hex(expected),
                    to_hex(hash)
                );
                (false, true)
            }
        }
    }

    /// An alternative block is only acceptable above the last checkpoint
    /// at or below the current chain height.
    pub fn is_alternative_block_allowed(&self, blockchain_height: u32, block_height: u32) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=blockchain_height).next_back() {
            None => true,
            Some((checkpoint_height, _)) => *checkpoint_height < block_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::fast_hash;

    fn sample() -> Checkpoints {
        let mut points = Checkpoints::new();
        points.add(5, fast_hash(b"five"));
        points.add(10, fast_hash(b"ten"));
        points
    }

    #[test]
    fn checkpointed_heights_are_enforced() {
        let points = sample();
        assert_eq!(points.check_block(5, &fast_hash(b"five")), (true, true));
        assert_eq!(points.check_block(5, &fast_hash(b"wrong")), (false, true));
        assert_eq!(points.check_block(7, &fast_hash(b"anything")), (true, false));
    }

    #[test]
    fn zone_covers_up_to_last_checkpoint() {
        let points = sample();
        assert!(points.is_in_checkpoint_zone(10));
        assert!(!points.is_in_checkpoint_zone(11));
    }

    #[test]
    fn alternative_blocks_below_checkpoint_are_rejected() {
        let points = sample();
        // last checkpoint at or below chain height 12 is 10
        assert!(!points.is_alternative_block_allowed(12, 9));
        assert!(!points.is_alternative_block_allowed(12, 10));
        assert!(points.is_alternative_block_allowed(12, 11));
        // chain height before any checkpoint: everything but genesis allowed
        assert!(points.is_alternative_block_allowed(4, 2));
        assert!(!points.is_alternative_block_allowed(4, 0));
    }
}
