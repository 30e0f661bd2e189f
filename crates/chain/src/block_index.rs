//! Height-ordered index of main-chain block hashes.

use std::collections::HashMap;

use obol_crypto::Hash256;

#[derive(Default)]
pub struct BlockIndex {
    ids: Vec<Hash256>,
    heights: HashMap<Hash256, u32>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u32 {
        self.ids.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.heights.clear();
    }

    pub fn push(&mut self, hash: Hash256) {
        let height = self.ids.len() as u32;
        self.ids.push(hash);
        self.heights.insert(hash, height);
    }

    pub fn pop(&mut self) -> Option<Hash256> {
        let hash = self.ids.pop()?;
        self.heights.remove(&hash);
        Some(hash)
    }

    pub fn tail_id(&self) -> Option<Hash256> {
        self.ids.last().copied()
    }

    pub fn block_id(&self, height: u32) -> Option<Hash256> {
        self.ids.get(height as usize).copied()
    }

    pub fn block_height(&self, hash: &Hash256) -> Option<u32> {
        self.heights.get(hash).copied()
    }

    pub fn has_block(&self, hash: &Hash256) -> bool {
        self.heights.contains_key(hash)
    }

    pub fn block_ids(&self, start_height: u32, max_count: u32) -> Vec<Hash256> {
        self.ids
            .iter()
            .skip(start_height as usize)
            .take(max_count as usize)
            .copied()
            .collect()
    }

    /// Hashes walking back from `start` with doubling strides, always
    /// terminating at genesis. Used to describe our chain compactly.
    pub fn build_sparse_chain(&self, start: &Hash256) -> Vec<Hash256> {
        let Some(start_height) = self.block_height(start) else {
            return Vec::new();
        };
        let mut sparse = Vec::new();
        let mut offset: u32 = 1;
        let mut current = start_height as i64;
        while current > 0 {
            sparse.push(self.ids[current as usize]);
            current -= offset as i64;
            offset = offset.saturating_mul(2);
        }
        sparse.push(self.ids[0]);
        sparse
    }

    /// Height of the first hash in `remote_ids` we also have. The list
    /// is expected to end at a shared genesis.
    pub fn find_supplement(&self, remote_ids: &[Hash256]) -> Option<u32> {
        remote_ids.iter().find_map(|id| self.block_height(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::fast_hash;

    fn build(count: u32) -> BlockIndex {
        let mut index = BlockIndex::new();
        for i in 0..count {
            index.push(fast_hash(&i.to_le_bytes()));
        }
        index
    }

    #[test]
    fn push_pop_round_trip() {
        let mut index = build(3);
        assert_eq!(index.size(), 3);
        let tail = index.tail_id().unwrap();
        assert_eq!(index.block_height(&tail), Some(2));
        assert_eq!(index.pop(), Some(tail));
        assert_eq!(index.size(), 2);
        assert!(!index.has_block(&tail));
    }

    #[test]
    fn sparse_chain_terminates_at_genesis() {
        let index = build(10);
        let start = index.block_id(9).unwrap();
        let sparse = index.build_sparse_chain(&start);
        assert_eq!(sparse.first(), Some(&start));
        assert_eq!(sparse.last(), index.block_id(0).as_ref());
        // heights walked: 9, 8, 6, 2, then genesis
        assert_eq!(sparse.len(), 5);
    }

    #[test]
    fn sparse_chain_of_genesis_is_singleton() {
        let index = build(1);
        let genesis = index.block_id(0).unwrap();
        assert_eq!(index.build_sparse_chain(&genesis), vec![genesis]);
    }

    #[test]
    fn supplement_finds_first_known() {
        let index = build(8);
        let remote = vec![fast_hash(b"unknown"), index.block_id(5).unwrap(), index.block_id(0).unwrap()];
        assert_eq!(index.find_supplement(&remote), Some(5));
        assert_eq!(index.find_supplement(&[fast_hash(b"none")]), None);
    }
}
