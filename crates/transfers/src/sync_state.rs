//! Per-consumer record of which main-chain block hashes have been
//! applied, and how an incoming interval relates to them.

use obol_crypto::Hash256;
use obol_primitives::{DecodeError, Decoder, Encoder};

const STATE_BLOB_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynchronizationState {
    /// Hash at index `h` is the applied block at height `h`.
    known_block_hashes: Vec<Hash256>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub detach_required: bool,
    pub detach_height: u32,
    pub has_new_blocks: bool,
    pub new_block_height: u32,
}

impl SynchronizationState {
    pub fn new(genesis_block_hash: Hash256) -> Self {
        Self { known_block_hashes: vec![genesis_block_hash] }
    }

    pub fn height(&self) -> u32 {
        self.known_block_hashes.len() as u32
    }

    pub fn known_block_hashes(&self) -> &[Hash256] {
        &self.known_block_hashes
    }

    /// Sparse frontier for a sync request: tail backwards with doubling
    /// strides, genesis last.
    pub fn short_history(&self) -> Vec<Hash256> {
        let mut history = Vec::new();
        let mut offset: u64 = 1;
        let mut current = self.known_block_hashes.len() as i64 - 1;
        while current > 0 {
            history.push(self.known_block_hashes[current as usize]);
            current -= offset as i64;
            offset = offset.saturating_mul(2);
        }
        history.push(self.known_block_hashes[0]);
        history
    }

    /// Relates an incoming `[start_height, ...)` hash interval to the
    /// known chain: where to detach, where new blocks begin.
    pub fn check_interval(&self, start_height: u32, hashes: &[Hash256]) -> CheckResult {
        let mut result = CheckResult::default();
        for (offset, hash) in hashes.iter().enumerate() {
            let height = start_height as usize + offset;
            if height < self.known_block_hashes.len() {
                if self.known_block_hashes[height] != *hash {
                    result.detach_required = true;
                    result.detach_height = height as u32;
                    result.has_new_blocks = true;
                    result.new_block_height = height as u32;
                    break;
                }
            } else {
                result.has_new_blocks = true;
                result.new_block_height = height as u32;
                break;
            }
        }
        if !result.detach_required
            && (start_height as usize + hashes.len()) < self.known_block_hashes.len()
            && !hashes.is_empty()
        {
            // the node's chain is shorter than ours: it rewound
            result.detach_required = true;
            result.detach_height = (start_height as usize + hashes.len()) as u32;
        }
        result
    }

    /// Drops every hash at or above `height`.
    pub fn detach(&mut self, height: u32) {
        self.known_block_hashes.truncate(height as usize);
    }

    /// Appends `hashes` starting at `start_height`; heights already
    /// known must match and are overwritten in place.
    pub fn add_blocks(&mut self, hashes: &[Hash256], start_height: u32) -> bool {
        if start_height as usize > self.known_block_hashes.len() {
            return false;
        }
        self.known_block_hashes.truncate(start_height as usize);
        self.known_block_hashes.extend_from_slice(hashes);
        true
    }

    pub fn save(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(STATE_BLOB_VERSION);
        encoder.write_varint(self.known_block_hashes.len() as u64);
        for hash in &self.known_block_hashes {
            encoder.write_hash(hash);
        }
        encoder.into_inner()
    }

    pub fn load(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != STATE_BLOB_VERSION {
            return Err(DecodeError::InvalidData("unsupported sync state version"));
        }
        let count = decoder.read_size()?;
        let mut known_block_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            known_block_hashes.push(decoder.read_hash()?);
        }
        if known_block_hashes.is_empty() {
            return Err(DecodeError::InvalidData("sync state without genesis"));
        }
        Ok(Self { known_block_hashes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::fast_hash;

    fn hash(i: u32) -> Hash256 {
        fast_hash(&i.to_le_bytes())
    }

    fn state_with(count: u32) -> SynchronizationState {
        let mut state = SynchronizationState::new(hash(0));
        let hashes: Vec<Hash256> = (1..count).map(hash).collect();
        assert!(state.add_blocks(&hashes, 1));
        state
    }

    #[test]
    fn interval_with_only_known_hashes_changes_nothing() {
        let state = state_with(5);
        let interval: Vec<Hash256> = (2..5).map(hash).collect();
        let result = state.check_interval(2, &interval);
        assert!(!result.has_new_blocks);
        assert!(!result.detach_required);
    }

    #[test]
    fn interval_extending_the_chain_reports_new_blocks() {
        let state = state_with(5);
        let interval = vec![hash(4), hash(5), hash(6)];
        let result = state.check_interval(4, &interval);
        assert!(result.has_new_blocks);
        assert!(!result.detach_required);
        assert_eq!(result.new_block_height, 5);
    }

    #[test]
    fn mismatching_hash_requires_detach() {
        let state = state_with(5);
        let interval = vec![hash(3), fast_hash(b"fork"), fast_hash(b"fork2")];
        let result = state.check_interval(3, &interval);
        assert!(result.detach_required);
        assert_eq!(result.detach_height, 4);
        assert!(result.has_new_blocks);
        assert_eq!(result.new_block_height, 4);
    }

    #[test]
    fn short_history_is_sparse_and_ends_at_genesis() {
        let state = state_with(10);
        let history = state.short_history();
        assert_eq!(history.first(), Some(&hash(9)));
        assert_eq!(history.last(), Some(&hash(0)));
        assert!(history.len() < 10);
    }

    #[test]
    fn save_load_round_trip() {
        let state = state_with(7);
        let restored = SynchronizationState::load(&state.save()).unwrap();
        assert_eq!(restored, state);
    }
}
