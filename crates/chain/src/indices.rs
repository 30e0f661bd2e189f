//! Auxiliary lookup indices maintained alongside the main chain and the
//! mempool: payment id, timestamp, generated-transaction counts, and
//! orphaned (alternative) blocks by height.

use std::collections::{BTreeMap, HashMap};

use obol_crypto::Hash256;
use obol_primitives::{Decodable, DecodeError, Decoder, Encodable, Encoder, Transaction};

#[derive(Default)]
pub struct PaymentIdIndex {
    index: HashMap<Hash256, Vec<Hash256>>,
}

impl PaymentIdIndex {
    pub fn add(&mut self, tx: &Transaction) {
        if let Some(payment_id) = tx.payment_id() {
            self.index.entry(payment_id).or_default().push(tx.hash());
        }
    }

    pub fn remove(&mut self, tx: &Transaction) {
        if let Some(payment_id) = tx.payment_id() {
            let hash = tx.hash();
            if let Some(hashes) = self.index.get_mut(&payment_id) {
                hashes.retain(|candidate| *candidate != hash);
                if hashes.is_empty() {
                    self.index.remove(&payment_id);
                }
            }
        }
    }

    pub fn find(&self, payment_id: &Hash256) -> Vec<Hash256> {
        self.index.get(payment_id).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

impl Encodable for PaymentIdIndex {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        let mut keys: Vec<&Hash256> = self.index.keys().collect();
        keys.sort_unstable();
        encoder.write_varint(keys.len() as u64);
        for key in keys {
            encoder.write_hash(key);
            let hashes = &self.index[key];
            encoder.write_varint(hashes.len() as u64);
            for hash in hashes {
                encoder.write_hash(hash);
            }
        }
    }
}

impl Decodable for PaymentIdIndex {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_size()?;
        let mut index = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = decoder.read_hash()?;
            let hash_count = decoder.read_size()?;
            let mut hashes = Vec::with_capacity(hash_count);
            for _ in 0..hash_count {
                hashes.push(decoder.read_hash()?);
            }
            index.insert(key, hashes);
        }
        Ok(Self { index })
    }
}

/// Timestamp to hashes, queried by interval. Used both for blocks (by
/// block timestamp) and for pool transactions (by receive time).
#[derive(Default)]
pub struct TimestampIndex {
    index: BTreeMap<u64, Vec<Hash256>>,
}

impl TimestampIndex {
    pub fn add(&mut self, timestamp: u64, hash: Hash256) {
        self.index.entry(timestamp).or_default().push(hash);
    }

    pub fn remove(&mut self, timestamp: u64, hash: &Hash256) {
        if let Some(hashes) = self.index.get_mut(&timestamp) {
            hashes.retain(|candidate| candidate != hash);
            if hashes.is_empty() {
                self.index.remove(&timestamp);
            }
        }
    }

    /// Hashes within `[begin, end]`, capped at `limit`; also reports the
    /// total number of hashes in the interval.
    pub fn find(&self, begin: u64, end: u64, limit: usize) -> (Vec<Hash256>, u64) {
        let mut hashes = Vec::new();
        let mut total = 0u64;
        for (_, bucket) in self.index.range(begin..=end) {
            for hash in bucket {
                total += 1;
                if hashes.len() < limit {
                    hashes.push(*hash);
                }
            }
        }
        (hashes, total)
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

impl Encodable for TimestampIndex {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.index.len() as u64);
        for (timestamp, hashes) in &self.index {
            encoder.write_varint(*timestamp);
            encoder.write_varint(hashes.len() as u64);
            for hash in hashes {
                encoder.write_hash(hash);
            }
        }
    }
}

impl Decodable for TimestampIndex {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_size()?;
        let mut index = BTreeMap::new();
        for _ in 0..count {
            let timestamp = decoder.read_varint()?;
            let hash_count = decoder.read_size()?;
            let mut hashes = Vec::with_capacity(hash_count);
            for _ in 0..hash_count {
                hashes.push(decoder.read_hash()?);
            }
            index.insert(timestamp, hashes);
        }
        Ok(Self { index })
    }
}

/// Running total of transactions generated up to each height.
#[derive(Default)]
pub struct GeneratedTransactionsIndex {
    index: BTreeMap<u32, u64>,
    last_generated: u64,
}

impl GeneratedTransactionsIndex {
    /// Records a block at `height` carrying `transaction_count`
    /// transactions (coinbase included).
    pub fn add(&mut self, height: u32, transaction_count: u64) {
        self.last_generated += transaction_count;
        self.index.insert(height, self.last_generated);
    }

    /// Removes the tail block's record; `height` must be the last added.
    pub fn remove(&mut self, height: u32, transaction_count: u64) -> bool {
        match self.index.remove(&height) {
            Some(_) => {
                self.last_generated = self.last_generated.saturating_sub(transaction_count);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, height: u32) -> Option<u64> {
        self.index.get(&height).copied()
    }

    pub fn last_generated(&self) -> u64 {
        self.last_generated
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.last_generated = 0;
    }
}

impl Encodable for GeneratedTransactionsIndex {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.last_generated);
        encoder.write_varint(self.index.len() as u64);
        for (height, generated) in &self.index {
            encoder.write_u32_le(*height);
            encoder.write_varint(*generated);
        }
    }
}

impl Decodable for GeneratedTransactionsIndex {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let last_generated = decoder.read_varint()?;
        let count = decoder.read_size()?;
        let mut index = BTreeMap::new();
        for _ in 0..count {
            let height = decoder.read_u32_le()?;
            let generated = decoder.read_varint()?;
            index.insert(height, generated);
        }
        Ok(Self { index, last_generated })
    }
}

/// Alternative-chain block hashes grouped by their claimed height.
#[derive(Default)]
pub struct OrphanBlocksIndex {
    index: HashMap<u32, Vec<Hash256>>,
}

impl OrphanBlocksIndex {
    pub fn add(&mut self, height: u32, hash: Hash256) {
        self.index.entry(height).or_default().push(hash);
    }

    pub fn remove(&mut self, height: u32, hash: &Hash256) {
        if let Some(hashes) = self.index.get_mut(&height) {
            hashes.retain(|candidate| candidate != hash);
            if hashes.is_empty() {
                self.index.remove(&height);
            }
        }
    }

    pub fn find(&self, height: u32) -> Vec<Hash256> {
        self.index.get(&height).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::fast_hash;
    use obol_primitives::{decode, encode};

    #[test]
    fn timestamp_interval_query() {
        let mut index = TimestampIndex::default();
        index.add(100, fast_hash(b"a"));
        index.add(150, fast_hash(b"b"));
        index.add(150, fast_hash(b"c"));
        index.add(200, fast_hash(b"d"));

        let (hashes, total) = index.find(100, 150, 10);
        assert_eq!(total, 3);
        assert_eq!(hashes.len(), 3);

        let (capped, total) = index.find(0, 300, 2);
        assert_eq!(total, 4);
        assert_eq!(capped.len(), 2);

        index.remove(150, &fast_hash(b"b"));
        let (_, total) = index.find(100, 150, 10);
        assert_eq!(total, 2);
    }

    #[test]
    fn generated_transactions_running_total() {
        let mut index = GeneratedTransactionsIndex::default();
        index.add(0, 1);
        index.add(1, 3);
        index.add(2, 1);
        assert_eq!(index.find(1), Some(4));
        assert_eq!(index.last_generated(), 5);
        assert!(index.remove(2, 1));
        assert_eq!(index.last_generated(), 4);
        assert_eq!(index.find(2), None);
    }

    #[test]
    fn timestamp_index_codec_round_trip() {
        let mut index = TimestampIndex::default();
        index.add(5, fast_hash(b"x"));
        index.add(9, fast_hash(b"y"));
        let restored: TimestampIndex = decode(&encode(&index)).unwrap();
        assert_eq!(restored.find(0, 10, 10), index.find(0, 10, 10));
    }
}
