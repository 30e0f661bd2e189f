//! Fee-density ordering for pool transactions.

use std::cmp::Ordering;

use obol_crypto::Hash256;

/// Sort key: higher `fee/size` first, computed as a 128-bit
/// cross-multiply so no precision is lost; ties prefer smaller blobs,
/// then older arrivals. The id keeps the ordering total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityKey {
    pub fee: u64,
    pub blob_size: usize,
    pub receive_time: u64,
    pub id: Hash256,
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let own = self.fee as u128 * other.blob_size as u128;
        let their = other.fee as u128 * self.blob_size as u128;
        their
            .cmp(&own)
            .then_with(|| self.blob_size.cmp(&other.blob_size))
            .then_with(|| self.receive_time.cmp(&other.receive_time))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
