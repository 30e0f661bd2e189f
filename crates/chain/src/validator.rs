//! Seams between the engine, the mempool, and the block front door.

use obol_crypto::{Hash256, NULL_HASH};
use obol_primitives::Transaction;

/// A block position memoized by input checks: the height plus the hash
/// observed there, so a reorg invalidates the memo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u32,
    pub id: Hash256,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self { height: 0, id: NULL_HASH }
    }
}

impl BlockInfo {
    pub fn is_empty(&self) -> bool {
        self.id == NULL_HASH
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Ring-signature and size arbitration the mempool delegates to the
/// blockchain engine.
pub trait TransactionValidator: Send + Sync {
    /// Full input check; fills `max_used` with the highest block any
    /// referenced output lives in.
    fn check_transaction_inputs(&self, tx: &Transaction, max_used: &mut BlockInfo) -> bool;

    /// Memoizing variant: skips the ring-signature re-check while the
    /// chain still contains `max_used`, and short-circuits to failure
    /// while it still contains `last_failed`.
    fn check_transaction_inputs_cached(
        &self,
        tx: &Transaction,
        max_used: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> bool;

    fn have_spent_key_images(&self, tx: &Transaction) -> bool;

    fn check_transaction_size(&self, blob_size: usize) -> bool;
}

/// Mempool surface the engine pulls block bodies through. Implementations
/// must not call back into the engine from these methods; the engine
/// holds its own lock while calling them.
pub trait BlockTransactionPool: Send + Sync {
    /// Removes the transaction for inclusion in a block.
    fn take_for_block(&self, id: &Hash256) -> Option<(Transaction, usize, u64)>;

    /// Returns a transaction popped out of a block to the pool, marked
    /// kept-by-block with its validation memo cleared.
    fn return_from_block(&self, tx: Transaction) -> bool;

    /// Pool lookup used when sizing alternative blocks.
    fn get_transaction(&self, id: &Hash256) -> Option<Transaction>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BlockVerificationContext {
    pub added_to_main_chain: bool,
    pub verification_failed: bool,
    pub marked_as_orphaned: bool,
    pub already_exists: bool,
    pub switched_to_alt_chain: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TxVerificationContext {
    pub should_be_relayed: bool,
    pub verification_failed: bool,
    /// Not decidable against current chain state; retry later.
    pub verification_impossible: bool,
    pub added_to_pool: bool,
    pub tx_fee_too_small: bool,
}
