//! Narrow node interface the sync pipeline consumes. Operations are
//! callback-based; call sites needing synchronous semantics wrap them
//! with the [`promise`] adapter.

use std::fmt;
use std::sync::Weak;

use crossbeam_channel::{bounded, Receiver};
use obol_crypto::Hash256;
use obol_primitives::{Block, Transaction};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// The operation was abandoned, typically because of shutdown.
    Interrupted,
    NotInitialized,
    /// The node answered but the data cannot be applied.
    InvalidResponse(&'static str),
    RequestFailed(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Interrupted => write!(f, "operation interrupted"),
            SyncError::NotInitialized => write!(f, "node is not initialized"),
            SyncError::InvalidResponse(message) => write!(f, "invalid node response: {message}"),
            SyncError::RequestFailed(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// A block as the wallet pipeline sees it: hash always, body and
/// transaction list when the node has them.
#[derive(Clone, Debug)]
pub struct CompleteBlock {
    pub block_hash: Hash256,
    pub block: Option<Block>,
    /// Coinbase first, then the mined transactions in block order.
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Debug)]
pub struct QueryBlocksResult {
    pub start_height: u32,
    pub blocks: Vec<CompleteBlock>,
}

#[derive(Clone, Debug, Default)]
pub struct PoolChanges {
    pub is_last_known_block_actual: bool,
    pub added_transactions: Vec<Transaction>,
    pub deleted_transaction_ids: Vec<Hash256>,
}

pub type NodeCallback<T> = Box<dyn FnOnce(Result<T, SyncError>) + Send>;

pub trait NodeObserver: Send + Sync {
    fn local_blockchain_updated(&self, _height: u32) {}
    fn last_known_block_height_updated(&self, _height: u32) {}
    fn pool_changed(&self) {}
}

pub trait Node: Send + Sync {
    fn add_observer(&self, observer: Weak<dyn NodeObserver>);

    fn get_last_local_block_height(&self) -> u32;
    fn get_last_known_block_height(&self) -> u32;
    fn get_peer_count(&self) -> usize;

    fn relay_transaction(&self, transaction: Transaction, callback: NodeCallback<()>);

    /// Blocks following the frontier described by `known_block_ids`
    /// (sparse, newest first, ending at genesis), skipping bodies older
    /// than `timestamp`.
    fn query_blocks(
        &self,
        known_block_ids: Vec<Hash256>,
        timestamp: u64,
        callback: NodeCallback<QueryBlocksResult>,
    );

    fn get_pool_symmetric_difference(
        &self,
        known_pool_tx_ids: Vec<Hash256>,
        known_block_id: Hash256,
        callback: NodeCallback<PoolChanges>,
    );

    fn get_transaction_outs_global_indices(
        &self,
        transaction_hash: Hash256,
        callback: NodeCallback<Vec<u32>>,
    );
}

/// Turns a node callback into a blocking wait: returns the callback to
/// hand to the node and the receiver that yields the completion.
pub fn promise<T: Send + 'static>() -> (NodeCallback<T>, Receiver<Result<T, SyncError>>) {
    let (sender, receiver) = bounded(1);
    let callback: NodeCallback<T> = Box::new(move |result| {
        let _ = sender.send(result);
    });
    (callback, receiver)
}

/// Blocks on a promise receiver, mapping a dropped callback to an
/// interruption.
pub fn wait<T>(receiver: Receiver<Result<T, SyncError>>) -> Result<T, SyncError> {
    receiver.recv().unwrap_or(Err(SyncError::Interrupted))
}
