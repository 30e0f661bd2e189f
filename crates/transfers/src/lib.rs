//! Wallet-side synchronization: per-account transfer ledgers, the
//! consumer pipeline deriving owned outputs from the block stream, and
//! the synchronizer state machine driving it all from a node interface.

pub mod container;
pub mod consumer;
pub mod node;
pub mod observers;
pub mod subscription;
pub mod sync_state;
pub mod synchronizer;
pub mod transfers_synchronizer;
pub mod types;

pub use container::TransfersContainer;
pub use consumer::{ConsumerObserver, TransfersConsumer};
pub use node::{
    promise, CompleteBlock, Node, NodeCallback, NodeObserver, PoolChanges, QueryBlocksResult,
    SyncError,
};
pub use subscription::{TransfersObserver, TransfersSubscription};
pub use sync_state::SynchronizationState;
pub use synchronizer::{BlockchainConsumer, BlockchainSynchronizer, BlockchainSynchronizerObserver};
pub use transfers_synchronizer::{TransfersSynchronizer, TransfersSynchronizerObserver};
pub use types::{
    flags, AccountSubscription, OutputData, SpentTransferRecord, SynchronizationStart,
    TransactionBlockInfo, TransactionInformation, TransactionOutputInformation, TransferRecord,
    UNCONFIRMED_GLOBAL_OUTPUT_INDEX, UNCONFIRMED_HEIGHT,
};
