//! Blockchain storage engine: canonical chain, alternative chains,
//! output registries, reorg execution, and the auxiliary indices.

pub mod block_index;
pub mod blockchain;
pub mod checkpoints;
pub mod indices;
pub mod messages;
pub mod pow;
pub mod shuffle;
pub mod validator;

pub use block_index::BlockIndex;
pub use blockchain::{
    BlockEntry, Blockchain, BlockchainError, OutputEntry, RandomOuts, TransactionEntry,
    TransactionIndex,
};
pub use checkpoints::Checkpoints;
pub use messages::BlockchainMessage;
pub use validator::{
    BlockInfo, BlockTransactionPool, BlockVerificationContext, TransactionValidator,
    TxVerificationContext,
};
