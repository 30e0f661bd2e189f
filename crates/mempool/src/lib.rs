//! Fee-prioritized staging area for not-yet-mined transactions.

mod pool;
mod priority;
mod template;

pub use pool::{PoolEvent, TransactionDetails, TxMemoryPool};
pub use priority::PriorityKey;
pub use template::BlockTemplate;
