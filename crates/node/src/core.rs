//! Wires the blockchain engine and the mempool together and offers the
//! front doors used by the protocol layer and by tests.

use std::sync::{Arc, Weak};

use obol_chain::{
    BlockTransactionPool, BlockVerificationContext, Blockchain, BlockchainError,
    TransactionValidator, TxVerificationContext,
};
use obol_currency::{Currency, TimeProvider};
use obol_log::log_info;
use obol_mempool::TxMemoryPool;
use obol_primitives::{Block, Transaction};
use obol_storage::BlobStore;

pub struct Core {
    pub currency: Currency,
    pub blockchain: Arc<Blockchain>,
    pub pool: Arc<TxMemoryPool>,
}

impl Core {
    /// Builds and cross-wires the engine pair. The mutual references
    /// are weak on both sides; `Core` owns the strong ones.
    pub fn new(currency: Currency, store: Arc<dyn BlobStore>, time: Arc<dyn TimeProvider>) -> Self {
        let pool = Arc::new(TxMemoryPool::new(currency.clone(), store.clone(), time.clone()));
        let blockchain = Arc::new(Blockchain::new(currency.clone(), store, time));

        let pool_handle: Arc<dyn BlockTransactionPool> = pool.clone();
        blockchain.set_transaction_pool(Arc::downgrade(&pool_handle));

        let validator: Arc<dyn TransactionValidator> = blockchain.clone();
        let validator_weak: Weak<dyn TransactionValidator> = Arc::downgrade(&validator);
        pool.set_validator(validator_weak);

        Self { currency, blockchain, pool }
    }

    pub fn init(&self, load_existing: bool) -> Result<(), BlockchainError> {
        self.blockchain.init(load_existing)?;
        self.pool.init();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.pool.deinit();
        self.blockchain.deinit();
        log_info!("core shut down");
    }

    /// Accepts a block arriving with its transaction bodies: the bodies
    /// are staged into the pool as kept-by-block, then the block is
    /// offered to the chain.
    pub fn handle_incoming_block(
        &self,
        block: Block,
        transactions: Vec<Transaction>,
    ) -> BlockVerificationContext {
        for tx in transactions {
            let id = tx.hash();
            if self.pool.have_transaction(&id) || self.blockchain.have_transaction(&id) {
                continue;
            }
            let mut tx_ctx = TxVerificationContext::default();
            self.pool.add_transaction(tx, &mut tx_ctx, true);
        }

        let mut ctx = BlockVerificationContext::default();
        self.blockchain.add_new_block(block, &mut ctx);
        if ctx.added_to_main_chain {
            let (height, id) = self.blockchain.tail();
            self.pool.on_blockchain_inc(height as u64, &id);
        }
        ctx
    }

    pub fn handle_incoming_transaction(&self, tx: Transaction) -> TxVerificationContext {
        let mut ctx = TxVerificationContext::default();
        self.pool.add_transaction(tx, &mut ctx, false);
        ctx
    }
}
