//! Node interface served directly from an in-process core. Wallets in
//! the same process sync against this the same way they would against
//! a remote daemon.

use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Sender};
use obol_chain::BlockchainMessage;
use obol_log::log_debug;
use obol_transfers::node::{
    CompleteBlock, Node, NodeCallback, NodeObserver, PoolChanges, QueryBlocksResult, SyncError,
};
use obol_transfers::observers::ObserverList;

use crate::core::Core;

/// Upper bound on blocks served per sync round trip.
const BLOCKS_SYNCHRONIZING_DEFAULT_COUNT: u32 = 100;

pub struct LocalNode {
    core: Arc<Core>,
    observers: Arc<ObserverList<dyn NodeObserver>>,
    shutdown: Sender<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LocalNode {
    pub fn new(core: Arc<Core>) -> Arc<Self> {
        let chain_messages = core.blockchain.subscribe_messages();
        let pool_events = core.pool.subscribe_events();
        let observers: Arc<ObserverList<dyn NodeObserver>> = Arc::new(ObserverList::new());
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        let pump_core = core.clone();
        let pump_observers = observers.clone();
        let pump = std::thread::spawn(move || loop {
            select! {
                recv(chain_messages) -> message => match message {
                    Ok(message) => {
                        let height = pump_core.blockchain.height().saturating_sub(1);
                        match message {
                            BlockchainMessage::NewBlock(_) | BlockchainMessage::ChainSwitch(_) => {
                                pump_observers.notify(|observer| {
                                    observer.local_blockchain_updated(height);
                                    observer.last_known_block_height_updated(height);
                                });
                                pump_observers.notify(|observer| observer.pool_changed());
                            }
                            BlockchainMessage::NewAlternativeBlock(_) => {}
                        }
                    }
                    Err(_) => break,
                },
                recv(pool_events) -> event => match event {
                    Ok(_) => pump_observers.notify(|observer| observer.pool_changed()),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _ => break,
            }
        });

        Arc::new(Self { core, observers, shutdown, pump: Mutex::new(Some(pump)) })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
        log_debug!("local node pump stopped");
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Node for LocalNode {
    fn add_observer(&self, observer: Weak<dyn NodeObserver>) {
        self.observers.add(observer);
    }

    fn get_last_local_block_height(&self) -> u32 {
        self.core.blockchain.height().saturating_sub(1)
    }

    fn get_last_known_block_height(&self) -> u32 {
        self.get_last_local_block_height()
    }

    fn get_peer_count(&self) -> usize {
        0
    }

    fn relay_transaction(&self, transaction: obol_primitives::Transaction, callback: NodeCallback<()>) {
        let ctx = self.core.handle_incoming_transaction(transaction);
        let result = if ctx.verification_failed {
            Err(SyncError::RequestFailed("transaction rejected by the pool".into()))
        } else {
            Ok(())
        };
        if result.is_ok() {
            self.observers.notify(|observer| observer.pool_changed());
        }
        callback(result);
    }

    fn query_blocks(
        &self,
        known_block_ids: Vec<obol_crypto::Hash256>,
        _timestamp: u64,
        callback: NodeCallback<QueryBlocksResult>,
    ) {
        let Some((_, _, start_height)) = self
            .core
            .blockchain
            .find_blockchain_supplement(&known_block_ids, BLOCKS_SYNCHRONIZING_DEFAULT_COUNT)
        else {
            callback(Err(SyncError::InvalidResponse("no common block with the frontier")));
            return;
        };

        let blocks = self
            .core
            .blockchain
            .get_blocks_with_transactions(start_height, BLOCKS_SYNCHRONIZING_DEFAULT_COUNT);
        let complete: Vec<CompleteBlock> = blocks
            .into_iter()
            .map(|(block, transactions)| {
                let mut all = Vec::with_capacity(1 + transactions.len());
                all.push(block.base_transaction.clone());
                all.extend(transactions);
                CompleteBlock { block_hash: block.hash(), block: Some(block), transactions: all }
            })
            .collect();

        callback(Ok(QueryBlocksResult { start_height, blocks: complete }));
    }

    fn get_pool_symmetric_difference(
        &self,
        known_pool_tx_ids: Vec<obol_crypto::Hash256>,
        known_block_id: obol_crypto::Hash256,
        callback: NodeCallback<PoolChanges>,
    ) {
        let is_actual = known_block_id == self.core.blockchain.tail_id();
        let (new_ids, deleted_transaction_ids) = self.core.pool.get_difference(&known_pool_tx_ids);
        let (added_transactions, _) = self.core.pool.get_transactions_by_ids(&new_ids);
        callback(Ok(PoolChanges {
            is_last_known_block_actual: is_actual,
            added_transactions,
            deleted_transaction_ids,
        }));
    }

    fn get_transaction_outs_global_indices(
        &self,
        transaction_hash: obol_crypto::Hash256,
        callback: NodeCallback<Vec<u32>>,
    ) {
        match self.core.blockchain.get_transaction_global_indices(&transaction_hash) {
            Some(indices) => callback(Ok(indices)),
            None => callback(Err(SyncError::InvalidResponse("unknown transaction"))),
        }
    }
}
