//! Driving thread for wallet synchronization: a prioritized state
//! machine that alternates blockchain and pool sync rounds, feeding a
//! set of registered consumers.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use obol_crypto::Hash256;
use obol_log::{log_debug, log_error, log_info};
use obol_primitives::Transaction;

use crate::node::{promise, wait, CompleteBlock, Node, PoolChanges, QueryBlocksResult, SyncError};
use crate::observers::ObserverList;
use crate::sync_state::SynchronizationState;
use crate::types::SynchronizationStart;

/// A party interested in the block/pool stream. One consumer typically
/// covers all wallet accounts sharing a view key.
pub trait BlockchainConsumer: Send + Sync {
    fn get_sync_start(&self) -> SynchronizationStart;
    fn known_pool_tx_ids(&self) -> Vec<Hash256>;
    fn on_blockchain_detach(&self, height: u32);
    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: u32) -> bool;
    fn on_pool_updated(&self, added: &[Transaction], deleted: &[Hash256]) -> Result<(), SyncError>;
    fn add_unconfirmed_transaction(&self, tx: &Transaction) -> Result<(), SyncError>;
    fn remove_unconfirmed_transaction(&self, tx_hash: &Hash256);
}

pub trait BlockchainSynchronizerObserver: Send + Sync {
    fn synchronization_progress_updated(&self, _processed: u32, _total: u32) {}
    fn synchronization_completed(&self, _error: Option<SyncError>) {}
}

/// Prioritized states: a pending blockchain sync always preempts a pool
/// sync, and `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Idle = 0,
    PoolSync = 1,
    BlockchainSync = 2,
    Stopped = 3,
}

enum UpdateConsumersResult {
    NothingChanged,
    AddedNewBlocks,
    ErrorOccurred(SyncError),
}

struct Machine {
    current: State,
    future: State,
}

struct Shared {
    consumers: Vec<(Arc<dyn BlockchainConsumer>, SynchronizationState)>,
    add_tasks: Vec<(Transaction, Sender<Result<(), SyncError>>)>,
    remove_tasks: Vec<(Hash256, Sender<Result<(), SyncError>>)>,
}

pub struct BlockchainSynchronizer {
    node: Arc<dyn Node>,
    genesis_block_hash: Hash256,
    shared: Mutex<Shared>,
    machine: Mutex<Machine>,
    has_work: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    observers: ObserverList<dyn BlockchainSynchronizerObserver>,
}

impl BlockchainSynchronizer {
    pub fn new(node: Arc<dyn Node>, genesis_block_hash: Hash256) -> Self {
        Self {
            node,
            genesis_block_hash,
            shared: Mutex::new(Shared {
                consumers: Vec::new(),
                add_tasks: Vec::new(),
                remove_tasks: Vec::new(),
            }),
            machine: Mutex::new(Machine { current: State::Idle, future: State::Idle }),
            has_work: Condvar::new(),
            worker: Mutex::new(None),
            observers: ObserverList::new(),
        }
    }

    pub fn add_observer(&self, observer: Weak<dyn BlockchainSynchronizerObserver>) {
        self.observers.add(observer);
    }

    pub fn add_consumer(&self, consumer: Arc<dyn BlockchainConsumer>) {
        self.add_consumer_with_state(consumer, SynchronizationState::new(self.genesis_block_hash));
    }

    /// Registers a consumer resuming from a previously saved state.
    pub fn add_consumer_with_state(
        &self,
        consumer: Arc<dyn BlockchainConsumer>,
        state: SynchronizationState,
    ) {
        self.lock_shared().consumers.push((consumer, state));
    }

    pub fn remove_consumer(&self, consumer: &Arc<dyn BlockchainConsumer>) -> bool {
        let mut shared = self.lock_shared();
        let before = shared.consumers.len();
        shared.consumers.retain(|(known, _)| !Arc::ptr_eq(known, consumer));
        before != shared.consumers.len()
    }

    pub fn get_consumer_known_blocks(
        &self,
        consumer: &Arc<dyn BlockchainConsumer>,
    ) -> Option<Vec<Hash256>> {
        let shared = self.lock_shared();
        shared
            .consumers
            .iter()
            .find(|(known, _)| Arc::ptr_eq(known, consumer))
            .map(|(_, state)| state.known_block_hashes().to_vec())
    }

    /// Spawns the driving thread and schedules a first blockchain sync.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            log_error!("synchronizer is already started");
            return;
        }
        {
            let mut machine = self.lock_machine();
            machine.current = State::Idle;
            machine.future = State::BlockchainSync;
        }
        let me = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || me.working_procedure()));
    }

    /// Cooperative, terminal shutdown. Pending requests resolve with an
    /// interruption error rather than hanging.
    pub fn stop(&self) {
        self.set_future_state(State::Stopped);
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.fail_pending_tasks();
    }

    /// Queues a just-created transaction for every consumer and waits
    /// for it to be applied.
    pub fn add_unconfirmed_transaction(&self, tx: Transaction) -> Result<(), SyncError> {
        if self.lock_machine().current == State::Stopped {
            return Err(SyncError::NotInitialized);
        }
        let (sender, receiver) = bounded(1);
        self.lock_shared().add_tasks.push((tx, sender));
        self.wake_worker();
        receiver.recv().unwrap_or(Err(SyncError::Interrupted))
    }

    pub fn remove_unconfirmed_transaction(&self, tx_hash: Hash256) -> Result<(), SyncError> {
        if self.lock_machine().current == State::Stopped {
            return Err(SyncError::NotInitialized);
        }
        let (sender, receiver) = bounded(1);
        self.lock_shared().remove_tasks.push((tx_hash, sender));
        self.wake_worker();
        receiver.recv().unwrap_or(Err(SyncError::Interrupted))
    }

    /// Wakes the worker under the machine lock so a signal cannot slip
    /// between its predicate check and its wait.
    fn wake_worker(&self) {
        let _machine = self.lock_machine();
        self.has_work.notify_all();
    }

    // ---- state machine -------------------------------------------------

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_future_state(&self, state: State) -> bool {
        let mut machine = self.lock_machine();
        if state > machine.future {
            machine.future = state;
            self.has_work.notify_all();
            return true;
        }
        false
    }

    fn should_stop(&self) -> bool {
        let machine = self.lock_machine();
        machine.future == State::Stopped || machine.current == State::Stopped
    }

    fn has_pending_tasks(&self) -> bool {
        let shared = self.lock_shared();
        !shared.add_tasks.is_empty() || !shared.remove_tasks.is_empty()
    }

    fn working_procedure(self: Arc<Self>) {
        loop {
            let state = {
                let mut machine = self.lock_machine();
                while machine.future == State::Idle && !self.has_pending_tasks() {
                    machine = self.has_work.wait(machine).unwrap_or_else(|p| p.into_inner());
                }
                machine.current = machine.future;
                machine.future =
                    if machine.current == State::Stopped { State::Stopped } else { State::Idle };
                machine.current
            };

            self.process_pending_tasks();

            match state {
                State::Stopped => break,
                State::BlockchainSync => self.start_blockchain_sync(),
                State::PoolSync => self.start_pool_sync(),
                State::Idle => {}
            }
        }
        log_debug!("synchronizer worker stopped");
    }

    fn process_pending_tasks(&self) {
        let (add_tasks, remove_tasks) = {
            let mut shared = self.lock_shared();
            (std::mem::take(&mut shared.add_tasks), std::mem::take(&mut shared.remove_tasks))
        };
        let consumers: Vec<Arc<dyn BlockchainConsumer>> = self
            .lock_shared()
            .consumers
            .iter()
            .map(|(consumer, _)| consumer.clone())
            .collect();

        for (tx, sender) in add_tasks {
            let result = if self.should_stop() {
                Err(SyncError::Interrupted)
            } else {
                consumers
                    .iter()
                    .try_for_each(|consumer| consumer.add_unconfirmed_transaction(&tx))
            };
            let _ = sender.send(result);
        }

        for (tx_hash, sender) in remove_tasks {
            if !self.should_stop() {
                for consumer in &consumers {
                    consumer.remove_unconfirmed_transaction(&tx_hash);
                }
            }
            let _ = sender.send(Ok(()));
        }
    }

    fn start_blockchain_sync(&self) {
        let (known_blocks, sync_timestamp) = {
            let shared = self.lock_shared();
            let Some((_, state)) = shared.consumers.iter().min_by_key(|(_, state)| state.height())
            else {
                return;
            };
            let timestamp = shared
                .consumers
                .iter()
                .map(|(consumer, _)| consumer.get_sync_start().timestamp)
                .min()
                .unwrap_or(0);
            (state.short_history(), timestamp)
        };

        let (callback, receiver) = promise();
        self.node.query_blocks(known_blocks, sync_timestamp, callback);
        match wait(receiver) {
            Ok(response) => self.process_blocks(response),
            Err(error) => {
                log_error!("failed to query blocks: {error}");
                self.observers
                    .notify(|observer| observer.synchronization_completed(Some(error.clone())));
            }
        }
    }

    fn process_blocks(&self, response: QueryBlocksResult) {
        if self.should_stop() {
            return;
        }
        let hashes: Vec<Hash256> = response.blocks.iter().map(|block| block.block_hash).collect();
        let known_height = self.node.get_last_known_block_height();

        match self.update_consumers(response.start_height, &hashes, &response.blocks) {
            UpdateConsumersResult::AddedNewBlocks => {
                let processed = response.start_height + hashes.len() as u32;
                self.observers.notify(|observer| {
                    observer.synchronization_progress_updated(processed, known_height.max(processed))
                });
                self.set_future_state(State::BlockchainSync);
            }
            UpdateConsumersResult::NothingChanged => {
                log_debug!("blockchain synchronized, switching to pool sync");
                self.observers.notify(|observer| observer.synchronization_completed(None));
                self.set_future_state(State::PoolSync);
            }
            UpdateConsumersResult::ErrorOccurred(error) => {
                log_error!("failed to update consumers: {error}");
                self.observers
                    .notify(|observer| observer.synchronization_completed(Some(error.clone())));
            }
        }
    }

    /// Applies an interval of blocks to every consumer, detaching first
    /// where the interval contradicts a consumer's known chain.
    fn update_consumers(
        &self,
        start_height: u32,
        hashes: &[Hash256],
        blocks: &[CompleteBlock],
    ) -> UpdateConsumersResult {
        let snapshot: Vec<(usize, Arc<dyn BlockchainConsumer>, SynchronizationState)> = {
            let shared = self.lock_shared();
            shared
                .consumers
                .iter()
                .enumerate()
                .map(|(index, (consumer, state))| (index, consumer.clone(), state.clone()))
                .collect()
        };

        let mut added = false;
        for (index, consumer, mut state) in snapshot {
            let check = state.check_interval(start_height, hashes);

            if check.detach_required {
                consumer.on_blockchain_detach(check.detach_height);
                state.detach(check.detach_height);
            }

            if check.has_new_blocks {
                let offset = (check.new_block_height - start_height) as usize;
                if !consumer.on_new_blocks(&blocks[offset..], check.new_block_height) {
                    return UpdateConsumersResult::ErrorOccurred(SyncError::RequestFailed(
                        "consumer failed to process a block batch".into(),
                    ));
                }
                state.add_blocks(&hashes[offset..], check.new_block_height);
                added = true;
            }

            let mut shared = self.lock_shared();
            if let Some((_, stored)) = shared.consumers.get_mut(index) {
                *stored = state;
            }
        }

        if added {
            UpdateConsumersResult::AddedNewBlocks
        } else {
            UpdateConsumersResult::NothingChanged
        }
    }

    fn start_pool_sync(&self) {
        let consumers: Vec<Arc<dyn BlockchainConsumer>> = {
            let shared = self.lock_shared();
            shared.consumers.iter().map(|(consumer, _)| consumer.clone()).collect()
        };
        if consumers.is_empty() {
            return;
        }

        let last_known_block = {
            let shared = self.lock_shared();
            shared
                .consumers
                .iter()
                .min_by_key(|(_, state)| state.height())
                .and_then(|(_, state)| state.known_block_hashes().last().copied())
                .unwrap_or(self.genesis_block_hash)
        };

        let (pool_union, pool_intersection) = Self::pool_union_and_intersection(&consumers);

        let union_response =
            match self.request_pool_difference(pool_union.clone(), last_known_block) {
                Ok(response) => response,
                Err(error) => {
                    self.observers
                        .notify(|observer| observer.synchronization_completed(Some(error.clone())));
                    return;
                }
            };
        if !union_response.is_last_known_block_actual {
            self.set_future_state(State::BlockchainSync);
            return;
        }

        let added_transactions = if pool_union == pool_intersection {
            union_response.added_transactions
        } else {
            // a second query against the intersection yields additions
            // complete for every consumer
            let intersection_response =
                match self.request_pool_difference(pool_intersection, last_known_block) {
                    Ok(response) => response,
                    Err(error) => {
                        self.observers.notify(|observer| {
                            observer.synchronization_completed(Some(error.clone()))
                        });
                        return;
                    }
                };
            if !intersection_response.is_last_known_block_actual {
                self.set_future_state(State::BlockchainSync);
                return;
            }
            intersection_response.added_transactions
        };
        let deleted_ids = union_response.deleted_transaction_ids;

        for consumer in &consumers {
            if self.should_stop() {
                return;
            }
            let known: HashSet<Hash256> = consumer.known_pool_tx_ids().into_iter().collect();
            let consumer_added: Vec<Transaction> = added_transactions
                .iter()
                .filter(|tx| !known.contains(&tx.hash()))
                .cloned()
                .collect();
            let consumer_deleted: Vec<Hash256> =
                deleted_ids.iter().filter(|id| known.contains(*id)).copied().collect();
            if let Err(error) = consumer.on_pool_updated(&consumer_added, &consumer_deleted) {
                log_error!("pool update failed: {error}");
                self.observers
                    .notify(|observer| observer.synchronization_completed(Some(error.clone())));
                return;
            }
        }
        log_info!("pool synchronized, {} added, {} deleted", added_transactions.len(), deleted_ids.len());
    }

    fn request_pool_difference(
        &self,
        known_ids: Vec<Hash256>,
        last_known_block: Hash256,
    ) -> Result<PoolChanges, SyncError> {
        let (callback, receiver) = promise();
        self.node.get_pool_symmetric_difference(known_ids, last_known_block, callback);
        wait(receiver)
    }

    fn pool_union_and_intersection(
        consumers: &[Arc<dyn BlockchainConsumer>],
    ) -> (Vec<Hash256>, Vec<Hash256>) {
        let mut union: HashSet<Hash256> = HashSet::new();
        let mut intersection: Option<HashSet<Hash256>> = None;
        for consumer in consumers {
            let known: HashSet<Hash256> = consumer.known_pool_tx_ids().into_iter().collect();
            union.extend(known.iter().copied());
            intersection = Some(match intersection {
                None => known,
                Some(current) => current.intersection(&known).copied().collect(),
            });
        }
        let mut union: Vec<Hash256> = union.into_iter().collect();
        let mut intersection: Vec<Hash256> =
            intersection.unwrap_or_default().into_iter().collect();
        union.sort_unstable();
        intersection.sort_unstable();
        (union, intersection)
    }

    fn fail_pending_tasks(&self) {
        let (add_tasks, remove_tasks) = {
            let mut shared = self.lock_shared();
            (std::mem::take(&mut shared.add_tasks), std::mem::take(&mut shared.remove_tasks))
        };
        for (_, sender) in add_tasks {
            let _ = sender.send(Err(SyncError::Interrupted));
        }
        for (_, sender) in remove_tasks {
            let _ = sender.send(Err(SyncError::Interrupted));
        }
    }
}

impl crate::node::NodeObserver for BlockchainSynchronizer {
    fn local_blockchain_updated(&self, _height: u32) {
        self.set_future_state(State::BlockchainSync);
    }

    fn last_known_block_height_updated(&self, _height: u32) {
        self.set_future_state(State::BlockchainSync);
    }

    fn pool_changed(&self) {
        self.set_future_state(State::PoolSync);
    }
}
